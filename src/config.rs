use std::{env, fs::OpenOptions, path::PathBuf, str::FromStr};

use anyhow::{anyhow, Context, Result};
use env_logger::{Env, Target};

use crate::validation::{validate_duration, validate_prefix};

const DEFAULT_DATABASE_URL: &str = "data/tournaments.db";
const DEFAULT_COURSES_FILE: &str = "data/courses.json";
pub const DEFAULT_PREFIX: &str = "!mk";
const DEFAULT_TOURNAMENT_DURATION: i64 = 30;
const DEFAULT_REMINDER_DAYS: i64 = 3;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub token: String,
    pub database_url: String,
    pub courses_file: PathBuf,
    pub default_prefix: String,
    pub default_duration_days: i64,
    pub reminder_days_before_end: i64,
    pub sweep_interval_secs: u64,
    pub course_image_base_url: Option<String>,
    pub log_file: Option<PathBuf>,
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_var(key) {
        Some(v) => v
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value \"{}\"", key, v)),
        None => Ok(default),
    }
}

impl BotConfig {
    /// Reads the configuration from the environment, `.env` included.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let token = optional_var("DISCORD_TOKEN")
            .ok_or_else(|| anyhow!("Expected DISCORD_TOKEN in the environment"))?;

        let default_prefix = optional_var("DEFAULT_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_string());
        validate_prefix(&default_prefix).context("DEFAULT_PREFIX")?;
        let default_duration_days =
            parsed_var("DEFAULT_TOURNAMENT_DURATION", DEFAULT_TOURNAMENT_DURATION)?;
        validate_duration(default_duration_days).context("DEFAULT_TOURNAMENT_DURATION")?;
        let reminder_days_before_end = parsed_var("REMINDER_DAYS_BEFORE_END", DEFAULT_REMINDER_DAYS)?;
        if reminder_days_before_end < 0 {
            return Err(anyhow!("REMINDER_DAYS_BEFORE_END cannot be negative"));
        }
        let sweep_interval_secs = parsed_var("SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?;
        if sweep_interval_secs == 0 {
            return Err(anyhow!("SWEEP_INTERVAL_SECS must be at least 1"));
        }

        Ok(BotConfig {
            token,
            database_url: optional_var("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            courses_file: optional_var("COURSES_FILE")
                .unwrap_or_else(|| DEFAULT_COURSES_FILE.to_string())
                .into(),
            default_prefix,
            default_duration_days,
            reminder_days_before_end,
            sweep_interval_secs,
            course_image_base_url: optional_var("COURSE_IMAGE_BASE_URL"),
            log_file: optional_var("LOG_FILE").map(PathBuf::from),
        })
    }
}

/// `RUST_LOG` picks the level (info by default). Output goes to stderr unless
/// a log file is given.
pub fn init_logging(log_file: Option<&PathBuf>) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(path) = log_file {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Error creating log directory {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Error opening log file {}", path.display()))?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder
        .try_init()
        .context("Error initializing logger")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_vars_fall_back_and_reject_garbage() {
        env::set_var("LAKITU_TEST_NUMBER", "12");
        env::set_var("LAKITU_TEST_GARBAGE", "twelve");
        env::set_var("LAKITU_TEST_BLANK", "  ");
        assert_eq!(parsed_var("LAKITU_TEST_NUMBER", 3i64).unwrap(), 12);
        assert_eq!(parsed_var("LAKITU_TEST_BLANK", 3i64).unwrap(), 3);
        assert_eq!(parsed_var("LAKITU_TEST_UNSET", 3i64).unwrap(), 3);
        assert!(parsed_var("LAKITU_TEST_GARBAGE", 3i64).is_err());
    }
}
