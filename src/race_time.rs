use std::{fmt, str::FromStr};

use crate::error::TimeFormatError;

const MS_PER_SECOND: i64 = 1_000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;

/// A race time in milliseconds, written `m:ss:SSS` for humans.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RaceTime(pub i64);

impl RaceTime {
    pub fn millis(self) -> i64 {
        self.0
    }
}

impl FromStr for RaceTime {
    type Err = TimeFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_time(s).map(RaceTime)
    }
}

impl fmt::Display for RaceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_time(self.0))
    }
}

/// Parses `minutes:seconds:millis`. Minutes are unbounded, seconds must be
/// below 60 and millis below 1000.
pub fn parse_time(text: &str) -> Result<i64, TimeFormatError> {
    let trimmed = text.trim();
    let groups: Vec<&str> = trimmed.split(':').collect();
    if groups.len() != 3 {
        return Err(TimeFormatError::new(trimmed));
    }

    let minutes = parse_group(groups[0]).ok_or_else(|| TimeFormatError::new(trimmed))?;
    let seconds = parse_group(groups[1]).ok_or_else(|| TimeFormatError::new(trimmed))?;
    let millis = parse_group(groups[2]).ok_or_else(|| TimeFormatError::new(trimmed))?;
    if seconds >= 60 || millis >= 1000 {
        return Err(TimeFormatError::new(trimmed));
    }

    minutes
        .checked_mul(MS_PER_MINUTE)
        .and_then(|ms| ms.checked_add(seconds * MS_PER_SECOND + millis))
        .ok_or_else(|| TimeFormatError::new(trimmed))
}

// digits only, `str::parse` would also take a leading '+'
fn parse_group(group: &str) -> Option<i64> {
    if group.is_empty() || !group.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    group.parse::<i64>().ok()
}

pub fn format_time(time_ms: i64) -> String {
    let sign = if time_ms < 0 { "-" } else { "" };
    let abs = time_ms.unsigned_abs();
    let minutes = abs / MS_PER_MINUTE as u64;
    let seconds = (abs % MS_PER_MINUTE as u64) / MS_PER_SECOND as u64;
    let millis = abs % MS_PER_SECOND as u64;

    format!("{}{}:{:02}:{:03}", sign, minutes, seconds, millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_reference_time() {
        assert_eq!(parse_time("1:23:456"), Ok(83_456));
        assert_eq!(format_time(83_456), "1:23:456");
        assert_eq!(format_time(0), "0:00:000");
        assert_eq!(format_time(5_007), "0:05:007");
    }

    #[test]
    fn round_trips_valid_components() {
        for m in [0i64, 1, 9, 59, 61, 1234] {
            for s in [0i64, 1, 30, 59] {
                for ms in [0i64, 7, 99, 500, 999] {
                    let total = m * 60_000 + s * 1_000 + ms;
                    assert_eq!(parse_time(&format_time(total)), Ok(total));
                }
            }
        }
    }

    #[test]
    fn tolerates_leading_zeros_and_short_groups() {
        assert_eq!(parse_time("01:05:003"), Ok(65_003));
        assert_eq!(parse_time("1:5:3"), Ok(65_003));
        assert_eq!(parse_time("  0:59:999 "), Ok(59_999));
        assert_eq!(parse_time("120:00:000"), Ok(7_200_000));
    }

    #[test]
    fn rejects_wrong_group_count() {
        assert!(parse_time("1:23").is_err());
        assert!(parse_time("1:23:456:7").is_err());
        assert!(parse_time("").is_err());
        assert!(parse_time("83456").is_err());
    }

    #[test]
    fn rejects_out_of_range_components() {
        assert!(parse_time("1:60:000").is_err());
        assert!(parse_time("1:00:1000").is_err());
    }

    #[test]
    fn rejects_non_numeric_groups() {
        assert!(parse_time("a:23:456").is_err());
        assert!(parse_time("1:2x:456").is_err());
        assert!(parse_time("1::456").is_err());
        assert!(parse_time("-1:23:456").is_err());
        assert!(parse_time("+1:23:456").is_err());
        assert!(parse_time("99999999999999999999:00:000").is_err());
    }

    #[test]
    fn race_time_uses_the_codec() {
        let time: RaceTime = "2:03:045".parse().unwrap();
        assert_eq!(time.millis(), 123_045);
        assert_eq!(time.to_string(), "2:03:045");
    }
}
