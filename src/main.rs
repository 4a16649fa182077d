#[macro_use]
extern crate diesel;
#[macro_use]
extern crate log;

mod config;
mod courses;
mod db;
mod discord;
mod error;
mod helpers;
mod race_time;
mod schema;
mod scoring;
mod tournaments;
mod validation;

use std::{collections::HashMap, fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use serenity::{framework::standard::StandardFramework, model::id::GuildId, prelude::*};

use crate::{
    config::{init_logging, BotConfig},
    courses::load_catalog,
    db::{queries, setup, Database},
    discord::{
        commands::{after_hook, before_hook, GENERAL_GROUP},
        intents,
        servers::dynamic_prefix,
        sweeper::Sweeper,
        Handler,
    },
    helpers::{ConfigContainer, DBPool, ServerContainer},
};

fn prepare_database(config: &BotConfig) -> Result<Database> {
    if let Some(dir) = Path::new(&config.database_url)
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
    {
        fs::create_dir_all(dir)
            .with_context(|| format!("Error creating database directory {}", dir.display()))?;
    }
    let db = Database::open(&config.database_url)?;
    let conn = db.conn()?;
    setup::run(&conn)?;
    let catalog = load_catalog(&config.courses_file)?;
    let seeded = setup::seed_courses(&conn, &catalog)?;
    if seeded > 0 {
        info!("Seeded {} courses", seeded);
    }

    Ok(db)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = BotConfig::from_env()?;
    init_logging(config.log_file.as_ref())?;

    let db = prepare_database(&config)?;
    let servers: HashMap<GuildId, _> = {
        let conn = db.conn()?;
        queries::get_servers(&conn)
            .context("Error loading servers")?
            .into_iter()
            .map(|s| (GuildId(s.server_id as u64), s))
            .collect()
    };
    info!("Loaded settings of {} server(s)", servers.len());

    let framework = StandardFramework::new()
        .configure(|c| {
            c.prefixes(Vec::<String>::new())
                .dynamic_prefix(dynamic_prefix)
                .with_whitespace(true)
                .case_insensitivity(true)
        })
        .before(before_hook)
        .after(after_hook)
        .group(&GENERAL_GROUP);

    let sweeper = Arc::new(Sweeper::new(
        config.sweep_interval_secs,
        config.reminder_days_before_end,
    ));
    let token = config.token.clone();
    let mut client = Client::builder(&token, intents())
        .event_handler(Handler { sweeper })
        .framework(framework)
        .type_map_insert::<DBPool>(db)
        .type_map_insert::<ServerContainer>(servers)
        .type_map_insert::<ConfigContainer>(Arc::new(config))
        .await
        .context("Error creating client")?;

    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}
