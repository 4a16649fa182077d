use std::{collections::HashMap, sync::Arc};

use anyhow::{anyhow, Result};
use serenity::{client::Context, model::id::GuildId, prelude::TypeMapKey};

use crate::{
    config::BotConfig,
    db::{models::Server, Database},
};

pub struct DBPool;

impl TypeMapKey for DBPool {
    type Value = Database;
}

pub struct ServerContainer;

// cached settings, refreshed by the before hook and by `config`
impl TypeMapKey for ServerContainer {
    type Value = HashMap<GuildId, Server>;
}

pub struct ConfigContainer;

impl TypeMapKey for ConfigContainer {
    type Value = Arc<BotConfig>;
}

#[inline]
pub async fn get_database(ctx: &Context) -> Result<Database> {
    let data = ctx.data.read().await;
    data.get::<DBPool>()
        .cloned()
        .ok_or_else(|| anyhow!("Expected database in ShareMap"))
}

#[inline]
pub async fn get_config(ctx: &Context) -> Result<Arc<BotConfig>> {
    let data = ctx.data.read().await;
    data.get::<ConfigContainer>()
        .cloned()
        .ok_or_else(|| anyhow!("Expected config in ShareMap"))
}

pub async fn get_server(ctx: &Context, guild_id: GuildId) -> Option<Server> {
    let data = ctx.data.read().await;
    data.get::<ServerContainer>()
        .and_then(|servers| servers.get(&guild_id).cloned())
}

pub async fn cache_server(ctx: &Context, server: Server) {
    let mut data = ctx.data.write().await;
    if let Some(servers) = data.get_mut::<ServerContainer>() {
        servers.insert(GuildId(server.server_id as u64), server);
    }
}

/// Runs blocking database work off the async executor.
pub async fn with_db<T, E, F>(db: Database, f: F) -> Result<T, E>
where
    F: FnOnce(&Database) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<anyhow::Error> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| E::from(anyhow!("Database task failed: {}", e)))?
}

#[inline]
pub fn snowflake(id: u64) -> i64 {
    id as i64
}
