use anyhow::{anyhow, Result};
use serenity::{
    framework::standard::macros::hook,
    model::{
        channel::Message,
        guild::Guild,
        id::{GuildId, RoleId},
    },
    prelude::*,
};

use crate::{
    db::{models::Server, queries},
    helpers::*,
};

#[derive(Debug, Copy, Clone, PartialEq, PartialOrd)]
pub enum Permission {
    None,
    Admin,
}

/// Admin rights belong to the guild owner, to members with the Administrator
/// permission and to holders of the configured admin role.
pub fn permission_level(
    server: Option<&Server>,
    is_owner: bool,
    is_administrator: bool,
    roles: &[RoleId],
) -> Permission {
    if is_owner || is_administrator {
        return Permission::Admin;
    }
    let admin_role = match server.and_then(|s| s.admin_role_id) {
        Some(r) => r,
        None => return Permission::None,
    };
    match roles.iter().any(|r| snowflake(r.0) == admin_role) {
        true => Permission::Admin,
        false => Permission::None,
    }
}

pub async fn check_permissions(ctx: &Context, msg: &Message, req: Permission) -> Result<()> {
    let guild: Guild = msg
        .guild(&ctx.cache)
        .ok_or_else(|| anyhow!("Guild missing from cache"))?;
    if guild.owner_id == msg.author.id {
        return Ok(());
    } // owner can do any command
    let member = msg.member(ctx).await?;
    let is_administrator = member
        .permissions(ctx)
        .map(|p| p.administrator())
        .unwrap_or(false);
    let server = get_server(ctx, guild.id).await;

    let user_permissions = permission_level(server.as_ref(), false, is_administrator, &member.roles);
    match user_permissions >= req {
        true => Ok(()),
        false => Err(anyhow!(
            "User \"{}\" does not have required permissions",
            &msg.author.name
        )),
    }
}

/// Upserts the server the message came from and caches its settings.
pub async fn add_server(ctx: &Context, msg: &Message) -> Result<Server> {
    let guild_id: GuildId = msg
        .guild_id
        .ok_or_else(|| anyhow!("Message was not sent in a server"))?;
    let name = guild_id
        .name(&ctx.cache)
        .unwrap_or_else(|| format!("server {}", guild_id.0));
    let default_prefix = get_config(ctx).await?.default_prefix.clone();

    let db = get_database(ctx).await?;
    let server_id = snowflake(guild_id.0);
    let server = with_db(db, move |db| -> Result<Server> {
        let conn = db.conn()?;
        Ok(queries::register_server(&conn, server_id, &name, &default_prefix)?)
    })
    .await?;
    info!("Registered server {} ({})", &server.name, server.server_id);
    cache_server(ctx, server.clone()).await;

    Ok(server)
}

/// Resolves a role from a mention, a role name or a raw id.
pub fn parse_role(guild: &Guild, msg: &Message, text: &str) -> Result<RoleId> {
    if let Some(role) = msg.mention_roles.first() {
        return Ok(*role);
    }
    if let Some(role) = guild.role_by_name(text) {
        return Ok(role.id);
    }
    match text.parse::<u64>() {
        Ok(id) if guild.roles.contains_key(&RoleId(id)) => Ok(RoleId(id)),
        _ => Err(anyhow!("There is no role \"{}\" on this server", text)),
    }
}

#[hook]
pub async fn dynamic_prefix(ctx: &Context, msg: &Message) -> Option<String> {
    let guild_id = msg.guild_id?;
    match get_server(ctx, guild_id).await {
        Some(server) => Some(server.prefix),
        None => get_config(ctx).await.ok().map(|c| c.default_prefix.clone()),
    }
}
