use std::convert::TryFrom;

use anyhow::{anyhow, Result};
use chrono::Utc;
use futures::join;
use rand::thread_rng;
use serenity::{
    framework::standard::{
        macros::{command, group, hook},
        Args, CommandError, CommandResult,
    },
    model::channel::{Message, ReactionType},
    prelude::*,
    utils::parse_username,
};

use crate::{
    courses::search_courses,
    db::{models::VehicleClass, queries},
    discord::{
        messages::{
            announce_cancellation, announce_participant, announce_record, announce_tournament,
            overview_embed, refresh_leaderboard, reply_error, reply_info, reply_success,
            score_list_lines, send_embed, INFO,
        },
        servers::{add_server, check_permissions, parse_role, Permission},
    },
    error::{TournamentError, ValidationError},
    helpers::*,
    race_time::format_time,
    scoring::ReviewAction,
    tournaments::{self, TournamentRequest},
    validation::{validate_prefix, validate_proof},
};

const REACT_COMMANDS: [&str; 1] = ["configure"];

#[hook]
pub async fn before_hook(ctx: &Context, msg: &Message, cmd_name: &str) -> bool {
    let guild_id = match msg.guild_id {
        Some(g) => g,
        None => return false,
    };
    info!("{} | {} | {}", cmd_name, guild_id, &msg.author.name);

    // first command seen from a server registers it
    if get_server(ctx, guild_id).await.is_none() {
        if let Err(e) = add_server(ctx, msg).await {
            error!("Error adding new server: {:?}", e);
            return false;
        }
    }

    true
}

#[hook]
pub async fn after_hook(
    ctx: &Context,
    msg: &Message,
    cmd_name: &str,
    error: Result<(), CommandError>,
) {
    let successful = match error {
        Ok(()) => true,
        Err(e) => {
            warn!(
                "Error running \"{}\" command from user \"{}\": {:?}",
                cmd_name, &msg.author.name, e
            );
            false
        }
    };
    if REACT_COMMANDS.iter().any(|&c| c == cmd_name) {
        let emoji = match successful {
            true => "👍",
            false => "👎",
        };
        if let Ok(reaction) = ReactionType::try_from(emoji) {
            if let Err(e) = msg.react(ctx, reaction).await {
                warn!(
                    "Error reacting to command \"{}\" from user \"{}\": {}",
                    cmd_name, &msg.author.name, e
                );
            }
        }
    }
}

#[group]
#[only_in(guilds)]
#[commands(tournament, join, cancel, score, myscores, scores, verify, info, configure, courses)]
struct General;

fn server_id(msg: &Message) -> Result<i64> {
    msg.guild_id
        .map(|g| snowflake(g.0))
        .ok_or_else(|| anyhow!("Command used outside of a server"))
}

async fn display_name(ctx: &Context, msg: &Message) -> String {
    msg.author_nick(ctx)
        .await
        .unwrap_or_else(|| msg.author.name.clone())
}

// user-facing refusals are answered and end the command normally, only
// persistence failures bubble up to the after hook
async fn refuse(ctx: &Context, msg: &Message, command: &str, err: TournamentError) -> CommandResult {
    reply_error(ctx, msg, command, &err).await;
    match err.is_persistence() {
        true => Err(err.into()),
        false => Ok(()),
    }
}

async fn require_admin(ctx: &Context, msg: &Message) -> Result<bool> {
    match check_permissions(ctx, msg, Permission::Admin).await {
        Ok(()) => Ok(true),
        Err(e) => {
            info!("{}", e);
            send_embed(ctx, msg.channel_id, |e| {
                e.title("❌ Error")
                    .description("This command is reserved to admins")
                    .colour(crate::discord::messages::ERROR)
            })
            .await;
            Ok(false)
        }
    }
}

#[command]
#[aliases("start", "create")]
#[description = "Starts a tournament: `tournament <150cc|200cc|mirror> [days] [course]`"]
pub async fn tournament(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    if !require_admin(ctx, msg).await? {
        return Ok(());
    }
    let config = get_config(ctx).await?;
    let vehicle_class = match args.single::<String>() {
        Ok(c) => match c.parse::<VehicleClass>() {
            Ok(v) => v,
            Err(e) => return refuse(ctx, msg, "tournament", e.into()).await,
        },
        Err(_) => {
            return refuse(ctx, msg, "tournament", ValidationError::VehicleClass(String::new()).into())
                .await
        }
    };
    let duration_days = match args.parse::<i64>() {
        Ok(d) => {
            args.advance();
            d
        }
        Err(_) => config.default_duration_days,
    };
    let request = TournamentRequest {
        server_id: server_id(msg)?,
        vehicle_class,
        duration_days,
        course_query: args.remains().map(|r| r.trim().to_string()),
    };

    let db = get_database(ctx).await?;
    let now = Utc::now().naive_utc();
    let created = with_db(db, move |db| {
        tournaments::create_tournament(db, &request, now, &mut thread_rng())
    })
    .await;
    match created {
        Ok(details) => {
            announce_tournament(ctx, msg.channel_id, &details).await;
            Ok(())
        }
        Err(e) => refuse(ctx, msg, "tournament", e).await,
    }
}

#[command]
#[description = "Joins the running tournament"]
pub async fn join(ctx: &Context, msg: &Message) -> CommandResult {
    let server_id = server_id(msg)?;
    let discord_id = snowflake(msg.author.id.0);
    let (db, username) = join!(get_database(ctx), display_name(ctx, msg));
    let db = db?;
    let now = Utc::now().naive_utc();

    let joined = with_db(db, move |db| {
        tournaments::join_tournament(db, server_id, discord_id, &username, now)
    })
    .await;
    let outcome = match joined {
        Ok(o) => o,
        Err(e) => return refuse(ctx, msg, "join", e).await,
    };
    if !outcome.newly_joined {
        reply_info(
            ctx,
            msg,
            "Already registered",
            &format!(
                "You are already taking part in the tournament on **{}**.",
                &outcome.tournament.course.name
            ),
        )
        .await;
        return Ok(());
    }
    reply_success(
        ctx,
        msg,
        "✅ Registered",
        &format!(
            "You are in! Course: **{}** ({}). Post your times with the `score` command.",
            &outcome.tournament.course.name, outcome.tournament.tournament.vehicle_class
        ),
    )
    .await;
    announce_participant(ctx, &outcome.tournament, discord_id, outcome.participant_count).await;

    Ok(())
}

#[command]
#[aliases("stop")]
#[description = "Cancels the running tournament"]
pub async fn cancel(ctx: &Context, msg: &Message) -> CommandResult {
    if !require_admin(ctx, msg).await? {
        return Ok(());
    }
    let server_id = server_id(msg)?;
    let db = get_database(ctx).await?;

    match with_db(db, move |db| tournaments::cancel_tournament(db, server_id)).await {
        Ok(cancellation) => {
            refresh_leaderboard(ctx, cancellation.tournament.tournament.tournament_id).await;
            announce_cancellation(ctx, msg.channel_id, &cancellation).await;
            Ok(())
        }
        Err(e) => refuse(ctx, msg, "cancel", e).await,
    }
}

#[command]
#[aliases("submit", "time")]
#[description = "Submits a time: `score <m:ss:SSS>` with an image of the run attached"]
pub async fn score(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let time_text = match args.single::<String>() {
        Ok(t) => t,
        Err(_) => {
            let err = ValidationError::Time(crate::error::TimeFormatError::new(""));
            return refuse(ctx, msg, "score", err.into()).await;
        }
    };

    // an attachment wins over a link given as second argument
    let proof = match msg.attachments.first() {
        Some(a) => Some(validate_proof(&a.url, a.content_type.as_deref()).map(str::to_string)),
        None => args
            .single::<String>()
            .ok()
            .map(|url| validate_proof(&url, None).map(str::to_string)),
    };
    let proof_url = match proof.transpose() {
        Ok(p) => p,
        Err(e) => return refuse(ctx, msg, "score", e.into()).await,
    };

    let server_id = server_id(msg)?;
    let discord_id = snowflake(msg.author.id.0);
    let (db, username) = join!(get_database(ctx), display_name(ctx, msg));
    let db = db?;
    let now = Utc::now().naive_utc();
    let submitted = with_db(db, move |db| {
        tournaments::submit_time(
            db,
            server_id,
            discord_id,
            &username,
            &time_text,
            proof_url.as_deref(),
            now,
        )
    })
    .await;
    let submission = match submitted {
        Ok(s) => s,
        Err(e) => return refuse(ctx, msg, "score", e).await,
    };

    reply_success(
        ctx,
        msg,
        "✅ Time submitted",
        &format!(
            "**{}** on {} is waiting for an admin to verify it.",
            format_time(submission.time_ms),
            &submission.tournament.course.name
        ),
    )
    .await;
    if submission.newly_joined {
        announce_participant(
            ctx,
            &submission.tournament,
            discord_id,
            submission.participant_count,
        )
        .await;
    }
    if let Some(beaten) = &submission.beaten {
        announce_record(
            ctx,
            &submission.tournament,
            discord_id,
            submission.time_ms,
            beaten,
        )
        .await;
    }
    refresh_leaderboard(ctx, submission.tournament.tournament.tournament_id).await;

    Ok(())
}

async fn list_scores(ctx: &Context, msg: &Message, discord_id: i64, title: String) -> CommandResult {
    let server_id = server_id(msg)?;
    let db = get_database(ctx).await?;
    let listed = with_db(db, move |db| {
        tournaments::player_scores(db, server_id, discord_id)
    })
    .await;
    match listed {
        Ok(player) => {
            let lines = score_list_lines(&player.scores);
            send_embed(ctx, msg.channel_id, |e| {
                e.title(title)
                    .description(lines)
                    .colour(INFO)
                    .footer(|f| f.text("Indexes are the ones used by the verify command"))
            })
            .await;
            Ok(())
        }
        Err(e) => refuse(ctx, msg, "scores", e).await,
    }
}

#[command]
#[description = "Lists your times in the running tournament"]
pub async fn myscores(ctx: &Context, msg: &Message) -> CommandResult {
    let title = format!("⏱️ Times of {}", display_name(ctx, msg).await);
    list_scores(ctx, msg, snowflake(msg.author.id.0), title).await
}

#[command]
#[description = "Lists the times of a player: `scores @player`"]
pub async fn scores(ctx: &Context, msg: &Message) -> CommandResult {
    if !require_admin(ctx, msg).await? {
        return Ok(());
    }
    let target = match msg.mentions.first() {
        Some(u) => u,
        None => {
            reply_info(ctx, msg, "Usage", "`scores @player`").await;
            return Ok(());
        }
    };
    let title = format!("⏱️ Times of {}", &target.name);
    list_scores(ctx, msg, snowflake(target.id.0), title).await
}

/// Action and 1-based index of a review, wherever the mention sits.
fn review_arguments(text: &str) -> Option<(ReviewAction, usize)> {
    let mut rest = text
        .split_whitespace()
        .filter(|t| parse_username(t).is_none());
    let action = match rest.next()?.to_lowercase().as_str() {
        "verify" => ReviewAction::Verify,
        "delete" | "reject" => ReviewAction::Reject,
        _ => return None,
    };
    let index = rest.next().and_then(|i| i.parse().ok()).unwrap_or(1);

    Some((action, index))
}

#[command]
#[aliases("review")]
#[description = "Reviews a time: `verify @player <verify|delete> [index]`"]
pub async fn verify(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    if !require_admin(ctx, msg).await? {
        return Ok(());
    }
    let target = match msg.mentions.first() {
        Some(u) => u.clone(),
        None => {
            reply_info(ctx, msg, "Usage", "`verify @player <verify|delete> [index]`").await;
            return Ok(());
        }
    };
    let (action, index) = match review_arguments(args.rest()) {
        Some(parsed) => parsed,
        None => {
            reply_info(ctx, msg, "Usage", "`verify @player <verify|delete> [index]`").await;
            return Ok(());
        }
    };

    let server_id = server_id(msg)?;
    let discord_id = snowflake(target.id.0);
    let db = get_database(ctx).await?;
    let reviewed = with_db(db, move |db| {
        tournaments::review_score(db, server_id, discord_id, action, index)
    })
    .await;
    let reviewed = match reviewed {
        Ok(r) => r,
        Err(e) => return refuse(ctx, msg, "verify", e).await,
    };

    let text = match reviewed.action {
        ReviewAction::Verify => format!(
            "**{}** of {} is verified. {} slower time(s) archived.",
            format_time(reviewed.score.time_ms),
            &target.name,
            reviewed.archived.len()
        ),
        ReviewAction::Reject => format!(
            "**{}** of {} is rejected.",
            format_time(reviewed.score.time_ms),
            &target.name
        ),
    };
    reply_success(ctx, msg, "✅ Time reviewed", &text).await;
    refresh_leaderboard(ctx, reviewed.tournament.tournament.tournament_id).await;

    Ok(())
}

#[command]
#[aliases("leaderboard", "lb")]
#[description = "Shows the running tournament and its leaderboard"]
pub async fn info(ctx: &Context, msg: &Message) -> CommandResult {
    let server_id = server_id(msg)?;
    let (db, config) = join!(get_database(ctx), get_config(ctx));
    let (db, config) = (db?, config?);

    match with_db(db, move |db| tournaments::overview(db, server_id)).await {
        Ok(overview) => {
            let image_base = config.course_image_base_url.as_deref();
            send_embed(ctx, msg.channel_id, |e| overview_embed(e, &overview, image_base)).await;
            Ok(())
        }
        Err(e) => refuse(ctx, msg, "info", e).await,
    }
}

#[command]
#[aliases("config")]
#[description = "Server settings: `config prefix <prefix>` or `config adminrole <role|none>`"]
pub async fn configure(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    if !require_admin(ctx, msg).await? {
        return Err(anyhow!("configure requires admin rights").into());
    }
    let server_id = server_id(msg)?;
    let setting = args.single::<String>().map(|s| s.to_lowercase()).unwrap_or_default();
    let value = args.remains().map(|v| v.trim().to_string()).unwrap_or_default();
    let db = get_database(ctx).await?;

    match setting.as_str() {
        "prefix" => {
            if let Err(e) = validate_prefix(&value) {
                reply_error(ctx, msg, "configure", &e.into()).await;
                return Err(anyhow!("invalid prefix \"{}\"", value).into());
            }
            let prefix = value.clone();
            with_db(db, move |db| -> Result<bool> {
                let conn = db.conn()?;
                Ok(queries::update_server_prefix(&conn, server_id, &prefix)?)
            })
            .await?;
            reply_success(ctx, msg, "⚙️ Settings", &format!("Prefix set to `{}`", value)).await;
        }
        "adminrole" | "role" => {
            let role_id = match value.to_lowercase().as_str() {
                "none" | "" => None,
                _ => {
                    let guild = msg
                        .guild(&ctx.cache)
                        .ok_or_else(|| anyhow!("Guild missing from cache"))?;
                    match parse_role(&guild, msg, &value) {
                        Ok(r) => Some(snowflake(r.0)),
                        Err(e) => {
                            reply_info(ctx, msg, "⚙️ Settings", &e.to_string()).await;
                            return Err(e.into());
                        }
                    }
                }
            };
            with_db(db, move |db| -> Result<bool> {
                let conn = db.conn()?;
                Ok(queries::update_admin_role(&conn, server_id, role_id)?)
            })
            .await?;
            let text = match role_id {
                Some(r) => format!("Admin role set to <@&{}>", r),
                None => "Admin role removed".to_string(),
            };
            reply_success(ctx, msg, "⚙️ Settings", &text).await;
        }
        _ => {
            reply_info(
                ctx,
                msg,
                "Usage",
                "`config prefix <prefix>` or `config adminrole <role|none>`",
            )
            .await;
            return Err(anyhow!("unknown setting \"{}\"", setting).into());
        }
    }

    // refresh the cached settings
    add_server(ctx, msg).await?;

    Ok(())
}

#[command]
#[aliases("tracks")]
#[description = "Lists the courses, optionally filtered: `courses [search]`"]
pub async fn courses(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let term = args.rest().trim().to_string();
    let db = get_database(ctx).await?;
    let catalog = with_db(db, move |db| -> Result<_> {
        let conn = db.conn()?;
        Ok(queries::all_courses(&conn)?)
    })
    .await?;

    let found = search_courses(&catalog, &term);
    let lines: Vec<String> = found
        .iter()
        .map(|c| format!("**{}** - {} ({})", &c.name, &c.cup, &c.origin))
        .collect();
    let description = match lines.is_empty() {
        true => format!("No course matches \"{}\"", term),
        false => lines.join("\n"),
    };
    send_embed(ctx, msg.channel_id, |e| {
        e.title(format!("🗺️ Courses ({})", found.len()))
            .description(description)
            .colour(INFO)
    })
    .await;

    Ok(())
}
