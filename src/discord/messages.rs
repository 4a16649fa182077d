use anyhow::Result;
use chrono::{NaiveDateTime, Utc};
use rand::thread_rng;
use serenity::{
    builder::CreateEmbed,
    model::{
        channel::Message,
        id::{ChannelId, MessageId, UserId},
    },
    prelude::*,
    utils::MessageBuilder,
};

use crate::{
    courses::join_phrase,
    db::{
        models::{Score, ScoreEntry, ScoreStatus, TournamentDetails},
        queries,
    },
    error::TournamentError,
    helpers::*,
    race_time::format_time,
    scoring::Standing,
    tournaments::{self, Cancellation, FinishedTournament, Overview},
};

pub const SUCCESS: u32 = 0x2ECC71;
pub const ERROR: u32 = 0xE74C3C;
pub const INFO: u32 = 0x3498DB;
pub const WARNING: u32 = 0xF1C40F;

// embed descriptions are capped at 4096 characters
const DESCRIPTION_LIMIT: usize = 4000;
const THREAD_ARCHIVE_MINUTES: u16 = 10080;

fn status_mark(status: ScoreStatus) -> &'static str {
    match status {
        ScoreStatus::Pending => "⏳",
        ScoreStatus::Verified => "✅",
        ScoreStatus::Archived => "📦",
        ScoreStatus::Rejected => "❌",
    }
}

fn place(rank: usize) -> String {
    match rank {
        1 => "🥇".to_string(),
        2 => "🥈".to_string(),
        3 => "🥉".to_string(),
        n => format!("`{}.`", n),
    }
}

fn mention(discord_id: i64) -> String {
    UserId(discord_id as u64).mention().to_string()
}

// stop adding lines once the embed would overflow
fn capped(lines: impl Iterator<Item = String>) -> String {
    let mut text = String::new();
    for line in lines {
        if text.len() + line.len() + 1 > DESCRIPTION_LIMIT {
            text.push_str("…");
            break;
        }
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&line);
    }

    text
}

pub fn standings_lines(standings: &[Standing]) -> String {
    if standings.is_empty() {
        return "No time submitted yet.".to_string();
    }
    capped(standings.iter().map(|s| {
        format!(
            "{} **{}** - {} {}",
            place(s.rank),
            &s.entry.username,
            format_time(s.entry.time_ms),
            status_mark(s.entry.status)
        )
    }))
}

pub fn score_list_lines(scores: &[Score]) -> String {
    capped(scores.iter().enumerate().map(|(i, s)| {
        let proof = match &s.proof_url {
            Some(url) => format!(" [proof]({})", url),
            None => String::new(),
        };
        format!(
            "`{}.` {} - {} {}{}",
            i + 1,
            format_time(s.time_ms),
            s.status,
            status_mark(s.status),
            proof
        )
    }))
}

pub fn time_left(now: NaiveDateTime, end: NaiveDateTime) -> String {
    let left = end - now;
    if left.num_seconds() <= 0 {
        return "ended".to_string();
    }
    let days = left.num_days();
    let hours = left.num_hours() - days * 24;
    match days {
        0 => format!("{} hour(s)", hours.max(1)),
        _ => format!("{} day(s) and {} hour(s)", days, hours),
    }
}

fn course_embed<'a>(
    e: &'a mut CreateEmbed,
    details: &TournamentDetails,
    image_base: Option<&str>,
) -> &'a mut CreateEmbed {
    e.field("Course", &details.course.name, true)
        .field("Cup", &details.course.cup, true)
        .field("Class", details.tournament.vehicle_class, true)
        .field(
            "Ends",
            details.tournament.end_date.format("%d/%m/%Y %H:%M UTC"),
            true,
        );
    if let Some(url) = details.course.image_url(image_base) {
        e.thumbnail(url);
    }

    e
}

pub fn overview_embed<'a>(
    e: &'a mut CreateEmbed,
    overview: &Overview,
    image_base: Option<&str>,
) -> &'a mut CreateEmbed {
    let now = Utc::now().naive_utc();
    let title = match overview.tournament.tournament.is_active {
        true => format!("🏁 Tournament on {}", &overview.tournament.course.name),
        false => format!("🏁 Tournament on {} (closed)", &overview.tournament.course.name),
    };
    e.title(title)
        .colour(INFO)
        .description(standings_lines(&overview.standings));
    course_embed(e, &overview.tournament, image_base)
        .field("Participants", overview.participant_count, true)
        .field(
            "Time left",
            time_left(now, overview.tournament.tournament.end_date),
            true,
        )
}

pub async fn send_embed<F>(ctx: &Context, channel: ChannelId, f: F) -> Option<Message>
where
    F: FnOnce(&mut CreateEmbed) -> &mut CreateEmbed,
{
    match channel.send_message(&ctx, |m| m.embed(f)).await {
        Ok(m) => Some(m),
        Err(e) => {
            warn!("Error sending message to channel {}: {}", channel, e);
            None
        }
    }
}

pub async fn reply_success(ctx: &Context, msg: &Message, title: &str, text: &str) {
    send_embed(ctx, msg.channel_id, |e| {
        e.title(title).description(text).colour(SUCCESS)
    })
    .await;
}

pub async fn reply_info(ctx: &Context, msg: &Message, title: &str, text: &str) {
    send_embed(ctx, msg.channel_id, |e| {
        e.title(title).description(text).colour(INFO)
    })
    .await;
}

/// Tells the user what went wrong. Persistence failures are logged with their
/// details and shown as a generic retry message.
pub async fn reply_error(ctx: &Context, msg: &Message, command: &str, err: &TournamentError) {
    match err {
        TournamentError::Persistence(e) => error!(
            "Error running \"{}\" for user {} in channel {}: {:?}",
            command, msg.author.id, msg.channel_id, e
        ),
        _ => debug!("\"{}\" refused: {}", command, err),
    }
    let text = err.to_string();
    send_embed(ctx, msg.channel_id, |e| {
        e.title("❌ Error").description(text).colour(ERROR)
    })
    .await;
}

// the thread when there is one, the announcement channel otherwise
fn tournament_channel(details: &TournamentDetails) -> Option<ChannelId> {
    details
        .tournament
        .thread_id
        .or(details.tournament.channel_id)
        .map(|id| ChannelId(id as u64))
}

/// Posts and pins the announcement, opens the discussion thread and records
/// where everything lives. Each step is best-effort.
pub async fn announce_tournament(ctx: &Context, channel: ChannelId, details: &TournamentDetails) {
    let (db, config) = match (get_database(ctx).await, get_config(ctx).await) {
        (Ok(db), Ok(config)) => (db, config),
        _ => return,
    };
    let tournament_id = details.tournament.tournament_id;
    let overview = Overview {
        tournament: details.clone(),
        standings: Vec::new(),
        participant_count: 0,
    };
    let image_base = config.course_image_base_url.as_deref();

    let announcement = match send_embed(ctx, channel, |e| overview_embed(e, &overview, image_base)).await
    {
        Some(m) => m,
        None => return,
    };
    let (channel_id, message_id) = (snowflake(channel.0), snowflake(announcement.id.0));
    if let Err(e) = with_db(db.clone(), move |db| -> Result<()> {
        let conn = db.conn()?;
        Ok(queries::set_announcement(&conn, tournament_id, channel_id, message_id)?)
    })
    .await
    {
        error!("Error saving announcement of tournament {}: {:?}", tournament_id, e);
    }
    if let Err(e) = announcement.pin(ctx).await {
        warn!("Error pinning announcement of tournament {}: {}", tournament_id, e);
    }

    let thread = match channel
        .create_public_thread(ctx, announcement.id, |t| {
            t.name(format!(
                "{} - {}",
                &details.course.name, details.tournament.vehicle_class
            ))
            .auto_archive_duration(THREAD_ARCHIVE_MINUTES)
        })
        .await
    {
        Ok(t) => t,
        Err(e) => {
            warn!("Error creating thread for tournament {}: {}", tournament_id, e);
            return;
        }
    };
    let welcome = MessageBuilder::new()
        .push_bold_line("Welcome to the tournament thread!")
        .push("Submit your times with the ")
        .push_mono("score")
        .push(" command and an image of your run. Admins verify them, verified times rank ahead of pending ones.")
        .build();
    if let Err(e) = thread.id.say(ctx, welcome).await {
        warn!("Error welcoming in thread {}: {}", thread.id, e);
    }
    let leaderboard =
        send_embed(ctx, thread.id, |e| overview_embed(e, &overview, image_base)).await;

    let thread_id = snowflake(thread.id.0);
    let leaderboard_id = leaderboard.map(|m| snowflake(m.id.0));
    if let Err(e) = with_db(db, move |db| -> Result<()> {
        let conn = db.conn()?;
        Ok(queries::set_thread(&conn, tournament_id, thread_id, leaderboard_id)?)
    })
    .await
    {
        error!("Error saving thread of tournament {}: {:?}", tournament_id, e);
    }
}

/// Re-renders the announcement and the thread leaderboard of a tournament.
pub async fn refresh_leaderboard(ctx: &Context, tournament_id: i64) {
    let (db, config) = match (get_database(ctx).await, get_config(ctx).await) {
        (Ok(db), Ok(config)) => (db, config),
        _ => return,
    };
    let overview = match with_db(db, move |db| tournaments::tournament_overview(db, tournament_id)).await
    {
        Ok(Some(o)) => o,
        Ok(None) => return,
        Err(e) => {
            error!("Error loading leaderboard of tournament {}: {:?}", tournament_id, e);
            return;
        }
    };
    let image_base = config.course_image_base_url.as_deref();
    let t = &overview.tournament.tournament;

    let targets = [
        (t.channel_id, t.message_id),
        (t.thread_id, t.leaderboard_message_id),
    ];
    for (channel, message) in targets.iter() {
        let (channel, message) = match (channel, message) {
            (Some(c), Some(m)) => (ChannelId(*c as u64), MessageId(*m as u64)),
            _ => continue,
        };
        if let Err(e) = channel
            .edit_message(ctx, message, |m| {
                m.embed(|e| overview_embed(e, &overview, image_base))
            })
            .await
        {
            warn!(
                "Error refreshing leaderboard message {} of tournament {}: {}",
                message, tournament_id, e
            );
        }
    }
}

pub async fn announce_participant(
    ctx: &Context,
    details: &TournamentDetails,
    discord_id: i64,
    participant_count: i64,
) {
    let channel = match tournament_channel(details) {
        Some(c) => c,
        None => return,
    };
    let phrase = join_phrase(&mut thread_rng(), &mention(discord_id));
    let left = time_left(Utc::now().naive_utc(), details.tournament.end_date);
    send_embed(ctx, channel, |e| {
        e.title("🏎️ New participant!")
            .description(phrase)
            .colour(SUCCESS)
            .field("Time left", left, true)
            .field("Participants", participant_count, true)
    })
    .await;
}

pub async fn announce_record(
    ctx: &Context,
    details: &TournamentDetails,
    discord_id: i64,
    time_ms: i64,
    beaten: &ScoreEntry,
) {
    let channel = match tournament_channel(details) {
        Some(c) => c,
        None => return,
    };
    let text = format!(
        "{} sets a new best time of **{}**, beating {} ({}).",
        mention(discord_id),
        format_time(time_ms),
        mention(beaten.discord_id),
        format_time(beaten.time_ms)
    );
    send_embed(ctx, channel, |e| {
        e.title("🏆 New record!").description(text).colour(WARNING)
    })
    .await;
}

pub async fn announce_cancellation(ctx: &Context, fallback: ChannelId, cancellation: &Cancellation) {
    let channel = tournament_channel(&cancellation.tournament).unwrap_or(fallback);
    let mentions: Vec<String> = cancellation.participants.iter().map(|&p| mention(p)).collect();
    let text = format!(
        "The tournament on **{}** ({}) has been cancelled by an admin.",
        &cancellation.tournament.course.name, cancellation.tournament.tournament.vehicle_class
    );
    send_embed(ctx, channel, |e| {
        e.title("🛑 Tournament cancelled").description(text).colour(ERROR)
    })
    .await;
    if !mentions.is_empty() {
        if let Err(e) = channel.say(ctx, capped(mentions.into_iter())).await {
            warn!("Error notifying participants in {}: {}", channel, e);
        }
    }
}

pub async fn announce_reminder(ctx: &Context, details: &TournamentDetails, image_base: Option<&str>) {
    let channel = match tournament_channel(details) {
        Some(c) => c,
        None => return,
    };
    let left = time_left(Utc::now().naive_utc(), details.tournament.end_date);
    send_embed(ctx, channel, |e| {
        e.title("⏰ The tournament ends soon")
            .description(format!("Only {} left to post your best time!", left))
            .colour(WARNING);
        course_embed(e, details, image_base)
    })
    .await;
}

pub async fn announce_results(ctx: &Context, finished: &FinishedTournament, image_base: Option<&str>) {
    let details = &finished.tournament;
    // results go to the main channel so everyone sees them
    let channel = match details.tournament.channel_id.or(details.tournament.thread_id) {
        Some(c) => ChannelId(c as u64),
        None => {
            info!(
                "Tournament {} ended without an announcement channel",
                details.tournament.tournament_id
            );
            return;
        }
    };
    let winner = finished
        .standings
        .first()
        .map(|s| format!("Congratulations to {}!", mention(s.entry.discord_id)));
    let description = match winner {
        Some(w) => format!("{}\n\n{}", w, standings_lines(&finished.standings)),
        None => "Nobody posted a time this time around.".to_string(),
    };
    send_embed(ctx, channel, |e| {
        e.title(format!("🏁 Results: {}", &details.course.name))
            .description(description)
            .colour(SUCCESS)
            .field("Participants", finished.participant_count, true);
        course_embed(e, details, image_base)
    })
    .await;
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::db::testing::at;

    fn standing(rank: usize, name: &str, time_ms: i64, status: ScoreStatus) -> Standing {
        Standing {
            rank,
            entry: ScoreEntry {
                score_id: rank as i64,
                participation_id: rank as i64,
                user_id: rank as i64,
                discord_id: rank as i64,
                username: name.to_string(),
                time_ms,
                proof_url: None,
                submitted_at: at(2, 1),
                status,
            },
        }
    }

    #[test]
    fn standings_render_medals_and_status() {
        let lines = standings_lines(&[
            standing(1, "alpha", 83_456, ScoreStatus::Verified),
            standing(2, "beta", 90_000, ScoreStatus::Pending),
            standing(4, "delta", 95_000, ScoreStatus::Pending),
        ]);
        assert_eq!(
            lines,
            "🥇 **alpha** - 1:23:456 ✅\n🥈 **beta** - 1:30:000 ⏳\n`4.` **delta** - 1:35:000 ⏳"
        );
        assert_eq!(standings_lines(&[]), "No time submitted yet.");
    }

    #[test]
    fn score_lists_are_numbered_from_one() {
        let scores = vec![Score {
            score_id: 9,
            participation_id: 1,
            time_ms: 61_005,
            proof_url: Some("https://x/p.png".to_string()),
            submitted_at: at(2, 1),
            status: ScoreStatus::Archived,
        }];
        assert_eq!(
            score_list_lines(&scores),
            "`1.` 1:01:005 - archived 📦 [proof](https://x/p.png)"
        );
    }

    #[test]
    fn remaining_time() {
        let now = at(1, 12);
        assert_eq!(time_left(now, now + Duration::hours(50)), "2 day(s) and 2 hour(s)");
        assert_eq!(time_left(now, now + Duration::minutes(20)), "1 hour(s)");
        assert_eq!(time_left(now, now - Duration::hours(1)), "ended");
    }

    #[test]
    fn long_leaderboards_are_truncated() {
        let many: Vec<Standing> = (1..=500)
            .map(|i| standing(i, "a-rather-long-player-name", 60_000 + i as i64, ScoreStatus::Pending))
            .collect();
        let text = standings_lines(&many);
        assert!(text.len() <= DESCRIPTION_LIMIT + "…".len());
        assert!(text.ends_with('…'));
    }
}
