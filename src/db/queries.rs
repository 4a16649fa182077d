use chrono::NaiveDateTime;
use diesel::{
    dsl::exists,
    insert_or_ignore_into,
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
    sqlite::SqliteConnection,
};

use crate::{
    db::{last_insert_rowid, models::*},
    schema::{course, participation, score, server, tournament, user},
};

#[inline]
fn last_insert_id(conn: &SqliteConnection) -> QueryResult<i64> {
    diesel::select(last_insert_rowid).get_result::<i64>(conn)
}

// servers

/// Inserts the server on first sight and refreshes its display name after.
pub fn register_server(
    conn: &SqliteConnection,
    id: i64,
    name: &str,
    default_prefix: &str,
) -> QueryResult<Server> {
    conn.transaction(|| {
        let new_server = NewServer {
            server_id: id,
            name,
            prefix: default_prefix,
        };
        insert_or_ignore_into(server::table)
            .values(&new_server)
            .execute(conn)?;
        diesel::update(server::table.find(id))
            .set(server::name.eq(name))
            .execute(conn)?;

        server::table.find(id).first(conn)
    })
}

pub fn get_servers(conn: &SqliteConnection) -> QueryResult<Vec<Server>> {
    server::table.load(conn)
}

pub fn update_server_prefix(conn: &SqliteConnection, id: i64, prefix: &str) -> QueryResult<bool> {
    let updated = diesel::update(server::table.find(id))
        .set(server::prefix.eq(prefix))
        .execute(conn)?;

    Ok(updated == 1)
}

pub fn update_admin_role(
    conn: &SqliteConnection,
    id: i64,
    role_id: Option<i64>,
) -> QueryResult<bool> {
    let updated = diesel::update(server::table.find(id))
        .set(server::admin_role_id.eq(role_id))
        .execute(conn)?;

    Ok(updated == 1)
}

// users

/// Upserts on the discord id, refreshing the display name. Returns the
/// internal user id.
pub fn register_user(conn: &SqliteConnection, discord_id: i64, username: &str) -> QueryResult<i64> {
    conn.transaction(|| {
        let existing = user::table
            .filter(user::discord_id.eq(discord_id))
            .select(user::user_id)
            .first::<i64>(conn)
            .optional()?;
        match existing {
            Some(id) => {
                diesel::update(user::table.find(id))
                    .set(user::username.eq(username))
                    .execute(conn)?;
                Ok(id)
            }
            None => {
                diesel::insert_into(user::table)
                    .values(&NewUser {
                        discord_id,
                        username,
                    })
                    .execute(conn)?;
                last_insert_id(conn)
            }
        }
    })
}

pub fn find_user(conn: &SqliteConnection, discord_id: i64) -> QueryResult<Option<User>> {
    user::table
        .filter(user::discord_id.eq(discord_id))
        .first(conn)
        .optional()
}

// courses

pub fn all_courses(conn: &SqliteConnection) -> QueryResult<Vec<Course>> {
    course::table.order(course::course_id.asc()).load(conn)
}

pub fn course_count(conn: &SqliteConnection) -> QueryResult<i64> {
    course::table.count().get_result(conn)
}

// tournaments

/// Inserts a tournament unless the server already has an active one, in which
/// case `None` comes back. The partial unique index on active tournaments
/// settles a race between two creators the same way.
pub fn create_tournament(
    conn: &SqliteConnection,
    new_tournament: &NewTournament,
) -> QueryResult<Option<i64>> {
    let created = conn.transaction(|| {
        let active: bool = diesel::select(exists(
            tournament::table
                .filter(tournament::server_id.eq(new_tournament.server_id))
                .filter(tournament::is_active.eq(true)),
        ))
        .get_result(conn)?;
        if active {
            return Ok(None);
        }
        diesel::insert_into(tournament::table)
            .values(new_tournament)
            .execute(conn)?;

        last_insert_id(conn).map(Some)
    });

    match created {
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => Ok(None),
        other => other,
    }
}

pub fn tournament_details(
    conn: &SqliteConnection,
    tournament_id: i64,
) -> QueryResult<Option<TournamentDetails>> {
    let details = tournament::table
        .inner_join(course::table)
        .filter(tournament::tournament_id.eq(tournament_id))
        .first::<(Tournament, Course)>(conn)
        .optional()?;

    Ok(details.map(TournamentDetails::from))
}

pub fn active_tournament(
    conn: &SqliteConnection,
    server_id: i64,
) -> QueryResult<Option<TournamentDetails>> {
    let details = tournament::table
        .inner_join(course::table)
        .filter(tournament::server_id.eq(server_id))
        .filter(tournament::is_active.eq(true))
        .first::<(Tournament, Course)>(conn)
        .optional()?;

    Ok(details.map(TournamentDetails::from))
}

/// Active tournaments whose end date is strictly before `now`.
pub fn expired_tournaments(
    conn: &SqliteConnection,
    now: NaiveDateTime,
) -> QueryResult<Vec<TournamentDetails>> {
    let rows = tournament::table
        .inner_join(course::table)
        .filter(tournament::is_active.eq(true))
        .filter(tournament::end_date.lt(now))
        .order(tournament::end_date.asc())
        .load::<(Tournament, Course)>(conn)?;

    Ok(rows.into_iter().map(TournamentDetails::from).collect())
}

/// Active tournaments ending within `[now, horizon]` that were never reminded.
pub fn reminder_candidates(
    conn: &SqliteConnection,
    now: NaiveDateTime,
    horizon: NaiveDateTime,
) -> QueryResult<Vec<TournamentDetails>> {
    let rows = tournament::table
        .inner_join(course::table)
        .filter(tournament::is_active.eq(true))
        .filter(tournament::reminder_sent_at.is_null())
        .filter(tournament::end_date.ge(now))
        .filter(tournament::end_date.le(horizon))
        .load::<(Tournament, Course)>(conn)?;

    Ok(rows.into_iter().map(TournamentDetails::from).collect())
}

pub fn mark_reminder_sent(
    conn: &SqliteConnection,
    tournament_id: i64,
    now: NaiveDateTime,
) -> QueryResult<bool> {
    let updated = diesel::update(
        tournament::table
            .filter(tournament::tournament_id.eq(tournament_id))
            .filter(tournament::reminder_sent_at.is_null()),
    )
    .set(tournament::reminder_sent_at.eq(Some(now)))
    .execute(conn)?;

    Ok(updated == 1)
}

/// Flips `is_active` off. Returns false when the tournament was not active,
/// so running this twice only deactivates once.
pub fn deactivate_tournament(conn: &SqliteConnection, tournament_id: i64) -> QueryResult<bool> {
    let updated = diesel::update(
        tournament::table
            .filter(tournament::tournament_id.eq(tournament_id))
            .filter(tournament::is_active.eq(true)),
    )
    .set(tournament::is_active.eq(false))
    .execute(conn)?;

    Ok(updated == 1)
}

pub fn set_announcement(
    conn: &SqliteConnection,
    tournament_id: i64,
    channel_id: i64,
    message_id: i64,
) -> QueryResult<()> {
    diesel::update(tournament::table.find(tournament_id))
        .set((
            tournament::channel_id.eq(Some(channel_id)),
            tournament::message_id.eq(Some(message_id)),
        ))
        .execute(conn)?;

    Ok(())
}

pub fn set_thread(
    conn: &SqliteConnection,
    tournament_id: i64,
    thread_id: i64,
    leaderboard_message_id: Option<i64>,
) -> QueryResult<()> {
    diesel::update(tournament::table.find(tournament_id))
        .set((
            tournament::thread_id.eq(Some(thread_id)),
            tournament::leaderboard_message_id.eq(leaderboard_message_id),
        ))
        .execute(conn)?;

    Ok(())
}

pub fn set_leaderboard_message(
    conn: &SqliteConnection,
    tournament_id: i64,
    message_id: i64,
) -> QueryResult<()> {
    diesel::update(tournament::table.find(tournament_id))
        .set(tournament::leaderboard_message_id.eq(Some(message_id)))
        .execute(conn)?;

    Ok(())
}

// participations

/// Idempotent join: returns the participation id and whether it was created by
/// this call.
pub fn get_or_create_participation(
    conn: &SqliteConnection,
    tournament_id: i64,
    user_id: i64,
    now: NaiveDateTime,
) -> QueryResult<(i64, bool)> {
    conn.transaction(|| {
        let inserted = insert_or_ignore_into(participation::table)
            .values(&NewParticipation {
                tournament_id,
                user_id,
                join_date: now,
            })
            .execute(conn)?;
        let id = participation::table
            .filter(participation::tournament_id.eq(tournament_id))
            .filter(participation::user_id.eq(user_id))
            .select(participation::participation_id)
            .first::<i64>(conn)?;

        Ok((id, inserted == 1))
    })
}

pub fn find_participation(
    conn: &SqliteConnection,
    tournament_id: i64,
    user_id: i64,
) -> QueryResult<Option<i64>> {
    participation::table
        .filter(participation::tournament_id.eq(tournament_id))
        .filter(participation::user_id.eq(user_id))
        .select(participation::participation_id)
        .first::<i64>(conn)
        .optional()
}

pub fn participant_count(conn: &SqliteConnection, tournament_id: i64) -> QueryResult<i64> {
    participation::table
        .filter(participation::tournament_id.eq(tournament_id))
        .count()
        .get_result(conn)
}

pub fn participant_discord_ids(
    conn: &SqliteConnection,
    tournament_id: i64,
) -> QueryResult<Vec<i64>> {
    participation::table
        .inner_join(user::table)
        .filter(participation::tournament_id.eq(tournament_id))
        .select(user::discord_id)
        .order(participation::join_date.asc())
        .load(conn)
}

// scores

/// New scores always start out pending.
pub fn insert_score(
    conn: &SqliteConnection,
    participation_id: i64,
    time_ms: i64,
    proof_url: Option<&str>,
    now: NaiveDateTime,
) -> QueryResult<i64> {
    conn.transaction(|| {
        diesel::insert_into(score::table)
            .values(&NewScore {
                participation_id,
                time_ms,
                proof_url,
                submitted_at: now,
                status_id: ScoreStatus::Pending,
            })
            .execute(conn)?;

        last_insert_id(conn)
    })
}

pub fn find_score(conn: &SqliteConnection, score_id: i64) -> QueryResult<Option<Score>> {
    score::table.find(score_id).first(conn).optional()
}

/// Every score of a participation, fastest first.
pub fn participation_scores(
    conn: &SqliteConnection,
    participation_id: i64,
) -> QueryResult<Vec<Score>> {
    score::table
        .filter(score::participation_id.eq(participation_id))
        .order((
            score::time_ms.asc(),
            score::submitted_at.asc(),
            score::score_id.asc(),
        ))
        .load(conn)
}

pub fn set_score_status(
    conn: &SqliteConnection,
    score_id: i64,
    status: ScoreStatus,
) -> QueryResult<bool> {
    let updated = diesel::update(score::table.find(score_id))
        .set(score::status_id.eq(status))
        .execute(conn)?;

    Ok(updated == 1)
}

pub fn set_scores_status(
    conn: &SqliteConnection,
    score_ids: &[i64],
    status: ScoreStatus,
) -> QueryResult<usize> {
    if score_ids.is_empty() {
        return Ok(0);
    }
    diesel::update(score::table.filter(score::score_id.eq_any(score_ids.to_vec())))
        .set(score::status_id.eq(status))
        .execute(conn)
}

/// Every score submitted in a tournament with its submitter, fastest first.
/// Which of them count is decided by the scoring module.
pub fn tournament_entries(
    conn: &SqliteConnection,
    tournament_id: i64,
) -> QueryResult<Vec<ScoreEntry>> {
    score::table
        .inner_join(participation::table.inner_join(user::table))
        .filter(participation::tournament_id.eq(tournament_id))
        .select((
            score::score_id,
            participation::participation_id,
            user::user_id,
            user::discord_id,
            user::username,
            score::time_ms,
            score::proof_url,
            score::submitted_at,
            score::status_id,
        ))
        .order((score::time_ms.asc(), score::submitted_at.asc()))
        .load(conn)
}
