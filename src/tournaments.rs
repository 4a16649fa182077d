use anyhow::anyhow;
use chrono::{Duration, NaiveDateTime};
use diesel::{sqlite::SqliteConnection, Connection};
use rand::Rng;

use crate::{
    courses::{find_course, random_course},
    db::{
        models::{NewTournament, Score, ScoreEntry, TournamentDetails, VehicleClass},
        queries, Database,
    },
    error::TournamentError,
    race_time::parse_time,
    scoring::{self, ReviewAction, Standing},
    validation::validate_duration,
};

pub type TournamentResult<T> = Result<T, TournamentError>;

#[derive(Debug, Clone)]
pub struct TournamentRequest {
    pub server_id: i64,
    pub vehicle_class: VehicleClass,
    pub duration_days: i64,
    /// Picked at random when absent.
    pub course_query: Option<String>,
}

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub tournament: TournamentDetails,
    pub participation_id: i64,
    pub newly_joined: bool,
    pub participant_count: i64,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub tournament: TournamentDetails,
    pub score_id: i64,
    pub time_ms: i64,
    /// Set when the player joined through this submission.
    pub newly_joined: bool,
    pub participant_count: i64,
    /// The best time this submission beat, when it is a new record.
    pub beaten: Option<ScoreEntry>,
}

impl Submission {
    pub fn is_record(&self) -> bool {
        self.beaten.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct PlayerScores {
    pub tournament: TournamentDetails,
    /// Fastest first. Review indexes are 1-based positions in this list.
    pub scores: Vec<Score>,
}

#[derive(Debug, Clone)]
pub struct Reviewed {
    pub tournament: TournamentDetails,
    pub score: Score,
    pub action: ReviewAction,
    pub archived: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct Overview {
    pub tournament: TournamentDetails,
    pub standings: Vec<Standing>,
    pub participant_count: i64,
}

#[derive(Debug, Clone)]
pub struct Cancellation {
    pub tournament: TournamentDetails,
    pub participants: Vec<i64>,
}

/// Final state of a tournament closed by the expiry sweep.
#[derive(Debug, Clone)]
pub struct FinishedTournament {
    pub tournament: TournamentDetails,
    pub standings: Vec<Standing>,
    pub participant_count: i64,
}

fn require_active(conn: &SqliteConnection, server_id: i64) -> TournamentResult<TournamentDetails> {
    queries::active_tournament(conn, server_id)?.ok_or(TournamentError::NoActiveTournament)
}

fn already_active(details: TournamentDetails) -> TournamentError {
    TournamentError::AlreadyActive {
        course_name: details.course.name,
        end_date: details.tournament.end_date,
    }
}

/// Starts a tournament on a named or random course. Refused while another
/// tournament of the server is active.
pub fn create_tournament<R: Rng + ?Sized>(
    db: &Database,
    request: &TournamentRequest,
    now: NaiveDateTime,
    rng: &mut R,
) -> TournamentResult<TournamentDetails> {
    let days = validate_duration(request.duration_days)?;
    let conn = db.conn()?;

    conn.transaction::<_, TournamentError, _>(|| {
        if let Some(existing) = queries::active_tournament(&conn, request.server_id)? {
            return Err(already_active(existing));
        }

        let courses = queries::all_courses(&conn)?;
        let course = match request.course_query.as_deref() {
            Some(query) => find_course(&courses, query)
                .ok_or_else(|| TournamentError::CourseNotFound(query.to_string()))?,
            None => random_course(&courses, rng).ok_or(TournamentError::NoCourses)?,
        };

        let new_tournament = NewTournament {
            server_id: request.server_id,
            course_id: course.course_id,
            vehicle_class: request.vehicle_class,
            start_date: now,
            end_date: now + Duration::days(days),
            is_active: true,
        };
        let tournament_id = match queries::create_tournament(&conn, &new_tournament)? {
            Some(id) => id,
            None => {
                return Err(match queries::active_tournament(&conn, request.server_id)? {
                    Some(existing) => already_active(existing),
                    None => TournamentError::NoActiveTournament,
                })
            }
        };
        info!(
            "Created tournament {} on server {}: {} {}",
            tournament_id, request.server_id, &course.name, request.vehicle_class
        );

        queries::tournament_details(&conn, tournament_id)?.ok_or_else(|| {
            anyhow!("Tournament {} missing right after insert", tournament_id).into()
        })
    })
}

/// Registers the player in the active tournament. Joining again is not an
/// error, `newly_joined` tells the two cases apart.
pub fn join_tournament(
    db: &Database,
    server_id: i64,
    discord_id: i64,
    username: &str,
    now: NaiveDateTime,
) -> TournamentResult<JoinOutcome> {
    let conn = db.conn()?;

    conn.transaction::<_, TournamentError, _>(|| {
        let tournament = require_active(&conn, server_id)?;
        let user_id = queries::register_user(&conn, discord_id, username)?;
        let (participation_id, newly_joined) = queries::get_or_create_participation(
            &conn,
            tournament.tournament.tournament_id,
            user_id,
            now,
        )?;
        let participant_count =
            queries::participant_count(&conn, tournament.tournament.tournament_id)?;

        Ok(JoinOutcome {
            tournament,
            participation_id,
            newly_joined,
            participant_count,
        })
    })
}

/// Records a pending time for the player, joining them implicitly. The time
/// is checked before anything is written.
pub fn submit_time(
    db: &Database,
    server_id: i64,
    discord_id: i64,
    username: &str,
    time_text: &str,
    proof_url: Option<&str>,
    now: NaiveDateTime,
) -> TournamentResult<Submission> {
    let time_ms = parse_time(time_text).map_err(crate::error::ValidationError::from)?;
    let conn = db.conn()?;

    conn.transaction::<_, TournamentError, _>(|| {
        let tournament = require_active(&conn, server_id)?;
        let tournament_id = tournament.tournament.tournament_id;
        let user_id = queries::register_user(&conn, discord_id, username)?;
        let (participation_id, newly_joined) =
            queries::get_or_create_participation(&conn, tournament_id, user_id, now)?;

        let entries = queries::tournament_entries(&conn, tournament_id)?;
        let previous_best = scoring::best_representative(&entries);
        let score_id = queries::insert_score(&conn, participation_id, time_ms, proof_url, now)?;
        let beaten = previous_best.filter(|best| scoring::is_record(Some(best), user_id, time_ms));
        let participant_count = queries::participant_count(&conn, tournament_id)?;

        Ok(Submission {
            tournament,
            score_id,
            time_ms,
            newly_joined,
            participant_count,
            beaten,
        })
    })
}

fn scores_of(
    conn: &SqliteConnection,
    tournament: &TournamentDetails,
    discord_id: i64,
) -> TournamentResult<Vec<Score>> {
    let user = queries::find_user(conn, discord_id)?.ok_or(TournamentError::NotParticipating)?;
    let participation_id =
        queries::find_participation(conn, tournament.tournament.tournament_id, user.user_id)?
            .ok_or(TournamentError::NotParticipating)?;

    Ok(queries::participation_scores(conn, participation_id)?)
}

/// All of a player's times in the active tournament, whatever their status.
pub fn player_scores(
    db: &Database,
    server_id: i64,
    discord_id: i64,
) -> TournamentResult<PlayerScores> {
    let conn = db.conn()?;
    let tournament = require_active(&conn, server_id)?;
    let scores = scores_of(&conn, &tournament, discord_id)?;
    if scores.is_empty() {
        return Err(TournamentError::NoScores);
    }

    Ok(PlayerScores { tournament, scores })
}

/// Verifies or rejects the `index`-th fastest time (1-based) of a player.
pub fn review_score(
    db: &Database,
    server_id: i64,
    discord_id: i64,
    action: ReviewAction,
    index: usize,
) -> TournamentResult<Reviewed> {
    let conn = db.conn()?;

    conn.transaction::<_, TournamentError, _>(|| {
        let tournament = require_active(&conn, server_id)?;
        let scores = scores_of(&conn, &tournament, discord_id)?;
        if scores.is_empty() {
            return Err(TournamentError::NoScores);
        }
        let out_of_range = TournamentError::ScoreIndexOutOfRange {
            index,
            count: scores.len(),
        };
        let score = match index.checked_sub(1).and_then(|i| scores.get(i)) {
            Some(s) => s.clone(),
            None => return Err(out_of_range),
        };

        let archived = scoring::review(&conn, score.score_id, action)?.ok_or(out_of_range)?;
        info!(
            "{:?} score {} ({} ms) of user {} in tournament {}",
            action, score.score_id, score.time_ms, discord_id, tournament.tournament.tournament_id
        );

        Ok(Reviewed {
            tournament,
            score,
            action,
            archived,
        })
    })
}

/// The active tournament with its current leaderboard.
pub fn overview(db: &Database, server_id: i64) -> TournamentResult<Overview> {
    let conn = db.conn()?;
    let tournament = require_active(&conn, server_id)?;
    let standings = scoring::standings(&conn, tournament.tournament.tournament_id)?;
    let participant_count = queries::participant_count(&conn, tournament.tournament.tournament_id)?;

    Ok(Overview {
        tournament,
        standings,
        participant_count,
    })
}

/// Leaderboard of a tournament by id, active or not.
pub fn tournament_overview(db: &Database, tournament_id: i64) -> TournamentResult<Option<Overview>> {
    let conn = db.conn()?;
    let tournament = match queries::tournament_details(&conn, tournament_id)? {
        Some(t) => t,
        None => return Ok(None),
    };
    let standings = scoring::standings(&conn, tournament_id)?;
    let participant_count = queries::participant_count(&conn, tournament_id)?;

    Ok(Some(Overview {
        tournament,
        standings,
        participant_count,
    }))
}

/// Ends the active tournament right away. Scores are kept as they are.
pub fn cancel_tournament(db: &Database, server_id: i64) -> TournamentResult<Cancellation> {
    let conn = db.conn()?;

    conn.transaction::<_, TournamentError, _>(|| {
        let tournament = require_active(&conn, server_id)?;
        let tournament_id = tournament.tournament.tournament_id;
        if !queries::deactivate_tournament(&conn, tournament_id)? {
            return Err(TournamentError::NoActiveTournament);
        }
        let participants = queries::participant_discord_ids(&conn, tournament_id)?;
        info!("Cancelled tournament {} on server {}", tournament_id, server_id);

        Ok(Cancellation {
            tournament,
            participants,
        })
    })
}

/// Closes every active tournament whose end date has passed and returns their
/// final standings. A tournament is only ever returned once.
pub fn expire_tournaments(
    db: &Database,
    now: NaiveDateTime,
) -> TournamentResult<Vec<FinishedTournament>> {
    let conn = db.conn()?;
    let expired = queries::expired_tournaments(&conn, now)?;
    let mut finished = Vec::with_capacity(expired.len());

    for details in expired {
        let tournament_id = details.tournament.tournament_id;
        let closed = conn.transaction::<_, TournamentError, _>(|| {
            let standings = scoring::standings(&conn, tournament_id)?;
            let participant_count = queries::participant_count(&conn, tournament_id)?;
            if !queries::deactivate_tournament(&conn, tournament_id)? {
                return Ok(None);
            }
            Ok(Some((standings, participant_count)))
        });
        match closed {
            Ok(Some((standings, participant_count))) => {
                info!(
                    "Tournament {} on server {} ended with {} ranked player(s)",
                    tournament_id,
                    details.tournament.server_id,
                    standings.len()
                );
                finished.push(FinishedTournament {
                    tournament: details,
                    standings,
                    participant_count,
                });
            }
            Ok(None) => (),
            Err(e) => error!("Error closing tournament {}: {:?}", tournament_id, e),
        }
    }

    Ok(finished)
}

/// Active tournaments ending within `days_before` days that still need their
/// reminder. Each one is claimed so it is returned only once. Tournaments no
/// longer than the window get none.
pub fn due_reminders(
    db: &Database,
    now: NaiveDateTime,
    days_before: i64,
) -> TournamentResult<Vec<TournamentDetails>> {
    let conn = db.conn()?;
    let window = Duration::days(days_before);

    conn.transaction::<_, TournamentError, _>(|| {
        let candidates = queries::reminder_candidates(&conn, now, now + window)?;
        let mut due = Vec::with_capacity(candidates.len());
        for details in candidates {
            let t = &details.tournament;
            if t.end_date - t.start_date <= window {
                continue;
            }
            if queries::mark_reminder_sent(&conn, details.tournament.tournament_id, now)? {
                due.push(details);
            }
        }

        Ok(due)
    })
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::db::{
        models::ScoreStatus,
        testing::{self, at, SERVER},
    };

    fn request(course: Option<&str>) -> TournamentRequest {
        TournamentRequest {
            server_id: SERVER,
            vehicle_class: VehicleClass::Cc200,
            duration_days: 7,
            course_query: course.map(str::to_string),
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn started(db: &Database) -> TournamentDetails {
        create_tournament(db, &request(Some("rainbow road")), at(1, 12), &mut rng()).unwrap()
    }

    #[test]
    fn creates_with_named_course_and_end_date() {
        let db = testing::database();
        let details = started(&db);
        assert_eq!(details.course.name, "Rainbow Road");
        assert_eq!(details.tournament.vehicle_class, VehicleClass::Cc200);
        assert_eq!(details.tournament.end_date, at(8, 12));
        assert!(details.tournament.is_active);
    }

    #[test]
    fn random_course_comes_from_the_catalog() {
        let db = testing::database();
        let details = create_tournament(&db, &request(None), at(1, 12), &mut rng()).unwrap();
        assert!((1..=5).contains(&details.course.course_id));
    }

    #[test]
    fn second_creation_fails_and_keeps_the_first() {
        let db = testing::database();
        let first = started(&db);
        let err = create_tournament(&db, &request(Some("water park")), at(2, 12), &mut rng())
            .unwrap_err();
        match err {
            TournamentError::AlreadyActive {
                course_name,
                end_date,
            } => {
                assert_eq!(course_name, "Rainbow Road");
                assert_eq!(end_date, at(8, 12));
            }
            other => panic!("unexpected error {:?}", other),
        }
        let current = overview(&db, SERVER).unwrap();
        assert_eq!(current.tournament, first);
    }

    #[test]
    fn invalid_requests_write_nothing() {
        let db = testing::database();
        let mut bad = request(None);
        bad.duration_days = 91;
        assert!(matches!(
            create_tournament(&db, &bad, at(1, 12), &mut rng()),
            Err(TournamentError::Invalid(_))
        ));
        assert!(matches!(
            create_tournament(&db, &request(Some("moo moo")), at(1, 12), &mut rng()),
            Err(TournamentError::CourseNotFound(_))
        ));
        assert!(matches!(
            overview(&db, SERVER),
            Err(TournamentError::NoActiveTournament)
        ));
    }

    #[test]
    fn joining_twice_is_idempotent() {
        let db = testing::database();
        started(&db);
        let first = join_tournament(&db, SERVER, 10, "ten", at(1, 13)).unwrap();
        let second = join_tournament(&db, SERVER, 10, "ten", at(1, 14)).unwrap();
        assert!(first.newly_joined);
        assert!(!second.newly_joined);
        assert_eq!(first.participation_id, second.participation_id);
        assert_eq!(second.participant_count, 1);
    }

    #[test]
    fn join_without_tournament() {
        let db = testing::database();
        assert!(matches!(
            join_tournament(&db, SERVER, 10, "ten", at(1, 13)),
            Err(TournamentError::NoActiveTournament)
        ));
    }

    #[test]
    fn submission_joins_implicitly_and_flags_records() {
        let db = testing::database();
        started(&db);

        let first = submit_time(&db, SERVER, 1, "one", "1:00:000", None, at(1, 13)).unwrap();
        assert!(first.newly_joined);
        assert!(!first.is_record());

        // same holder improving is not a record
        let improved = submit_time(&db, SERVER, 1, "one", "0:59:000", None, at(1, 14)).unwrap();
        assert!(!improved.newly_joined);
        assert!(!improved.is_record());

        let slower = submit_time(&db, SERVER, 2, "two", "1:10:000", None, at(1, 15)).unwrap();
        assert!(!slower.is_record());
        assert_eq!(slower.participant_count, 2);

        let record = submit_time(&db, SERVER, 2, "two", "0:58:500", None, at(1, 16)).unwrap();
        assert!(record.is_record());
        let beaten = record.beaten.unwrap();
        assert_eq!((beaten.discord_id, beaten.time_ms), (1, 59_000));
    }

    #[test]
    fn malformed_time_is_refused_before_storage() {
        let db = testing::database();
        started(&db);
        assert!(matches!(
            submit_time(&db, SERVER, 1, "one", "1:60:000", None, at(1, 13)),
            Err(TournamentError::Invalid(_))
        ));
        assert!(matches!(
            player_scores(&db, SERVER, 1),
            Err(TournamentError::NotParticipating)
        ));
    }

    #[test]
    fn review_by_index_targets_sorted_scores() {
        let db = testing::database();
        started(&db);
        for (hour, time) in [(13, "0:05:000"), (14, "0:03:000"), (15, "0:07:000")] {
            submit_time(&db, SERVER, 1, "one", time, Some("https://x/p.png"), at(1, hour)).unwrap();
        }

        let reviewed = review_score(&db, SERVER, 1, ReviewAction::Verify, 1).unwrap();
        assert_eq!(reviewed.score.time_ms, 3_000);
        assert_eq!(reviewed.archived.len(), 2);

        let listed = player_scores(&db, SERVER, 1).unwrap();
        let statuses: Vec<ScoreStatus> = listed.scores.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![
                ScoreStatus::Verified,
                ScoreStatus::Archived,
                ScoreStatus::Archived
            ]
        );

        assert!(matches!(
            review_score(&db, SERVER, 1, ReviewAction::Reject, 4),
            Err(TournamentError::ScoreIndexOutOfRange { index: 4, count: 3 })
        ));
        assert!(matches!(
            review_score(&db, SERVER, 1, ReviewAction::Reject, 0),
            Err(TournamentError::ScoreIndexOutOfRange { index: 0, count: 3 })
        ));
        assert!(matches!(
            review_score(&db, SERVER, 1, ReviewAction::Reject, 2),
            Err(TournamentError::ScoreNotReviewable { .. })
        ));
        assert!(matches!(
            review_score(&db, SERVER, 2, ReviewAction::Verify, 1),
            Err(TournamentError::NotParticipating)
        ));
    }

    #[test]
    fn joined_player_without_times() {
        let db = testing::database();
        started(&db);
        join_tournament(&db, SERVER, 3, "three", at(1, 13)).unwrap();
        assert!(matches!(
            player_scores(&db, SERVER, 3),
            Err(TournamentError::NoScores)
        ));
    }

    #[test]
    fn cancellation_returns_participants() {
        let db = testing::database();
        started(&db);
        join_tournament(&db, SERVER, 10, "ten", at(1, 13)).unwrap();
        submit_time(&db, SERVER, 20, "twenty", "1:00:000", None, at(1, 14)).unwrap();

        let cancelled = cancel_tournament(&db, SERVER).unwrap();
        assert_eq!(cancelled.participants, vec![10, 20]);
        assert!(matches!(
            cancel_tournament(&db, SERVER),
            Err(TournamentError::NoActiveTournament)
        ));
        // scores survive cancellation
        let history = tournament_overview(&db, cancelled.tournament.tournament.tournament_id)
            .unwrap()
            .unwrap();
        assert_eq!(history.standings.len(), 1);
        assert!(!history.tournament.tournament.is_active);
        started(&db);
    }

    #[test]
    fn expiry_runs_once() {
        let db = testing::database();
        started(&db);
        submit_time(&db, SERVER, 1, "one", "1:00:000", None, at(2, 12)).unwrap();

        assert!(expire_tournaments(&db, at(8, 11)).unwrap().is_empty());
        let finished = expire_tournaments(&db, at(8, 13)).unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].standings.len(), 1);
        assert_eq!(finished[0].participant_count, 1);
        assert!(expire_tournaments(&db, at(8, 14)).unwrap().is_empty());
        assert!(matches!(
            overview(&db, SERVER),
            Err(TournamentError::NoActiveTournament)
        ));
    }

    #[test]
    fn expired_tournament_overview_shows_it_closed() {
        let db = testing::database();
        let details = started(&db);
        submit_time(&db, SERVER, 1, "one", "1:00:000", None, at(2, 12)).unwrap();
        expire_tournaments(&db, at(8, 13)).unwrap();

        let closed = tournament_overview(&db, details.tournament.tournament_id)
            .unwrap()
            .unwrap();
        assert!(!closed.tournament.tournament.is_active);
        assert_eq!(closed.standings.len(), 1);
        assert_eq!(closed.participant_count, 1);
    }

    #[test]
    fn reminders_are_sent_once_near_the_end() {
        let db = testing::database();
        started(&db);
        // ends on the 8th, three days of notice
        assert!(due_reminders(&db, at(4, 12), 3).unwrap().is_empty());
        assert_eq!(due_reminders(&db, at(5, 13), 3).unwrap().len(), 1);
        assert!(due_reminders(&db, at(6, 12), 3).unwrap().is_empty());
    }

    #[test]
    fn short_tournaments_get_no_reminder() {
        let db = testing::database();
        let short = TournamentRequest {
            duration_days: 2,
            ..request(Some("rainbow road"))
        };
        create_tournament(&db, &short, at(1, 12), &mut rng()).unwrap();
        assert!(due_reminders(&db, at(1, 13), 3).unwrap().is_empty());
        assert!(due_reminders(&db, at(3, 11), 3).unwrap().is_empty());
    }
}
