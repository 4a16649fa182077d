use std::{cmp::Ordering, collections::HashMap};

use diesel::{result::QueryResult, sqlite::SqliteConnection, Connection};

use crate::{
    db::{
        models::{Score, ScoreEntry, ScoreStatus},
        queries, Database,
    },
    error::TournamentError,
};

/// What an admin does to a single score.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReviewAction {
    Verify,
    Reject,
}

/// A player's representative score and its place in the leaderboard.
#[derive(Debug, Clone, PartialEq)]
pub struct Standing {
    pub rank: usize,
    pub entry: ScoreEntry,
}

/// Allowed status changes. Verifying a verified score again is accepted and
/// re-applies the cascade. Archived and rejected are final.
pub fn can_transition(from: ScoreStatus, to: ScoreStatus) -> bool {
    use ScoreStatus::*;

    matches!(
        (from, to),
        (Pending, Verified)
            | (Verified, Verified)
            | (Pending, Rejected)
            | (Verified, Rejected)
            | (Pending, Archived)
            | (Verified, Archived)
    )
}

/// Sibling scores archived when `verified` is confirmed: those of the same
/// participation, still pending or verified, with a strictly slower time.
/// Faster siblings are left alone.
pub fn cascade_targets(siblings: &[Score], verified: &Score) -> Vec<i64> {
    siblings
        .iter()
        .filter(|s| s.score_id != verified.score_id)
        .filter(|s| s.participation_id == verified.participation_id)
        .filter(|s| matches!(s.status, ScoreStatus::Pending | ScoreStatus::Verified))
        .filter(|s| s.time_ms > verified.time_ms)
        .map(|s| s.score_id)
        .collect()
}

fn faster(a: &ScoreEntry, b: &ScoreEntry) -> Ordering {
    a.time_ms
        .cmp(&b.time_ms)
        .then(a.submitted_at.cmp(&b.submitted_at))
        .then(a.score_id.cmp(&b.score_id))
}

/// One score per player: their fastest verified score, or their fastest
/// pending one if nothing is verified yet. Archived and rejected scores never
/// represent anyone.
pub fn representatives(entries: &[ScoreEntry]) -> Vec<ScoreEntry> {
    let mut best: HashMap<i64, &ScoreEntry> = HashMap::new();
    for entry in entries {
        if !matches!(entry.status, ScoreStatus::Pending | ScoreStatus::Verified) {
            continue;
        }
        let replace = match best.get(&entry.user_id) {
            None => true,
            Some(current) => match (current.status, entry.status) {
                (ScoreStatus::Pending, ScoreStatus::Verified) => true,
                (ScoreStatus::Verified, ScoreStatus::Pending) => false,
                _ => faster(entry, current) == Ordering::Less,
            },
        };
        if replace {
            best.insert(entry.user_id, entry);
        }
    }

    best.into_values().cloned().collect()
}

fn precedence(status: ScoreStatus) -> u8 {
    match status {
        ScoreStatus::Verified => 0,
        _ => 1,
    }
}

/// Ranked representatives. Verified times come first, then pending ones,
/// each group fastest first with earlier submissions winning ties.
pub fn leaderboard(entries: &[ScoreEntry]) -> Vec<Standing> {
    let mut reps = representatives(entries);
    reps.sort_by(|a, b| {
        precedence(a.status)
            .cmp(&precedence(b.status))
            .then_with(|| faster(a, b))
    });

    reps.into_iter()
        .enumerate()
        .map(|(i, entry)| Standing { rank: i + 1, entry })
        .collect()
}

/// The fastest representative time of the tournament, whatever its status.
pub fn best_representative(entries: &[ScoreEntry]) -> Option<ScoreEntry> {
    representatives(entries).into_iter().min_by(faster)
}

/// A new time is a record when it beats the current best and that best
/// belongs to someone else. The first time of a tournament is never a record.
pub fn is_record(previous_best: Option<&ScoreEntry>, user_id: i64, time_ms: i64) -> bool {
    match previous_best {
        Some(best) => time_ms < best.time_ms && best.user_id != user_id,
        None => false,
    }
}

pub fn standings(conn: &SqliteConnection, tournament_id: i64) -> QueryResult<Vec<Standing>> {
    let entries = queries::tournament_entries(conn, tournament_id)?;

    Ok(leaderboard(&entries))
}

/// Applies a review in one transaction. `Ok(None)` when the score does not
/// exist, otherwise the ids archived by the cascade (always empty for a
/// rejection).
pub fn review(
    conn: &SqliteConnection,
    score_id: i64,
    action: ReviewAction,
) -> Result<Option<Vec<i64>>, TournamentError> {
    conn.transaction::<_, TournamentError, _>(|| {
        let score = match queries::find_score(conn, score_id)? {
            Some(s) => s,
            None => return Ok(None),
        };
        let target = match action {
            ReviewAction::Verify => ScoreStatus::Verified,
            ReviewAction::Reject => ScoreStatus::Rejected,
        };
        if !can_transition(score.status, target) {
            return Err(TournamentError::ScoreNotReviewable {
                status: score.status,
            });
        }

        queries::set_score_status(conn, score_id, target)?;
        if action == ReviewAction::Reject {
            return Ok(Some(Vec::new()));
        }
        let siblings = queries::participation_scores(conn, score.participation_id)?;
        let archived = cascade_targets(&siblings, &score);
        queries::set_scores_status(conn, &archived, ScoreStatus::Archived)?;
        debug!("Verified score {}, archived {:?}", score_id, &archived);

        Ok(Some(archived))
    })
}

fn review_reporting(db: &Database, score_id: i64, action: ReviewAction) -> bool {
    let conn = match db.conn() {
        Ok(c) => c,
        Err(e) => {
            error!("Error reviewing score {} ({:?}): {:#}", score_id, action, e);
            return false;
        }
    };
    match review(&conn, score_id, action) {
        Ok(Some(_)) => true,
        Ok(None) => {
            info!("Score {} does not exist, nothing to {:?}", score_id, action);
            false
        }
        Err(e) if e.is_persistence() => {
            error!("Error reviewing score {} ({:?}): {:?}", score_id, action, e);
            false
        }
        Err(e) => {
            info!("Score {} not reviewed: {}", score_id, e);
            false
        }
    }
}

/// Verifies a score and archives its slower siblings. False when the score
/// does not exist or cannot be verified.
pub fn verify_score(db: &Database, score_id: i64) -> bool {
    review_reporting(db, score_id, ReviewAction::Verify)
}

/// Rejects a score, leaving its siblings alone. False when the score does not
/// exist or cannot be rejected.
pub fn reject_score(db: &Database, score_id: i64) -> bool {
    review_reporting(db, score_id, ReviewAction::Reject)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDateTime};

    use super::*;
    use crate::db::{
        models::{NewTournament, VehicleClass},
        testing::{self, at, SERVER},
    };

    fn entry(
        score_id: i64,
        user_id: i64,
        time_ms: i64,
        status: ScoreStatus,
        submitted_at: NaiveDateTime,
    ) -> ScoreEntry {
        ScoreEntry {
            score_id,
            participation_id: user_id * 10,
            user_id,
            discord_id: user_id * 100,
            username: format!("user-{}", user_id),
            time_ms,
            proof_url: None,
            submitted_at,
            status,
        }
    }

    fn score(score_id: i64, time_ms: i64, status: ScoreStatus) -> Score {
        Score {
            score_id,
            participation_id: 1,
            time_ms,
            proof_url: None,
            submitted_at: at(2, 12),
            status,
        }
    }

    // a tournament with one participation per given discord id
    fn tournament_with(db: &Database, players: &[i64]) -> (i64, Vec<i64>) {
        let users: Vec<i64> = players.iter().map(|&p| testing::player(db, p)).collect();
        let conn = db.conn().unwrap();
        let tournament_id = queries::create_tournament(
            &conn,
            &NewTournament {
                server_id: SERVER,
                course_id: 1,
                vehicle_class: VehicleClass::Cc150,
                start_date: at(1, 12),
                end_date: at(1, 12) + Duration::days(7),
                is_active: true,
            },
        )
        .unwrap()
        .unwrap();
        let participations = users
            .iter()
            .map(|&u| {
                queries::get_or_create_participation(&conn, tournament_id, u, at(1, 13))
                    .unwrap()
                    .0
            })
            .collect();

        (tournament_id, participations)
    }

    fn statuses(db: &Database, participation_id: i64) -> Vec<(i64, ScoreStatus)> {
        let conn = db.conn().unwrap();
        queries::participation_scores(&conn, participation_id)
            .unwrap()
            .into_iter()
            .map(|s| (s.time_ms, s.status))
            .collect()
    }

    fn submit(db: &Database, participation_id: i64, times: &[i64]) -> Vec<i64> {
        let conn = db.conn().unwrap();
        times
            .iter()
            .enumerate()
            .map(|(i, &t)| {
                queries::insert_score(&conn, participation_id, t, None, at(2, i as u32)).unwrap()
            })
            .collect()
    }

    #[test]
    fn transitions() {
        use ScoreStatus::*;

        assert!(can_transition(Pending, Verified));
        assert!(can_transition(Verified, Verified));
        assert!(can_transition(Verified, Rejected));
        assert!(can_transition(Pending, Archived));
        for to in ScoreStatus::ALL {
            assert!(!can_transition(Archived, to));
            assert!(!can_transition(Rejected, to));
        }
        assert!(!can_transition(Verified, Pending));
    }

    #[test]
    fn cascade_skips_faster_and_rejected_siblings() {
        let siblings = vec![
            score(1, 3000, ScoreStatus::Pending),
            score(2, 5000, ScoreStatus::Pending),
            score(3, 6000, ScoreStatus::Rejected),
            score(4, 7000, ScoreStatus::Verified),
            score(5, 5000, ScoreStatus::Pending),
        ];
        assert_eq!(cascade_targets(&siblings, &siblings[1]), vec![4]);
    }

    #[test]
    fn verified_outranks_pending() {
        let entries = vec![
            entry(1, 1, 4000, ScoreStatus::Verified, at(2, 1)),
            entry(2, 2, 3500, ScoreStatus::Pending, at(2, 2)),
            entry(3, 3, 2000, ScoreStatus::Rejected, at(2, 3)),
        ];
        let board = leaderboard(&entries);
        assert_eq!(board.len(), 2);
        assert_eq!((board[0].rank, board[0].entry.user_id), (1, 1));
        assert_eq!((board[1].rank, board[1].entry.user_id), (2, 2));
    }

    #[test]
    fn representative_prefers_verified_over_faster_pending() {
        let entries = vec![
            entry(1, 1, 3000, ScoreStatus::Pending, at(2, 1)),
            entry(2, 1, 5000, ScoreStatus::Verified, at(2, 2)),
            entry(3, 1, 2000, ScoreStatus::Archived, at(2, 3)),
            entry(4, 2, 6000, ScoreStatus::Pending, at(2, 4)),
            entry(5, 2, 5500, ScoreStatus::Pending, at(2, 5)),
        ];
        let board = leaderboard(&entries);
        assert_eq!(board[0].entry.score_id, 2);
        assert_eq!(board[1].entry.score_id, 5);
    }

    #[test]
    fn ties_go_to_the_earlier_submission() {
        let entries = vec![
            entry(1, 1, 4000, ScoreStatus::Pending, at(2, 5)),
            entry(2, 2, 4000, ScoreStatus::Pending, at(2, 1)),
        ];
        let board = leaderboard(&entries);
        assert_eq!(board[0].entry.user_id, 2);
    }

    #[test]
    fn records() {
        let entries = vec![
            entry(1, 1, 4000, ScoreStatus::Verified, at(2, 1)),
            entry(2, 2, 3500, ScoreStatus::Pending, at(2, 2)),
        ];
        let best = best_representative(&entries);
        assert_eq!(best.as_ref().map(|b| b.user_id), Some(2));
        assert!(is_record(best.as_ref(), 1, 3000));
        assert!(!is_record(best.as_ref(), 2, 3000));
        assert!(!is_record(best.as_ref(), 1, 3500));
        assert!(!is_record(None, 1, 1000));
    }

    #[test]
    fn verifying_the_minimum_archives_the_rest() {
        let db = testing::database();
        let (_, participations) = tournament_with(&db, &[1]);
        let ids = submit(&db, participations[0], &[5000, 3000, 7000]);

        assert!(verify_score(&db, ids[1]));
        assert_eq!(
            statuses(&db, participations[0]),
            vec![
                (3000, ScoreStatus::Verified),
                (5000, ScoreStatus::Archived),
                (7000, ScoreStatus::Archived),
            ]
        );
    }

    #[test]
    fn verifying_a_slower_time_leaves_faster_pending_alone() {
        let db = testing::database();
        let (_, participations) = tournament_with(&db, &[1]);
        let ids = submit(&db, participations[0], &[5000, 3000, 7000]);

        assert!(verify_score(&db, ids[0]));
        assert_eq!(
            statuses(&db, participations[0]),
            vec![
                (3000, ScoreStatus::Pending),
                (5000, ScoreStatus::Verified),
                (7000, ScoreStatus::Archived),
            ]
        );
    }

    #[test]
    fn stored_leaderboard_excludes_rejected_players() {
        let db = testing::database();
        let (tournament_id, p) = tournament_with(&db, &[1, 2, 3]);
        let a = submit(&db, p[0], &[4000]);
        submit(&db, p[1], &[3500]);
        let c = submit(&db, p[2], &[2000]);
        assert!(verify_score(&db, a[0]));
        assert!(reject_score(&db, c[0]));

        let conn = db.conn().unwrap();
        let board = standings(&conn, tournament_id).unwrap();
        let order: Vec<(i64, i64)> = board
            .iter()
            .map(|s| (s.entry.discord_id, s.entry.time_ms))
            .collect();
        assert_eq!(order, vec![(1, 4000), (2, 3500)]);
    }

    #[test]
    fn rejecting_missing_score_changes_nothing() {
        let db = testing::database();
        let (_, participations) = tournament_with(&db, &[1]);
        submit(&db, participations[0], &[5000, 3000]);

        assert!(!reject_score(&db, 999));
        assert!(!verify_score(&db, 999));
        assert_eq!(
            statuses(&db, participations[0]),
            vec![(3000, ScoreStatus::Pending), (5000, ScoreStatus::Pending)]
        );
    }

    #[test]
    fn final_states_cannot_be_reviewed() {
        let db = testing::database();
        let (_, participations) = tournament_with(&db, &[1]);
        let ids = submit(&db, participations[0], &[5000, 3000]);
        assert!(verify_score(&db, ids[1]));

        // 5000 was archived by the cascade
        assert!(!verify_score(&db, ids[0]));
        assert!(!reject_score(&db, ids[0]));
        let conn = db.conn().unwrap();
        assert!(matches!(
            review(&conn, ids[0], ReviewAction::Verify),
            Err(TournamentError::ScoreNotReviewable {
                status: ScoreStatus::Archived
            })
        ));
    }

    #[test]
    fn rejection_does_not_cascade() {
        let db = testing::database();
        let (_, participations) = tournament_with(&db, &[1]);
        let ids = submit(&db, participations[0], &[3000, 5000]);
        assert!(reject_score(&db, ids[0]));
        assert_eq!(
            statuses(&db, participations[0]),
            vec![(3000, ScoreStatus::Rejected), (5000, ScoreStatus::Pending)]
        );
    }
}
