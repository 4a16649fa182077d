use anyhow::{Context, Result};
use diesel::{
    connection::SimpleConnection, insert_or_ignore_into, prelude::*, sql_query,
    sql_types::{BigInt, Text}, sqlite::SqliteConnection,
};

use crate::{
    db::models::{Course, ScoreStatus},
    schema::{course, score_status},
};

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS server (
    server_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    prefix TEXT NOT NULL DEFAULT '!mk',
    admin_role_id INTEGER
);
CREATE TABLE IF NOT EXISTS course (
    course_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    cup TEXT NOT NULL,
    origin TEXT NOT NULL,
    image TEXT
);
CREATE TABLE IF NOT EXISTS "user" (
    user_id INTEGER PRIMARY KEY AUTOINCREMENT,
    discord_id INTEGER UNIQUE NOT NULL,
    username TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tournament (
    tournament_id INTEGER PRIMARY KEY AUTOINCREMENT,
    server_id INTEGER NOT NULL,
    course_id INTEGER NOT NULL,
    vehicle_class TEXT NOT NULL,
    start_date TIMESTAMP NOT NULL,
    end_date TIMESTAMP NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    message_id INTEGER,
    channel_id INTEGER,
    thread_id INTEGER,
    leaderboard_message_id INTEGER,
    reminder_sent_at TIMESTAMP,
    FOREIGN KEY (server_id) REFERENCES server (server_id) ON DELETE CASCADE,
    FOREIGN KEY (course_id) REFERENCES course (course_id)
);
CREATE TABLE IF NOT EXISTS participation (
    participation_id INTEGER PRIMARY KEY AUTOINCREMENT,
    tournament_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    join_date TIMESTAMP NOT NULL,
    FOREIGN KEY (tournament_id) REFERENCES tournament (tournament_id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES "user" (user_id),
    UNIQUE (tournament_id, user_id)
);
CREATE TABLE IF NOT EXISTS score_status (
    status_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT
);
CREATE TABLE IF NOT EXISTS score (
    score_id INTEGER PRIMARY KEY AUTOINCREMENT,
    participation_id INTEGER NOT NULL,
    time_ms INTEGER NOT NULL CHECK (time_ms >= 0),
    proof_url TEXT,
    submitted_at TIMESTAMP NOT NULL,
    status_id INTEGER NOT NULL DEFAULT 1,
    FOREIGN KEY (participation_id) REFERENCES participation (participation_id) ON DELETE CASCADE,
    FOREIGN KEY (status_id) REFERENCES score_status (status_id)
);
"#;

// Columns added after the first release. All nullable so existing rows stay
// valid.
const TOURNAMENT_COLUMNS: &[(&str, &str)] = &[
    ("channel_id", "INTEGER"),
    ("thread_id", "INTEGER"),
    ("leaderboard_message_id", "INTEGER"),
    ("reminder_sent_at", "TIMESTAMP"),
];

const CREATE_INDEXES: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS one_active_tournament_per_server
    ON tournament (server_id) WHERE is_active = 1;
CREATE INDEX IF NOT EXISTS score_by_participation ON score (participation_id, time_ms);
CREATE INDEX IF NOT EXISTS participation_by_tournament ON participation (tournament_id);
"#;

const REBUILD_LEGACY_SCORES: &str = r#"
CREATE TABLE score_migrated (
    score_id INTEGER PRIMARY KEY AUTOINCREMENT,
    participation_id INTEGER NOT NULL,
    time_ms INTEGER NOT NULL CHECK (time_ms >= 0),
    proof_url TEXT,
    submitted_at TIMESTAMP NOT NULL,
    status_id INTEGER NOT NULL DEFAULT 1,
    FOREIGN KEY (participation_id) REFERENCES participation (participation_id) ON DELETE CASCADE,
    FOREIGN KEY (status_id) REFERENCES score_status (status_id)
);
INSERT INTO score_migrated (score_id, participation_id, time_ms, proof_url, submitted_at, status_id)
    SELECT score_id, participation_id, time_ms, {proof}, submitted_at,
        CASE WHEN is_verified = 1 THEN 2 ELSE 1 END
    FROM score
    WHERE participation_id IN (SELECT participation_id FROM participation);
DROP TABLE score;
ALTER TABLE score_migrated RENAME TO score;
"#;

#[derive(Debug, QueryableByName)]
struct ColumnInfo {
    #[sql_type = "Text"]
    name: String,
}

#[derive(Debug, QueryableByName)]
struct RowCount {
    #[sql_type = "BigInt"]
    n: i64,
}

fn columns(conn: &SqliteConnection, table: &str) -> QueryResult<Vec<String>> {
    let info = sql_query(format!("PRAGMA table_info(\"{}\")", table)).load::<ColumnInfo>(conn)?;

    Ok(info.into_iter().map(|c| c.name).collect())
}

fn ensure_column(
    conn: &SqliteConnection,
    table: &str,
    column: &str,
    definition: &str,
) -> QueryResult<bool> {
    if columns(conn, table)?.iter().any(|c| c == column) {
        return Ok(false);
    }
    conn.batch_execute(&format!(
        "ALTER TABLE \"{}\" ADD COLUMN {} {}",
        table, column, definition
    ))?;

    Ok(true)
}

fn seed_statuses(conn: &SqliteConnection) -> QueryResult<()> {
    for status in ScoreStatus::ALL.iter() {
        insert_or_ignore_into(score_status::table)
            .values((
                score_status::status_id.eq(status.id()),
                score_status::name.eq(status.to_string()),
                score_status::description.eq(Some(status.description())),
            ))
            .execute(conn)?;
    }

    Ok(())
}

/// Renames columns that changed name since the first release.
fn rename_legacy_columns(conn: &SqliteConnection) -> QueryResult<()> {
    let course_columns = columns(conn, "course")?;
    if course_columns.iter().any(|c| c == "image_url") && !course_columns.iter().any(|c| c == "image")
    {
        info!("Renaming course.image_url to course.image");
        conn.batch_execute("ALTER TABLE course RENAME COLUMN image_url TO image")?;
    }

    let score_columns = columns(conn, "score")?;
    let has_legacy_flag = score_columns.iter().any(|c| c == "is_verified");
    if !has_legacy_flag
        && score_columns.iter().any(|c| c == "screenshot_url")
        && !score_columns.iter().any(|c| c == "proof_url")
    {
        info!("Renaming score.screenshot_url to score.proof_url");
        conn.batch_execute("ALTER TABLE score RENAME COLUMN screenshot_url TO proof_url")?;
    }

    Ok(())
}

/// Rebuilds a score table that still carries the boolean `is_verified` flag
/// into the status model. Returns whether anything was migrated.
fn backfill_legacy_scores(conn: &SqliteConnection) -> QueryResult<bool> {
    let score_columns = columns(conn, "score")?;
    if !score_columns.iter().any(|c| c == "is_verified") {
        return Ok(false);
    }

    let proof = if score_columns.iter().any(|c| c == "screenshot_url") {
        "screenshot_url"
    } else if score_columns.iter().any(|c| c == "proof_url") {
        "proof_url"
    } else {
        "NULL"
    };
    // foreign keys were never enforced on these databases
    let orphans = sql_query(
        "SELECT COUNT(*) AS n FROM score WHERE participation_id NOT IN \
         (SELECT participation_id FROM participation)",
    )
    .get_result::<RowCount>(conn)?
    .n;
    if orphans > 0 {
        warn!(
            "Dropping {} legacy score(s) whose participation no longer exists",
            orphans
        );
    }
    info!("Migrating score.is_verified to score.status_id");
    conn.transaction(|| conn.batch_execute(&REBUILD_LEGACY_SCORES.replace("{proof}", proof)))?;

    Ok(true)
}

/// Older databases could hold several active tournaments for one server. Keep
/// the newest one active so the unique index can be built.
fn settle_duplicate_actives(conn: &SqliteConnection) -> QueryResult<usize> {
    sql_query(
        "UPDATE tournament SET is_active = 0 WHERE is_active = 1 AND tournament_id NOT IN \
         (SELECT MAX(tournament_id) FROM tournament WHERE is_active = 1 GROUP BY server_id)",
    )
    .execute(conn)
}

/// Brings any database, empty or from an older release, up to the current
/// schema. Safe to run on every start.
pub fn run(conn: &SqliteConnection) -> Result<()> {
    conn.batch_execute(CREATE_TABLES)
        .context("Error creating tables")?;
    seed_statuses(conn).context("Error seeding score statuses")?;
    rename_legacy_columns(conn).context("Error renaming legacy columns")?;
    if backfill_legacy_scores(conn).context("Error migrating legacy scores")? {
        info!("Legacy scores migrated");
    }

    for (column, definition) in TOURNAMENT_COLUMNS {
        if ensure_column(conn, "tournament", column, definition)
            .with_context(|| format!("Error adding tournament.{}", column))?
        {
            info!("Added column tournament.{}", column);
        }
    }

    let settled = settle_duplicate_actives(conn).context("Error settling active tournaments")?;
    if settled > 0 {
        warn!("Deactivated {} duplicate active tournament(s)", settled);
    }
    conn.batch_execute(CREATE_INDEXES)
        .context("Error creating indexes")?;

    Ok(())
}

/// Seeds the course table, only when it is empty. Returns the number of rows
/// inserted.
pub fn seed_courses(conn: &SqliteConnection, courses: &[Course]) -> Result<usize> {
    let existing: i64 = course::table
        .count()
        .get_result(conn)
        .context("Error counting courses")?;
    if existing > 0 {
        return Ok(0);
    }

    let inserted = conn
        .transaction::<_, diesel::result::Error, _>(|| {
            let mut inserted = 0;
            for c in courses {
                inserted += diesel::insert_into(course::table).values(c).execute(conn)?;
            }
            Ok(inserted)
        })
        .context("Error seeding courses")?;

    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{queries, testing, Database};

    const LEGACY_SCHEMA: &str = r#"
    CREATE TABLE server (server_id INTEGER PRIMARY KEY, name TEXT NOT NULL, prefix TEXT DEFAULT '!mk', admin_role_id INTEGER);
    CREATE TABLE course (course_id INTEGER PRIMARY KEY, name TEXT NOT NULL, cup TEXT NOT NULL, origin TEXT NOT NULL, image_url TEXT);
    CREATE TABLE "user" (user_id INTEGER PRIMARY KEY AUTOINCREMENT, discord_id TEXT UNIQUE NOT NULL, username TEXT NOT NULL);
    CREATE TABLE tournament (tournament_id INTEGER PRIMARY KEY AUTOINCREMENT, server_id INTEGER NOT NULL, course_id INTEGER NOT NULL,
        vehicle_class TEXT NOT NULL, start_date TIMESTAMP NOT NULL, end_date TIMESTAMP NOT NULL, is_active BOOLEAN DEFAULT 1, message_id TEXT);
    CREATE TABLE participation (participation_id INTEGER PRIMARY KEY AUTOINCREMENT, tournament_id INTEGER NOT NULL, user_id INTEGER NOT NULL,
        join_date TIMESTAMP NOT NULL, UNIQUE (tournament_id, user_id));
    CREATE TABLE score (score_id INTEGER PRIMARY KEY AUTOINCREMENT, participation_id INTEGER NOT NULL, time_ms INTEGER NOT NULL,
        screenshot_url TEXT, submitted_at TIMESTAMP NOT NULL, is_verified BOOLEAN DEFAULT 0);

    INSERT INTO server VALUES (1, 'Old Server', '!mk', NULL);
    INSERT INTO course VALUES (1, 'Mario Kart Stadium', 'Mushroom Cup', 'Mario Kart 8', 'mks.png');
    INSERT INTO "user" VALUES (1, '1234', 'racer');
    INSERT INTO tournament VALUES (1, 1, 1, 'Miroir', '2025-03-01 12:00:00', '2025-03-08 12:00:00', 1, NULL);
    INSERT INTO tournament VALUES (2, 1, 1, '150cc', '2025-03-02 12:00:00', '2025-03-09 12:00:00', 1, NULL);
    INSERT INTO participation VALUES (1, 2, 1, '2025-03-02 13:00:00');
    INSERT INTO score VALUES (1, 1, 5000, 'https://cdn/a.png', '2025-03-02 14:00:00', 1);
    INSERT INTO score VALUES (2, 1, 4000, NULL, '2025-03-02 15:00:00', 0);
    "#;

    #[test]
    fn setup_is_idempotent() {
        let db = testing::database();
        let conn = db.conn().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();
        assert_eq!(seed_courses(&conn, &testing::courses()).unwrap(), 0);
        assert_eq!(queries::course_count(&conn).unwrap(), 5);

        let statuses: Vec<(i32, String)> = score_status::table
            .select((score_status::status_id, score_status::name))
            .order(score_status::status_id.asc())
            .load(&conn)
            .unwrap();
        assert_eq!(
            statuses,
            vec![
                (1, "pending".to_string()),
                (2, "verified".to_string()),
                (3, "archived".to_string()),
                (4, "rejected".to_string()),
            ]
        );
    }

    #[test]
    fn legacy_database_is_migrated() {
        let db = Database::open(":memory:").unwrap();
        let conn = db.conn().unwrap();
        conn.batch_execute(LEGACY_SCHEMA).unwrap();
        run(&conn).unwrap();

        let scores = queries::participation_scores(&conn, 1).unwrap();
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].time_ms, 4000);
        assert_eq!(scores[0].status, ScoreStatus::Pending);
        assert_eq!(scores[0].proof_url, None);
        assert_eq!(scores[1].status, ScoreStatus::Verified);
        assert_eq!(scores[1].proof_url.as_deref(), Some("https://cdn/a.png"));

        // only the newest active tournament survives
        let active = queries::active_tournament(&conn, 1).unwrap().unwrap();
        assert_eq!(active.tournament.tournament_id, 2);
        assert_eq!(active.tournament.thread_id, None);
        assert_eq!(active.course.image.as_deref(), Some("mks.png"));
        let first = queries::tournament_details(&conn, 1).unwrap().unwrap();
        assert!(!first.tournament.is_active);

        assert!(!backfill_legacy_scores(&conn).unwrap());
        assert_eq!(queries::register_user(&conn, 1234, "racer").unwrap(), 1);
    }

    #[test]
    fn legacy_scores_without_participation_are_dropped() {
        let db = Database::open(":memory:").unwrap();
        let conn = db.conn().unwrap();
        conn.batch_execute(LEGACY_SCHEMA).unwrap();
        conn.batch_execute(
            "INSERT INTO score VALUES (3, 99, 3000, NULL, '2025-03-02 16:00:00', 1);",
        )
        .unwrap();
        run(&conn).unwrap();

        let kept: Vec<i64> = crate::schema::score::table
            .select(crate::schema::score::score_id)
            .order(crate::schema::score::score_id.asc())
            .load(&conn)
            .unwrap();
        assert_eq!(kept, vec![1, 2]);
        assert_eq!(queries::participation_scores(&conn, 1).unwrap().len(), 2);
        assert!(!backfill_legacy_scores(&conn).unwrap());
    }
}
