use anyhow::{Context, Result};
use diesel::{
    connection::SimpleConnection,
    r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection},
    sqlite::SqliteConnection,
};

pub mod models;
pub mod queries;
pub mod setup;

pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;
pub type PooledConn = PooledConnection<ConnectionManager<SqliteConnection>>;

no_arg_sql_function!(
    last_insert_rowid,
    diesel::sql_types::BigInt,
    "Represents the SQLite last_insert_rowid() function"
);

#[derive(Debug)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Owned handle to the store. The pool holds a single connection so every
/// caller is serialized on checkout; clones share that connection.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn open(database_url: &str) -> Result<Self> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(1)
            .connection_customizer(Box::new(ConnectionOptions))
            .build(manager)
            .with_context(|| format!("Error opening database at {}", database_url))?;

        Ok(Database { pool })
    }

    /// Checks out the connection. Hold it for one logical operation only:
    /// asking for a second one while holding the first will wait on itself.
    #[inline]
    pub fn conn(&self) -> Result<PooledConn> {
        let conn = self
            .pool
            .get()
            .context("Error checking out database connection")?;

        Ok(conn)
    }
}
