//! Split reader/writer SQLite pools.
//!
//! SQLite serializes writers, so the writer pool holds exactly one
//! connection; reads go through a wider pool. WAL journaling lets readers
//! proceed while a write is in flight. Migrations run on the writer before
//! the reader pool opens.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

const READER_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Paired pools over one SQLite database file.
#[derive(Clone)]
pub struct DatabasePool {
    /// Multi-connection pool for SELECTs.
    pub reader: SqlitePool,
    /// Single-connection pool; all writes funnel through it.
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if missing) the database at `database_url`, apply
    /// migrations, and hand back the pool pair.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(options.read_only(true))
            .await?;

        Ok(Self { reader, writer })
    }
}

/// Database URL from `TANDEM_DATA_DIR`, defaulting to `~/.tandem/tandem.db`.
pub fn default_database_url() -> String {
    let data_dir = std::env::var("TANDEM_DATA_DIR").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/.tandem")
    });
    format!("sqlite://{data_dir}/tandem.db")
}
