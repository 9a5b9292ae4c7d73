use std::path::PathBuf;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

/// Connection settings for the ledger store.
///
/// A store handle is built once from this and passed explicitly to everything
/// that needs it; there is no process-wide database handle.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Upper bound on pooled connections. Each open session holds one.
    pub max_connections: u32,
    /// How long a statement waits on a locked database before failing
    pub busy_timeout: Duration,
    /// Create the database file when it does not exist
    pub create_if_missing: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("coffer.db"),
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
            create_if_missing: false,
        }
    }
}

impl LedgerConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Self::default()
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    /// WAL journaling keeps readers outside a session on the last committed
    /// state while the session writes.
    pub(crate) fn connect_options(&self) -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .filename(&self.database_path)
            .create_if_missing(self.create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(self.busy_timeout)
    }

    pub(crate) fn pool_options(&self) -> SqlitePoolOptions {
        // A session pins a connection, so outside readers need at least one more.
        SqlitePoolOptions::new().max_connections(self.max_connections.max(2))
    }
}
