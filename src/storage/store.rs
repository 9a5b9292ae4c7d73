use std::collections::BTreeSet;
use std::future::Future;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde_json::Value;
use sqlx::{Executor, Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use uuid::Uuid;

use crate::config::LedgerConfig;

use super::MIGRATION_001_DOCUMENTS;

/// Named groups of documents held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    Accounts,
    AuditLogs,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Accounts => "accounts",
            Collection::AuditLogs => "audit_logs",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single document write, applied in the order it was issued.
#[derive(Debug, Clone)]
pub enum Write {
    /// Insert or replace the document with this id.
    Save {
        collection: Collection,
        id: String,
        body: Value,
    },
    /// Insert only; fails if the id is already taken.
    Insert {
        collection: Collection,
        id: String,
        body: Value,
    },
}

impl Write {
    pub fn collection(&self) -> Collection {
        match self {
            Write::Save { collection, .. } | Write::Insert { collection, .. } => *collection,
        }
    }

    async fn execute<'c, E>(&self, executor: E) -> Result<()>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let (sql, collection, id, body) = match self {
            Write::Save {
                collection,
                id,
                body,
            } => (
                r#"
                INSERT INTO documents (collection, id, body, written_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (collection, id) DO UPDATE
                SET body = excluded.body, written_at = excluded.written_at
                "#,
                collection,
                id,
                body,
            ),
            Write::Insert {
                collection,
                id,
                body,
            } => (
                r#"
                INSERT INTO documents (collection, id, body, written_at)
                VALUES (?, ?, ?, ?)
                "#,
                collection,
                id,
                body,
            ),
        };

        sqlx::query(sql)
            .bind(collection.as_str())
            .bind(id.clone())
            .bind(body.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(executor)
            .await
            .with_context(|| format!("Failed to write document {} into {}", id, collection))?;
        Ok(())
    }
}

/// Writes staged for one atomic submission, without an explicit session.
#[derive(Debug, Default)]
pub struct Batch {
    writes: Vec<Write>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: Write) {
        self.writes.push(write);
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn collections(&self) -> BTreeSet<Collection> {
        self.writes.iter().map(Write::collection).collect()
    }
}

/// Lifecycle of one explicit unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkState {
    Open,
    /// Commit was issued and has not reported back yet.
    Committing,
    Committed,
    RolledBack,
}

impl UnitOfWorkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitOfWorkState::Open => "open",
            UnitOfWorkState::Committing => "committing",
            UnitOfWorkState::Committed => "committed",
            UnitOfWorkState::RolledBack => "rolled back",
        }
    }
}

impl std::fmt::Display for UnitOfWorkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One explicit unit of work as the coordinator drives it.
pub trait UnitOfWork {
    fn id(&self) -> Uuid;

    /// Successful writes made through this unit of work.
    fn write_count(&self) -> usize;

    fn participants(&self) -> &BTreeSet<Collection>;

    fn commit(&mut self) -> impl Future<Output = Result<()>>;

    fn rollback(&mut self) -> impl Future<Output = Result<()>>;
}

/// A store that can open units of work and apply batches atomically.
pub trait TransactionalStore {
    type Session: UnitOfWork;

    fn begin_session(&self) -> impl Future<Output = Result<Self::Session>>;

    fn submit(&self, batch: Batch) -> impl Future<Output = Result<()>>;
}

/// A store session: one database transaction that repository calls enlist in.
///
/// Writes made through the session are visible to reads through the same
/// session and invisible to everyone else until [`Session::commit`]. The
/// session moves from `Open` to exactly one of `Committed` or `RolledBack`,
/// passing through `Committing` while a commit is in flight.
/// Dropping a session that is still open rolls it back.
pub struct Session {
    id: Uuid,
    tx: Option<Transaction<'static, Sqlite>>,
    state: UnitOfWorkState,
    participants: BTreeSet<Collection>,
    write_count: usize,
}

impl Session {
    fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx: Some(tx),
            state: UnitOfWorkState::Open,
            participants: BTreeSet::new(),
            write_count: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> UnitOfWorkState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == UnitOfWorkState::Open
    }

    /// Collections that received at least one write through this session.
    pub fn participants(&self) -> &BTreeSet<Collection> {
        &self.participants
    }

    pub fn write_count(&self) -> usize {
        self.write_count
    }

    /// Make every write of this session visible at once.
    ///
    /// On failure the outcome is decided by the database (normally rolled
    /// back); the session is finished either way. If the returned future is
    /// dropped before it completes, the session stays `Committing`.
    pub async fn commit(&mut self) -> Result<()> {
        let tx = self.finish()?;
        self.state = UnitOfWorkState::Committing;
        let result = tx.commit().await.context("Failed to commit session");
        self.state = if result.is_ok() {
            UnitOfWorkState::Committed
        } else {
            UnitOfWorkState::RolledBack
        };
        result
    }

    /// Discard every write of this session.
    pub async fn rollback(&mut self) -> Result<()> {
        let tx = self.finish()?;
        self.state = UnitOfWorkState::RolledBack;
        tx.rollback().await.context("Failed to roll back session")
    }

    fn finish(&mut self) -> Result<Transaction<'static, Sqlite>> {
        if !self.is_open() {
            bail!("Session {} is already {}", self.id, self.state);
        }
        self.tx
            .take()
            .with_context(|| format!("Session {} has no transaction", self.id))
    }

    fn connection(&mut self) -> Result<&mut SqliteConnection> {
        if !self.is_open() {
            bail!("Session {} is already {}", self.id, self.state);
        }
        self.tx
            .as_deref_mut()
            .with_context(|| format!("Session {} has no transaction", self.id))
    }

    async fn write(&mut self, write: &Write) -> Result<()> {
        write.execute(self.connection()?).await?;
        self.participants.insert(write.collection());
        self.write_count += 1;
        Ok(())
    }
}

impl UnitOfWork for Session {
    fn id(&self) -> Uuid {
        self.id
    }

    fn write_count(&self) -> usize {
        self.write_count
    }

    fn participants(&self) -> &BTreeSet<Collection> {
        &self.participants
    }

    fn commit(&mut self) -> impl Future<Output = Result<()>> {
        Session::commit(self)
    }

    fn rollback(&mut self) -> impl Future<Output = Result<()>> {
        Session::rollback(self)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        match self.state {
            UnitOfWorkState::Open => {
                // The transaction's own drop issues the rollback.
                tracing::warn!(session = %self.id, "session released while open, rolling back");
                self.state = UnitOfWorkState::RolledBack;
            }
            UnitOfWorkState::Committing => {
                tracing::warn!(session = %self.id, "session released during commit, outcome unknown");
            }
            UnitOfWorkState::Committed | UnitOfWorkState::RolledBack => {}
        }
    }
}

/// Document store over SQLite. Cheap to clone; clones share one pool.
#[derive(Clone)]
pub struct LedgerStore {
    pool: SqlitePool,
}

impl LedgerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a connection pool for the configured database.
    pub async fn connect(config: &LedgerConfig) -> Result<Self> {
        let pool = config
            .pool_options()
            .connect_with(config.connect_options())
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to database {}",
                    config.database_path.display()
                )
            })?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_DOCUMENTS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a database (connect + migrate).
    pub async fn init(config: &LedgerConfig) -> Result<Self> {
        let store = Self::connect(config).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ========================
    // Sessions
    // ========================

    pub async fn begin_session(&self) -> Result<Session> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin session")?;
        Ok(Session::new(tx))
    }

    /// Apply every write of `batch` atomically: all of them land or none do.
    pub async fn submit(&self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin batch")?;
        for write in &batch.writes {
            write.execute(&mut *tx).await?;
        }
        tx.commit().await.context("Failed to commit batch")?;
        Ok(())
    }

    // ========================
    // Documents
    // ========================

    /// Find the first document in `collection` whose top-level `field` equals `value`.
    pub async fn find_one(
        &self,
        collection: Collection,
        field: &str,
        value: &str,
        session: Option<&mut Session>,
    ) -> Result<Option<Value>> {
        match session {
            Some(session) => {
                fetch_document(session.connection()?, collection, field, value).await
            }
            None => fetch_document(&self.pool, collection, field, value).await,
        }
    }

    /// Insert or replace a document.
    pub async fn save(
        &self,
        collection: Collection,
        id: &str,
        body: Value,
        session: Option<&mut Session>,
    ) -> Result<()> {
        let write = Write::Save {
            collection,
            id: id.to_string(),
            body,
        };
        self.apply(write, session).await
    }

    /// Insert a new document, failing if the id already exists.
    pub async fn insert(
        &self,
        collection: Collection,
        id: &str,
        body: Value,
        session: Option<&mut Session>,
    ) -> Result<()> {
        let write = Write::Insert {
            collection,
            id: id.to_string(),
            body,
        };
        self.apply(write, session).await
    }

    /// All committed documents of a collection, oldest first.
    pub async fn list(&self, collection: Collection) -> Result<Vec<Value>> {
        let rows = sqlx::query(
            r#"
            SELECT body
            FROM documents
            WHERE collection = ?
            ORDER BY rowid
            "#,
        )
        .bind(collection.as_str())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to list {}", collection))?;

        rows.iter().map(decode_body).collect()
    }

    async fn apply(&self, write: Write, session: Option<&mut Session>) -> Result<()> {
        match session {
            Some(session) => session.write(&write).await,
            None => write.execute(&self.pool).await,
        }
    }
}

impl TransactionalStore for LedgerStore {
    type Session = Session;

    fn begin_session(&self) -> impl Future<Output = Result<Session>> {
        LedgerStore::begin_session(self)
    }

    fn submit(&self, batch: Batch) -> impl Future<Output = Result<()>> {
        LedgerStore::submit(self, batch)
    }
}

async fn fetch_document<'c, E>(
    executor: E,
    collection: Collection,
    field: &str,
    value: &str,
) -> Result<Option<Value>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT body
        FROM documents
        WHERE collection = ? AND json_extract(body, ?) = ?
        ORDER BY rowid
        LIMIT 1
        "#,
    )
    .bind(collection.as_str())
    .bind(format!("$.{}", field))
    .bind(value.to_string())
    .fetch_optional(executor)
    .await
    .with_context(|| format!("Failed to find document in {}", collection))?;

    row.as_ref().map(decode_body).transpose()
}

fn decode_body(row: &sqlx::sqlite::SqliteRow) -> Result<Value> {
    let body: String = row.get("body");
    serde_json::from_str(&body).context("Invalid document body")
}
