use tracing::{debug, info, warn};

use crate::storage::{Batch, LedgerStore, TransactionalStore, UnitOfWork};

use super::AppError;

/// How a unit of work reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Writes are staged and submitted as one atomic batch.
    Implicit,
    /// Writes go through a session and become visible on commit.
    Explicit,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Implicit => "implicit",
            ExecutionMode::Explicit => "explicit",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runs caller-supplied work as a single atomic unit against the ledger store.
///
/// The coordinator only structures the lifecycle: it opens the unit of work,
/// decides between commit and rollback, and always releases the session
/// before returning. Isolation itself comes from the store. Nothing is retried
/// here; a caller that wants retries re-runs the whole workflow.
#[derive(Clone)]
pub struct TransactionCoordinator<S = LedgerStore> {
    store: S,
}

impl<S: TransactionalStore> TransactionCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run `work` in implicit mode.
    ///
    /// `work` stages its writes into a [`Batch`]; nothing reaches the store
    /// until it returns successfully. The batch is then submitted in one call
    /// that the store applies atomically. If `work` fails, its error is
    /// returned unchanged and nothing is written.
    pub async fn run_implicit<T, F>(&self, work: F) -> Result<T, AppError>
    where
        F: AsyncFnOnce(&mut Batch) -> Result<T, AppError>,
    {
        let mut batch = Batch::new();
        let value = work(&mut batch).await?;

        let writes = batch.len();
        let collections = batch.collections();
        self.store.submit(batch).await.map_err(AppError::Store)?;

        debug!(writes, ?collections, "implicit batch applied");
        Ok(value)
    }

    /// Run `work` inside an explicit session.
    ///
    /// Exactly one of commit or rollback happens:
    /// - `work` succeeds: the session commits. A failing commit is reported as
    ///   [`AppError::Commit`] and is not retried.
    /// - `work` fails: the session rolls back and the original error is returned
    ///   unchanged. If the rollback fails too, the result is
    ///   [`AppError::RollbackFailed`] with the original error as its primary cause.
    ///
    /// Dropping the returned future before commit rolls the session back.
    pub async fn run_explicit<T, F>(&self, work: F) -> Result<T, AppError>
    where
        F: AsyncFnOnce(&mut S::Session) -> Result<T, AppError>,
    {
        let mut session = self.store.begin_session().await.map_err(AppError::Store)?;
        let session_id = session.id();
        debug!(session = %session_id, "session opened");

        match work(&mut session).await {
            Ok(value) => match session.commit().await {
                Ok(()) => {
                    info!(
                        session = %session_id,
                        writes = session.write_count(),
                        participants = ?session.participants(),
                        "session committed"
                    );
                    Ok(value)
                }
                Err(err) => {
                    warn!(session = %session_id, error = %format!("{:#}", err), "commit failed");
                    Err(AppError::Commit(err))
                }
            },
            Err(original) => match session.rollback().await {
                Ok(()) => {
                    info!(
                        session = %session_id,
                        discarded_writes = session.write_count(),
                        reason = %original,
                        "session rolled back"
                    );
                    Err(original)
                }
                Err(rollback) => {
                    warn!(
                        session = %session_id,
                        reason = %original,
                        error = %format!("{:#}", rollback),
                        "rollback failed"
                    );
                    Err(AppError::RollbackFailed {
                        original: Box::new(original),
                        rollback,
                    })
                }
            },
        }
    }
}
