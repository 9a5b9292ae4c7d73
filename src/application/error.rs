use thiserror::Error;

use crate::domain::{BalanceOverflow, Cents};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    AccountAlreadyExists(String),

    #[error("Insufficient funds in account {account}: balance {balance}, required {required}")]
    InsufficientFunds {
        account: String,
        balance: Cents,
        required: Cents,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Balance overflow: {0}")]
    BalanceOverflow(#[from] BalanceOverflow),

    #[error("Cannot transfer from account {0} to itself")]
    SameAccount(String),

    /// A find or write failed in the store.
    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),

    /// The commit call itself failed. The outcome is decided by the store;
    /// callers must not assume any part of the work was applied.
    #[error("Commit failed: {0:#}")]
    Commit(#[source] anyhow::Error),

    /// Rolling back after `original` failed as well. `original` stays the cause.
    #[error("{original} (rollback also failed: {rollback:#})")]
    RollbackFailed {
        #[source]
        original: Box<AppError>,
        rollback: anyhow::Error,
    },
}

impl AppError {
    /// The failure that aborted the unit of work, looking through a failed rollback.
    pub fn primary(&self) -> &AppError {
        match self {
            AppError::RollbackFailed { original, .. } => original.primary(),
            other => other,
        }
    }

    /// Whether the error is a business rule rejection rather than an infrastructure failure.
    pub fn is_domain(&self) -> bool {
        matches!(
            self.primary(),
            AppError::AccountNotFound(_)
                | AppError::AccountAlreadyExists(_)
                | AppError::InsufficientFunds { .. }
                | AppError::InvalidAmount(_)
                | AppError::BalanceOverflow(_)
                | AppError::SameAccount(_)
        )
    }
}
