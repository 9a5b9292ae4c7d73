use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{format_cents, Cents};

pub type AuditLogId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    Deposit,
    Withdrawal,
    Transfer,
    AccountOpened,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Deposit => "Deposit",
            AuditAction::Withdrawal => "Withdrawal",
            AuditAction::Transfer => "Transfer",
            AuditAction::AccountOpened => "AccountOpened",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deposit" => Some(AuditAction::Deposit),
            "withdrawal" => Some(AuditAction::Withdrawal),
            "transfer" => Some(AuditAction::Transfer),
            "accountopened" | "account_opened" => Some(AuditAction::AccountOpened),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An append-only record of something that happened to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: AuditLogId,
    /// Assigned when the entry is built, strictly increasing within the process
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub details: String,
}

impl AuditLog {
    pub fn new(action: AuditAction, details: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: monotonic_now(),
            action,
            details: details.into(),
        }
    }

    /// Entry describing a credit of `amount` to `account_number`.
    pub fn deposit(account_number: &str, amount: Cents) -> Self {
        Self::new(
            AuditAction::Deposit,
            format!("Added {} to account {}", format_cents(amount), account_number),
        )
    }
}

static LAST_TIMESTAMP_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Wall-clock time, bumped by one microsecond when the clock has not advanced
/// (or went backwards) since the previous call.
fn monotonic_now() -> DateTime<Utc> {
    let now = Utc::now().timestamp_micros();
    let previous = LAST_TIMESTAMP_MICROS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last.saturating_add(1)))
        })
        .unwrap_or(now);
    let stamp = now.max(previous.saturating_add(1));
    DateTime::from_timestamp_micros(stamp).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deposit_details() {
        let entry = AuditLog::deposit("12345", 50000);
        assert_eq!(entry.action, AuditAction::Deposit);
        assert_eq!(entry.details, "Added 500.00 to account 12345");
    }

    #[test]
    fn test_timestamps_are_strictly_increasing() {
        let entries: Vec<AuditLog> = (0..500)
            .map(|i| AuditLog::new(AuditAction::Transfer, format!("entry {}", i)))
            .collect();

        for pair in entries.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[test]
    fn test_action_round_trips_through_str() {
        for action in [
            AuditAction::Deposit,
            AuditAction::Withdrawal,
            AuditAction::Transfer,
            AuditAction::AccountOpened,
        ] {
            assert_eq!(AuditAction::from_str(action.as_str()), Some(action));
        }
        assert_eq!(AuditAction::from_str("refund"), None);
    }

    #[test]
    fn test_action_serializes_as_label() {
        let json = serde_json::to_value(AuditAction::Deposit).unwrap();
        assert_eq!(json, "Deposit");
    }
}
