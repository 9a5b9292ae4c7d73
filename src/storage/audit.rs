use anyhow::{Context, Result};

use crate::domain::AuditLog;

use super::{Batch, Collection, LedgerStore, Session, Write};

/// Append-only access to the `audit_logs` collection.
#[derive(Clone)]
pub struct AuditRepository {
    store: LedgerStore,
}

impl AuditRepository {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Append an entry. Re-appending an existing id fails; entries are never replaced.
    pub async fn append(&self, entry: &AuditLog, session: Option<&mut Session>) -> Result<()> {
        let body = serde_json::to_value(entry).context("Failed to encode audit entry")?;
        self.store
            .insert(Collection::AuditLogs, &entry.id.to_string(), body, session)
            .await
            .with_context(|| format!("Failed to append {} audit entry", entry.action))
    }

    pub fn stage_append(&self, batch: &mut Batch, entry: &AuditLog) -> Result<()> {
        let body = serde_json::to_value(entry).context("Failed to encode audit entry")?;
        batch.push(Write::Insert {
            collection: Collection::AuditLogs,
            id: entry.id.to_string(),
            body,
        });
        Ok(())
    }

    /// List committed entries in the order they were appended.
    pub async fn list(&self) -> Result<Vec<AuditLog>> {
        self.store
            .list(Collection::AuditLogs)
            .await?
            .into_iter()
            .map(|body| serde_json::from_value(body).context("Invalid audit document"))
            .collect()
    }
}
