use anyhow::{Context, Result};

use crate::domain::Account;

use super::{Batch, Collection, LedgerStore, Session, Write};

/// Typed access to the `accounts` collection.
///
/// Holds no state besides the store handle, so one instance can serve any
/// number of concurrent units of work, each passing its own session.
#[derive(Clone)]
pub struct AccountRepository {
    store: LedgerStore,
}

impl AccountRepository {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    /// Look up an account by its number. Inside a session this sees the
    /// session's own uncommitted writes.
    pub async fn find_by_number(
        &self,
        number: &str,
        session: Option<&mut Session>,
    ) -> Result<Option<Account>> {
        let document = self
            .store
            .find_one(Collection::Accounts, "number", number, session)
            .await?;

        document
            .map(|body| serde_json::from_value(body).context("Invalid account document"))
            .transpose()
    }

    /// Persist the account. With a session the write stays provisional until commit.
    pub async fn save(&self, account: &Account, session: Option<&mut Session>) -> Result<()> {
        let body = serde_json::to_value(account).context("Failed to encode account")?;
        self.store
            .save(Collection::Accounts, &account.id.to_string(), body, session)
            .await
            .with_context(|| format!("Failed to save account {}", account.number))
    }

    /// Queue the account for an implicit batch submission.
    pub fn stage(&self, batch: &mut Batch, account: &Account) -> Result<()> {
        let body = serde_json::to_value(account).context("Failed to encode account")?;
        batch.push(Write::Save {
            collection: Collection::Accounts,
            id: account.id.to_string(),
            body,
        });
        Ok(())
    }

    /// List all committed accounts in creation order.
    pub async fn list(&self) -> Result<Vec<Account>> {
        self.store
            .list(Collection::Accounts)
            .await?
            .into_iter()
            .map(|body| serde_json::from_value(body).context("Invalid account document"))
            .collect()
    }
}
