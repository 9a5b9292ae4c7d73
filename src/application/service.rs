use tracing::info;

use crate::config::LedgerConfig;
use crate::domain::{Account, AuditLog, Cents, format_cents};
use crate::storage::{AccountRepository, AuditRepository, Batch, LedgerStore, Session};

use super::{AppError, ExecutionMode, TransactionCoordinator};

/// Account numbers and opening balances created by [`LedgerService::seed_demo_accounts`].
pub const DEMO_ACCOUNTS: [(&str, Cents); 2] = [("12345", 10000), ("67890", 35000)];

/// Application service providing the ledger workflows.
/// This is the primary interface for any client (CLI, API, etc.).
pub struct LedgerService {
    coordinator: TransactionCoordinator,
    accounts: AccountRepository,
    audit: AuditRepository,
}

/// Result of moving money between two accounts
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub source: Account,
    pub target: Account,
    pub amount: Cents,
    pub mode: ExecutionMode,
}

/// Result of a deposit recorded together with its audit entry
#[derive(Debug, Clone)]
pub struct DepositReceipt {
    pub account: Account,
    pub entry: AuditLog,
}

impl LedgerService {
    /// Create a service over an already connected store.
    pub fn new(store: LedgerStore) -> Self {
        Self {
            coordinator: TransactionCoordinator::new(store.clone()),
            accounts: AccountRepository::new(store.clone()),
            audit: AuditRepository::new(store),
        }
    }

    /// Create the database if needed and run migrations.
    pub async fn init(config: &LedgerConfig) -> Result<Self, AppError> {
        let config = config.clone().create_if_missing(true);
        let store = LedgerStore::init(&config).await?;
        Ok(Self::new(store))
    }

    /// Connect to an existing database.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, AppError> {
        let store = LedgerStore::connect(config).await?;
        Ok(Self::new(store))
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub fn accounts(&self) -> &AccountRepository {
        &self.accounts
    }

    pub fn audit(&self) -> &AuditRepository {
        &self.audit
    }

    // ========================
    // Accounts
    // ========================

    /// Open several accounts in one implicit batch; either all are created or none.
    pub async fn open_accounts(&self, entries: &[(&str, Cents)]) -> Result<Vec<Account>, AppError> {
        for (index, (number, balance)) in entries.iter().enumerate() {
            if *balance < 0 {
                return Err(AppError::InvalidAmount(format!(
                    "Opening balance for {} cannot be negative",
                    number
                )));
            }
            if entries[..index].iter().any(|(other, _)| other == number) {
                return Err(AppError::AccountAlreadyExists(number.to_string()));
            }
            if self.accounts.find_by_number(number, None).await?.is_some() {
                return Err(AppError::AccountAlreadyExists(number.to_string()));
            }
        }

        let accounts: Vec<Account> = entries
            .iter()
            .map(|(number, balance)| Account::new(*number, *balance))
            .collect();

        self.coordinator
            .run_implicit(async |batch: &mut Batch| self.stage_accounts(batch, &accounts))
            .await?;

        for account in &accounts {
            info!(account = %account.number, balance = %format_cents(account.balance), "account opened");
        }
        Ok(accounts)
    }

    pub async fn open_account(&self, number: &str, balance: Cents) -> Result<Account, AppError> {
        let mut opened = self.open_accounts(&[(number, balance)]).await?;
        opened
            .pop()
            .ok_or_else(|| AppError::AccountNotFound(number.to_string()))
    }

    /// Open the two accounts the demo works with.
    pub async fn seed_demo_accounts(&self) -> Result<Vec<Account>, AppError> {
        self.open_accounts(&DEMO_ACCOUNTS).await
    }

    /// Get an account by number (committed state).
    pub async fn get_account(&self, number: &str) -> Result<Account, AppError> {
        self.accounts
            .find_by_number(number, None)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(number.to_string()))
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        Ok(self.accounts.list().await?)
    }

    pub async fn list_audit_logs(&self) -> Result<Vec<AuditLog>, AppError> {
        Ok(self.audit.list().await?)
    }

    // ========================
    // Workflows
    // ========================

    /// Move `amount` between two accounts inside one explicit session.
    ///
    /// The debit and the credit are persisted by two separate saves; both stay
    /// provisional until the session commits.
    #[tracing::instrument(skip(self, amount), fields(amount = %format_cents(amount)))]
    pub async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: Cents,
    ) -> Result<TransferReceipt, AppError> {
        validate_transfer(from, to, amount)?;

        self.coordinator
            .run_explicit(async |session: &mut Session| {
                self.transfer_in_session(session, from, to, amount).await
            })
            .await
    }

    /// Move `amount` between two accounts by submitting both updates as one batch.
    #[tracing::instrument(skip(self, amount), fields(amount = %format_cents(amount)))]
    pub async fn transfer_implicit(
        &self,
        from: &str,
        to: &str,
        amount: Cents,
    ) -> Result<TransferReceipt, AppError> {
        validate_transfer(from, to, amount)?;

        let mut source = self.get_account(from).await?;
        let mut target = self.get_account(to).await?;
        ensure_funds(&source, amount)?;

        source.debit(amount)?;
        target.credit(amount)?;

        self.coordinator
            .run_implicit(async |batch: &mut Batch| self.stage_accounts(batch, [&source, &target]))
            .await?;

        info!(from = %source.number, to = %target.number, "transfer applied");
        Ok(TransferReceipt {
            source,
            target,
            amount,
            mode: ExecutionMode::Implicit,
        })
    }

    /// Credit an account and record a matching audit entry in one explicit session.
    /// The balance change and the audit entry become visible together or not at all.
    #[tracing::instrument(skip(self, amount), fields(amount = %format_cents(amount)))]
    pub async fn deposit_with_audit(
        &self,
        number: &str,
        amount: Cents,
    ) -> Result<DepositReceipt, AppError> {
        validate_amount(amount)?;

        self.coordinator
            .run_explicit(async |session: &mut Session| {
                self.deposit_in_session(session, number, amount).await
            })
            .await
    }

    async fn transfer_in_session(
        &self,
        session: &mut Session,
        from: &str,
        to: &str,
        amount: Cents,
    ) -> Result<TransferReceipt, AppError> {
        // Both accounts are resolved before anything is written.
        let mut source = self.load_account(session, from).await?;
        let mut target = self.load_account(session, to).await?;
        ensure_funds(&source, amount)?;

        source.debit(amount)?;
        self.accounts.save(&source, Some(&mut *session)).await?;
        info!(account = %source.number, "withdrawn");

        target.credit(amount)?;
        self.accounts.save(&target, Some(&mut *session)).await?;
        info!(account = %target.number, "deposited");

        Ok(TransferReceipt {
            source,
            target,
            amount,
            mode: ExecutionMode::Explicit,
        })
    }

    async fn deposit_in_session(
        &self,
        session: &mut Session,
        number: &str,
        amount: Cents,
    ) -> Result<DepositReceipt, AppError> {
        let mut account = self.load_account(session, number).await?;
        account.credit(amount)?;
        self.accounts.save(&account, Some(&mut *session)).await?;

        let entry = AuditLog::deposit(&account.number, amount);
        self.audit.append(&entry, Some(&mut *session)).await?;

        Ok(DepositReceipt { account, entry })
    }

    async fn load_account(&self, session: &mut Session, number: &str) -> Result<Account, AppError> {
        self.accounts
            .find_by_number(number, Some(session))
            .await?
            .ok_or_else(|| AppError::AccountNotFound(number.to_string()))
    }

    fn stage_accounts<'a>(
        &self,
        batch: &mut Batch,
        accounts: impl IntoIterator<Item = &'a Account>,
    ) -> Result<(), AppError> {
        for account in accounts {
            self.accounts.stage(batch, account)?;
        }
        Ok(())
    }
}

fn validate_amount(amount: Cents) -> Result<(), AppError> {
    if amount <= 0 {
        return Err(AppError::InvalidAmount(
            "Amount must be positive".to_string(),
        ));
    }
    Ok(())
}

fn validate_transfer(from: &str, to: &str, amount: Cents) -> Result<(), AppError> {
    validate_amount(amount)?;
    if from == to {
        return Err(AppError::SameAccount(from.to_string()));
    }
    Ok(())
}

fn ensure_funds(source: &Account, amount: Cents) -> Result<(), AppError> {
    if !source.can_cover(amount) {
        return Err(AppError::InsufficientFunds {
            account: source.number.clone(),
            balance: source.balance,
            required: amount,
        });
    }
    Ok(())
}
