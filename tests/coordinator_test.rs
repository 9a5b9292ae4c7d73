mod common;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use coffer::application::{AppError, TransactionCoordinator};
use coffer::domain::{Account, AuditAction, AuditLog};
use coffer::storage::{
    AccountRepository, Batch, Collection, LedgerStore, Session, TransactionalStore, UnitOfWork, UnitOfWorkState,
};
use common::{balance_of, seeded_service, test_service};
use uuid::Uuid;

/// Which lifecycle step a [`FaultyStore`] session should fail.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Fault {
    None,
    Commit,
    Rollback,
}

/// Wraps the real store and fails the chosen session step after discarding
/// the real transaction, recording every commit and rollback it is asked for.
#[derive(Clone)]
struct FaultyStore {
    inner: LedgerStore,
    fault: Fault,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl FaultyStore {
    fn new(inner: LedgerStore, fault: Fault) -> Self {
        Self {
            inner,
            fault,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

struct FaultySession {
    inner: Session,
    fault: Fault,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl FaultySession {
    fn session(&mut self) -> &mut Session {
        &mut self.inner
    }
}

impl UnitOfWork for FaultySession {
    fn id(&self) -> Uuid {
        self.inner.id()
    }

    fn write_count(&self) -> usize {
        self.inner.write_count()
    }

    fn participants(&self) -> &BTreeSet<Collection> {
        self.inner.participants()
    }

    async fn commit(&mut self) -> Result<()> {
        self.calls.lock().unwrap().push("commit");
        if self.fault == Fault::Commit {
            self.inner.rollback().await?;
            return Err(anyhow!("disk I/O error"));
        }
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.calls.lock().unwrap().push("rollback");
        self.inner.rollback().await?;
        if self.fault == Fault::Rollback {
            return Err(anyhow!("connection reset"));
        }
        Ok(())
    }
}

impl TransactionalStore for FaultyStore {
    type Session = FaultySession;

    async fn begin_session(&self) -> Result<FaultySession> {
        Ok(FaultySession {
            inner: self.inner.begin_session().await?,
            fault: self.fault,
            calls: Arc::clone(&self.calls),
        })
    }

    async fn submit(&self, batch: Batch) -> Result<()> {
        self.inner.submit(batch).await
    }
}

/// Open account 24680 through `coordinator`, optionally failing the work afterwards.
async fn open_in_session(
    coordinator: &TransactionCoordinator<FaultyStore>,
    accounts: &AccountRepository,
    fail_work: bool,
) -> Result<Account, AppError> {
    coordinator
        .run_explicit(async |session: &mut FaultySession| {
            let account = Account::new("24680", 500);
            accounts.save(&account, Some(session.session())).await?;
            if fail_work {
                return Err(AppError::InvalidAmount("rejected after save".into()));
            }
            Ok(account)
        })
        .await
}

#[tokio::test]
async fn test_session_reads_see_partial_state_outside_readers_do_not() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let accounts = service.accounts();

    let (inside, outside) = service
        .coordinator()
        .run_explicit(async |session: &mut Session| {
            let mut source = accounts
                .find_by_number("12345", Some(&mut *session))
                .await?
                .ok_or_else(|| AppError::AccountNotFound("12345".into()))?;
            source.debit(10000)?;
            accounts.save(&source, Some(&mut *session)).await?;

            let inside = accounts.find_by_number("12345", Some(&mut *session)).await?;
            let outside = accounts.find_by_number("12345", None).await?;
            Ok::<_, AppError>((inside, outside))
        })
        .await?;

    assert_eq!(inside.map(|a| a.balance), Some(0));
    assert_eq!(outside.map(|a| a.balance), Some(10000));
    assert_eq!(balance_of(&service, "12345").await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_store_error_on_second_write_rolls_back_first() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let accounts = service.accounts();

    let result = service
        .coordinator()
        .run_explicit(async |session: &mut Session| {
            let mut source = accounts
                .find_by_number("12345", Some(&mut *session))
                .await?
                .ok_or_else(|| AppError::AccountNotFound("12345".into()))?;
            source.debit(10000)?;
            accounts.save(&source, Some(&mut *session)).await?;

            // A second document claiming a taken account number violates the unique key.
            let clash = Account::new("67890", 10000);
            accounts.save(&clash, Some(&mut *session)).await?;
            Ok::<_, AppError>(())
        })
        .await;

    assert!(matches!(result, Err(AppError::Store(_))));
    assert_eq!(balance_of(&service, "12345").await?, 10000);
    assert_eq!(balance_of(&service, "67890").await?, 35000);
    assert_eq!(service.list_accounts().await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_work_error_is_returned_unchanged() -> Result<()> {
    let (service, _temp) = seeded_service().await?;

    let result: Result<(), AppError> = service
        .coordinator()
        .run_explicit(async |_session: &mut Session| Err(AppError::SameAccount("12345".into())))
        .await;

    assert!(matches!(result, Err(AppError::SameAccount(ref n)) if n == "12345"));
    Ok(())
}

#[tokio::test]
async fn test_implicit_batch_is_all_or_nothing() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let accounts = service.accounts();
    let mut source = service.get_account("12345").await?;
    source.debit(10000)?;

    let result = service
        .coordinator()
        .run_implicit(async |batch: &mut Batch| {
            accounts.stage(batch, &source)?;
            accounts.stage(batch, &Account::new("67890", 10000))?;
            Ok::<_, AppError>(())
        })
        .await;

    assert!(matches!(result, Err(AppError::Store(_))));
    assert_eq!(balance_of(&service, "12345").await?, 10000);
    assert_eq!(service.list_accounts().await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_implicit_work_failure_submits_nothing() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let accounts = service.accounts();
    let mut source = service.get_account("12345").await?;
    source.debit(10000)?;

    let result: Result<(), AppError> = service
        .coordinator()
        .run_implicit(async |batch: &mut Batch| {
            accounts.stage(batch, &source)?;
            Err(AppError::InvalidAmount("rejected after staging".into()))
        })
        .await;

    assert!(matches!(result, Err(AppError::InvalidAmount(_))));
    assert_eq!(balance_of(&service, "12345").await?, 10000);

    Ok(())
}

#[tokio::test]
async fn test_implicit_batch_spans_collections() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let accounts = service.accounts();
    let audit = service.audit();
    let mut account = service.get_account("67890").await?;
    account.credit(100)?;
    let entry = AuditLog::new(AuditAction::Deposit, "Added 1.00 to account 67890");

    service
        .coordinator()
        .run_implicit(async |batch: &mut Batch| {
            accounts.stage(batch, &account)?;
            audit.stage_append(batch, &entry)?;
            assert_eq!(
                batch.collections().into_iter().collect::<Vec<_>>(),
                vec![Collection::Accounts, Collection::AuditLogs]
            );
            Ok::<_, AppError>(())
        })
        .await?;

    assert_eq!(balance_of(&service, "67890").await?, 35100);
    assert_eq!(service.list_audit_logs().await?, vec![entry]);

    Ok(())
}

#[tokio::test]
async fn test_cancelled_unit_of_work_is_rolled_back() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let accounts = service.accounts();

    let timed_out = tokio::time::timeout(
        Duration::from_millis(200),
        service
            .coordinator()
            .run_explicit(async |session: &mut Session| {
                let mut source = accounts
                    .find_by_number("12345", Some(&mut *session))
                    .await?
                    .ok_or_else(|| AppError::AccountNotFound("12345".into()))?;
                source.debit(10000)?;
                accounts.save(&source, Some(&mut *session)).await?;

                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, AppError>(())
            }),
    )
    .await;

    assert!(timed_out.is_err());
    assert_eq!(balance_of(&service, "12345").await?, 10000);

    // The store stays writable once the abandoned session is gone.
    service.transfer("12345", "67890", 2500).await?;
    assert_eq!(balance_of(&service, "12345").await?, 7500);

    Ok(())
}

#[tokio::test]
async fn test_session_state_machine() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let store = service.coordinator().store();

    let mut session = store.begin_session().await?;
    assert_eq!(session.state(), UnitOfWorkState::Open);

    let account = Account::new("24680", 100);
    service.accounts().save(&account, Some(&mut session)).await?;
    service
        .audit()
        .append(&AuditLog::new(AuditAction::AccountOpened, "24680"), Some(&mut session))
        .await?;
    assert_eq!(session.write_count(), 2);
    assert!(session.participants().contains(&Collection::Accounts));
    assert!(session.participants().contains(&Collection::AuditLogs));

    session.commit().await?;
    assert_eq!(session.state(), UnitOfWorkState::Committed);

    // Terminal: no second commit, no rollback, no further writes.
    assert!(session.commit().await.is_err());
    assert!(session.rollback().await.is_err());
    assert!(
        service
            .accounts()
            .save(&account, Some(&mut session))
            .await
            .is_err()
    );
    assert_eq!(session.state(), UnitOfWorkState::Committed);
    assert_eq!(balance_of(&service, "24680").await?, 100);

    Ok(())
}

#[tokio::test]
async fn test_explicit_rollback_discards_writes() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let store = service.coordinator().store();

    let mut session = store.begin_session().await?;
    service
        .accounts()
        .save(&Account::new("13579", 500), Some(&mut session))
        .await?;
    session.rollback().await?;

    assert_eq!(session.state(), UnitOfWorkState::RolledBack);
    assert!(matches!(
        service.get_account("13579").await,
        Err(AppError::AccountNotFound(_))
    ));

    Ok(())
}

#[tokio::test]
async fn test_dropped_session_rolls_back() -> Result<()> {
    let (service, _temp) = test_service().await?;

    {
        let mut session = service.coordinator().store().begin_session().await?;
        service
            .accounts()
            .save(&Account::new("11111", 500), Some(&mut session))
            .await?;
    }

    assert!(service.list_accounts().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_commit_failure_is_reported_and_nothing_is_visible() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let store = FaultyStore::new(service.coordinator().store().clone(), Fault::Commit);
    let coordinator = TransactionCoordinator::new(store.clone());

    let result = open_in_session(&coordinator, service.accounts(), false).await;

    match result {
        Err(AppError::Commit(err)) => assert!(err.to_string().contains("disk I/O error")),
        other => panic!("expected commit error, got {:?}", other),
    }
    assert!(service.list_accounts().await?.is_empty());
    assert_eq!(store.calls(), vec!["commit"]);

    Ok(())
}

#[tokio::test]
async fn test_rollback_failure_keeps_original_error_primary() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let store = FaultyStore::new(service.coordinator().store().clone(), Fault::Rollback);
    let coordinator = TransactionCoordinator::new(store.clone());

    let err = open_in_session(&coordinator, service.accounts(), true).await.unwrap_err();

    assert!(matches!(err, AppError::RollbackFailed { .. }));
    assert!(matches!(err.primary(), AppError::InvalidAmount(m) if m == "rejected after save"));
    assert!(err.to_string().contains("rollback also failed: connection reset"));
    assert!(service.list_accounts().await?.is_empty());
    assert_eq!(store.calls(), vec!["rollback"]);

    Ok(())
}

#[tokio::test]
async fn test_exactly_one_of_commit_or_rollback_runs() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let committing = FaultyStore::new(service.coordinator().store().clone(), Fault::None);
    let account = open_in_session(
        &TransactionCoordinator::new(committing.clone()),
        service.accounts(),
        false,
    ).await?;
    assert_eq!(committing.calls(), vec!["commit"]);
    assert_eq!(service.get_account("24680").await?.id, account.id);

    let rolling_back = FaultyStore::new(service.coordinator().store().clone(), Fault::None);
    let result = open_in_session(
        &TransactionCoordinator::new(rolling_back.clone()),
        service.accounts(),
        true,
    ).await;
    assert!(matches!(result, Err(AppError::InvalidAmount(_))));
    assert_eq!(rolling_back.calls(), vec!["rollback"]);

    Ok(())
}

#[tokio::test]
async fn test_failed_writes_are_not_counted() -> Result<()> {
    let (service, _temp) = seeded_service().await?;
    let entry = AuditLog::new(AuditAction::Deposit, "Added 1.00 to account 12345");
    service.audit().append(&entry, None).await?;

    let mut session = service.coordinator().store().begin_session().await?;
    let mut source = service
        .accounts()
        .find_by_number("12345", Some(&mut session))
        .await?
        .unwrap();
    source.debit(100)?;
    service.accounts().save(&source, Some(&mut session)).await?;

    // Account number and audit id are both taken already.
    let clash = service
        .accounts()
        .save(&Account::new("67890", 1), Some(&mut session))
        .await;
    let duplicate = service.audit().append(&entry, Some(&mut session)).await;

    assert!(clash.is_err());
    assert!(duplicate.is_err());
    assert_eq!(session.write_count(), 1);
    assert_eq!(
        session.participants().iter().copied().collect::<Vec<_>>(),
        vec![Collection::Accounts]
    );

    session.rollback().await?;
    Ok(())
}

#[tokio::test]
async fn test_interrupted_commit_is_not_recorded_as_rolled_back() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let mut session = service.coordinator().store().begin_session().await?;
    service
        .accounts()
        .save(&Account::new("13579", 500), Some(&mut session))
        .await?;

    let outcome = tokio::time::timeout(Duration::ZERO, session.commit()).await;

    match outcome {
        Ok(committed) => {
            committed?;
            assert_eq!(session.state(), UnitOfWorkState::Committed);
        }
        Err(_) => assert_eq!(session.state(), UnitOfWorkState::Committing),
    }
    // The outcome is unknown to the session, so no further work is accepted.
    assert!(session.rollback().await.is_err());

    Ok(())
}
