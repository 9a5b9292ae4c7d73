// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use coffer::application::LedgerService;
use coffer::config::LedgerConfig;
use coffer::domain::Cents;
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let config = LedgerConfig::new(temp_dir.path().join("test.db"));
    let service = LedgerService::init(&config).await?;
    Ok((service, temp_dir))
}

/// Helper to create a test service with the two demo accounts opened
pub async fn seeded_service() -> Result<(LedgerService, TempDir)> {
    let (service, temp_dir) = test_service().await?;
    service.seed_demo_accounts().await?;
    Ok((service, temp_dir))
}

/// Committed balance of an account, as an outside reader sees it
pub async fn balance_of(service: &LedgerService, number: &str) -> Result<Cents> {
    Ok(service.get_account(number).await?.balance)
}
