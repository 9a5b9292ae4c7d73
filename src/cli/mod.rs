use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::application::{LedgerService, TransferReceipt};
use crate::config::LedgerConfig;
use crate::domain::{format_cents, parse_cents, Account, AuditAction, Cents};

/// Coffer - transactional account ledger
#[derive(Parser)]
#[command(name = "coffer")]
#[command(about = "Account transfers and audited deposits with all-or-nothing units of work")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "coffer.db")]
    pub database: String,

    /// Maximum pooled database connections
    #[arg(long, default_value_t = 4)]
    pub max_connections: u32,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Open the demo accounts (12345 with 100.00, 67890 with 350.00)
    Seed,

    /// Open a new account
    Open {
        /// Account number (must be unique)
        number: String,

        /// Opening balance (e.g., "50.00" or "50")
        #[arg(short, long, default_value = "0")]
        balance: String,
    },

    /// Move money between two accounts
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Source account number
        #[arg(long)]
        from: String,

        /// Target account number
        #[arg(long)]
        to: String,

        /// Submit both updates as one batch instead of an explicit session
        #[arg(long)]
        implicit: bool,
    },

    /// Credit an account and record an audit entry
    Deposit {
        /// Amount to deposit
        amount: String,

        /// Account number
        #[arg(long)]
        to: String,
    },

    /// Show balance for an account or all accounts
    Balance {
        /// Account number (omit for all accounts)
        account: Option<String>,
    },

    /// List audit entries
    Audit {
        /// Only show entries with this action (deposit, withdrawal, transfer, accountopened)
        #[arg(long, value_parser = parse_action)]
        action: Option<AuditAction>,
    },

    /// Run the full demo: seed, implicit transfer, explicit transfer, audited deposit
    Demo,
}

impl Cli {
    /// Install the global tracing subscriber. `RUST_LOG` wins over `--verbose`.
    pub fn init_tracing(&self) {
        let default_level = if self.verbose { "coffer=debug" } else { "coffer=warn" };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    fn config(&self) -> LedgerConfig {
        LedgerConfig::new(&self.database).with_max_connections(self.max_connections)
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config();

        match self.command {
            Commands::Init => {
                LedgerService::init(&config).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Seed => {
                let service = LedgerService::connect(&config).await?;
                for account in service.seed_demo_accounts().await? {
                    println!(
                        "Opened account {} with {}",
                        account.number,
                        format_cents(account.balance)
                    );
                }
            }

            Commands::Open { number, balance } => {
                let service = LedgerService::connect(&config).await?;
                let balance = parse_amount(&balance)?;
                let account = service.open_account(&number, balance).await?;
                println!(
                    "Opened account {} with {} ({})",
                    account.number,
                    format_cents(account.balance),
                    account.id
                );
            }

            Commands::Transfer {
                amount,
                from,
                to,
                implicit,
            } => {
                let service = LedgerService::connect(&config).await?;
                let amount = parse_amount(&amount)?;

                let receipt = if implicit {
                    service.transfer_implicit(&from, &to, amount).await?
                } else {
                    service.transfer(&from, &to, amount).await?
                };
                print_transfer(&receipt);
            }

            Commands::Deposit { amount, to } => {
                let service = LedgerService::connect(&config).await?;
                let amount = parse_amount(&amount)?;
                let receipt = service.deposit_with_audit(&to, amount).await?;
                println!(
                    "Deposited {} to {} (balance {})",
                    format_cents(amount),
                    receipt.account.number,
                    format_cents(receipt.account.balance)
                );
                println!("Audit: [{}] {}", receipt.entry.action, receipt.entry.details);
            }

            Commands::Balance { account } => {
                let service = LedgerService::connect(&config).await?;
                run_balance_command(&service, account).await?;
            }

            Commands::Audit { action } => {
                let service = LedgerService::connect(&config).await?;
                run_audit_command(&service, action).await?;
            }

            Commands::Demo => {
                let service = LedgerService::init(&config).await?;
                run_demo(&service).await?;
            }
        }

        Ok(())
    }
}

fn parse_amount(input: &str) -> Result<Cents> {
    parse_cents(input)
        .with_context(|| format!("Invalid amount '{}'. Use '50.00' or '50'", input))
}

fn parse_action(input: &str) -> Result<AuditAction, String> {
    AuditAction::from_str(input).ok_or_else(|| format!("unknown audit action '{}'", input))
}

fn print_transfer(receipt: &TransferReceipt) {
    println!(
        "Transferred {} {} -> {} ({})",
        format_cents(receipt.amount),
        receipt.source.number,
        receipt.target.number,
        receipt.mode
    );
    println!(
        "  {}: {}    {}: {}",
        receipt.source.number,
        format_cents(receipt.source.balance),
        receipt.target.number,
        format_cents(receipt.target.balance)
    );
}

async fn run_balance_command(service: &LedgerService, account: Option<String>) -> Result<()> {
    match account {
        Some(number) => {
            let account = service.get_account(&number).await?;
            println!("{}: {}", account.number, format_cents(account.balance));
        }
        None => {
            let accounts = service.list_accounts().await?;
            if accounts.is_empty() {
                println!("No accounts found.");
                return Ok(());
            }

            println!("{:<16} {:>14}", "ACCOUNT", "BALANCE");
            println!("{}", "-".repeat(31));
            for account in &accounts {
                println!("{:<16} {:>14}", account.number, format_cents(account.balance));
            }
            println!("{}", "-".repeat(31));
            let total = match total_balance(&accounts) {
                Some(total) => format_cents(total),
                None => "out of range".to_string(),
            };
            println!("{:<16} {:>14}", "TOTAL", total);
        }
    }
    Ok(())
}

/// Sum of all balances, or `None` when it does not fit in `Cents`.
fn total_balance(accounts: &[Account]) -> Option<Cents> {
    accounts
        .iter()
        .try_fold(0 as Cents, |total, account| total.checked_add(account.balance))
}

async fn run_audit_command(service: &LedgerService, action: Option<AuditAction>) -> Result<()> {
    let entries: Vec<_> = service
        .list_audit_logs()
        .await?
        .into_iter()
        .filter(|entry| action.is_none_or(|action| entry.action == action))
        .collect();
    if entries.is_empty() {
        println!("No audit entries.");
        return Ok(());
    }

    println!("{:<26} {:<14} DETAILS", "TIMESTAMP", "ACTION");
    for entry in entries {
        println!(
            "{:<26} {:<14} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            entry.action,
            entry.details
        );
    }
    Ok(())
}

/// Walk through both execution modes. The explicit transfer is expected to be
/// rejected after the implicit one empties account 12345.
async fn run_demo(service: &LedgerService) -> Result<()> {
    if service.list_accounts().await?.is_empty() {
        service.seed_demo_accounts().await?;
        println!("Seeded demo accounts");
    }
    run_balance_command(service, None).await?;

    println!("\n== Implicit transfer 100.00: 12345 -> 67890");
    match service.transfer_implicit("12345", "67890", 10000).await {
        Ok(receipt) => print_transfer(&receipt),
        Err(err) if err.is_domain() => println!("Transfer rejected: {}", err),
        Err(err) => return Err(err.into()),
    }

    println!("\n== Explicit transfer 100.00: 12345 -> 67890");
    match service.transfer("12345", "67890", 10000).await {
        Ok(receipt) => print_transfer(&receipt),
        Err(err) if err.is_domain() => println!("Transfer rejected, rolled back: {}", err),
        Err(err) => return Err(err.into()),
    }

    println!("\n== Deposit 500.00 to 12345 with audit");
    let receipt = service.deposit_with_audit("12345", 50000).await?;
    println!("Audit: [{}] {}", receipt.entry.action, receipt.entry.details);

    println!();
    run_balance_command(service, None).await?;
    Ok(())
}
