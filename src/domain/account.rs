use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::Cents;

pub type AccountId = Uuid;

/// A balance-bearing account, addressed by its business `number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Unique business key (e.g. "12345")
    pub number: String,
    /// Current balance in cents
    pub balance: Cents,
}

impl Account {
    pub fn new(number: impl Into<String>, balance: Cents) -> Self {
        Self {
            id: Uuid::new_v4(),
            number: number.into(),
            balance,
        }
    }

    /// Returns true if the balance covers `amount` without going negative.
    pub fn can_cover(&self, amount: Cents) -> bool {
        self.balance >= amount
    }

    /// Add `amount` to the balance. The balance is left untouched on overflow.
    pub fn credit(&mut self, amount: Cents) -> Result<(), BalanceOverflow> {
        let balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| BalanceOverflow::new(self, i128::from(amount)))?;
        self.balance = balance;
        Ok(())
    }

    /// Subtract `amount` from the balance. The balance is left untouched on overflow.
    pub fn debit(&mut self, amount: Cents) -> Result<(), BalanceOverflow> {
        let balance = self
            .balance
            .checked_sub(amount)
            .ok_or_else(|| BalanceOverflow::new(self, -i128::from(amount)))?;
        self.balance = balance;
        Ok(())
    }
}

/// Applying a change would take a balance outside the representable range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("balance of account {account} ({balance}) cannot absorb a change of {change}")]
pub struct BalanceOverflow {
    pub account: String,
    pub balance: Cents,
    pub change: i128,
}

impl BalanceOverflow {
    fn new(account: &Account, change: i128) -> Self {
        Self {
            account: account.number.clone(),
            balance: account.balance,
            change,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_and_debit() {
        let mut account = Account::new("12345", 10000);
        account.debit(2500).unwrap();
        assert_eq!(account.balance, 7500);
        account.credit(500).unwrap();
        assert_eq!(account.balance, 8000);
    }

    #[test]
    fn test_overflow_leaves_balance_untouched() {
        let mut account = Account::new("12345", 10000);
        let err = account.credit(i64::MAX - 5000).unwrap_err();
        assert_eq!(err.account, "12345");
        assert_eq!(err.balance, 10000);
        assert_eq!(account.balance, 10000);

        let mut overdrawn = Account::new("67890", i64::MIN + 10);
        assert!(overdrawn.debit(11).is_err());
        assert_eq!(overdrawn.balance, i64::MIN + 10);
    }

    #[test]
    fn test_can_cover() {
        let account = Account::new("12345", 10000);
        assert!(account.can_cover(10000));
        assert!(!account.can_cover(10001));
    }

    #[test]
    fn test_document_shape() {
        let account = Account::new("67890", 35000);
        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["number"], "67890");
        assert_eq!(json["balance"], 35000);
        assert_eq!(json["id"], account.id.to_string());
    }
}
