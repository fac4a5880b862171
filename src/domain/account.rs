use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Cents;

pub type AccountId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
    Frozen,
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
            AccountStatus::Frozen => "frozen",
            AccountStatus::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(AccountStatus::Active),
            "inactive" => Some(AccountStatus::Inactive),
            "frozen" => Some(AccountStatus::Frozen),
            "closed" => Some(AccountStatus::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the ledger needs to know about an account in order to post to it.
///
/// Personal, corporate and product-specific accounts all reduce to this
/// capability set; the posting rules never look past it.
pub trait PostingAccount {
    fn account_number(&self) -> &str;
    fn currency(&self) -> &str;
    fn balance(&self) -> Cents;
    fn allows_overdraft(&self) -> bool;
    fn status(&self) -> AccountStatus;

    fn is_postable(&self) -> bool {
        self.status() == AccountStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub account_number: String,
    pub name: String,
    pub currency: String,
    pub balance: Cents,
    pub status: AccountStatus,
    pub allow_overdraft: bool,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
}

impl Account {
    /// A new, empty account. The account number is minted by the caller.
    pub fn new(account_number: String, name: String, currency: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_number,
            name,
            currency: currency.to_uppercase(),
            balance: 0,
            status: AccountStatus::Active,
            allow_overdraft: false,
            opened_at: Utc::now(),
            closed_at: None,
            created_by: None,
        }
    }

    pub fn with_overdraft(mut self, allow: bool) -> Self {
        self.allow_overdraft = allow;
        self
    }

    pub fn with_created_by(mut self, actor: impl Into<String>) -> Self {
        self.created_by = Some(actor.into());
        self
    }

    pub fn is_closed(&self) -> bool {
        self.status == AccountStatus::Closed
    }
}

impl PostingAccount for Account {
    fn account_number(&self) -> &str {
        &self.account_number
    }

    fn currency(&self) -> &str {
        &self.currency
    }

    fn balance(&self) -> Cents {
        self.balance
    }

    fn allows_overdraft(&self) -> bool {
        self.allow_overdraft
    }

    fn status(&self) -> AccountStatus {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            AccountStatus::Active,
            AccountStatus::Inactive,
            AccountStatus::Frozen,
            AccountStatus::Closed,
        ] {
            assert_eq!(AccountStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(AccountStatus::from_str("dormant"), None);
    }

    #[test]
    fn test_new_account_is_active_and_empty() {
        let account = Account::new("A2000001".into(), "Savings".into(), "idr".into());
        assert_eq!(account.balance, 0);
        assert_eq!(account.currency, "IDR");
        assert!(account.is_postable());
        assert!(!account.allows_overdraft());
    }

    #[test]
    fn test_only_active_accounts_are_postable() {
        let mut account = Account::new("A2000002".into(), "Current".into(), "IDR".into());
        for status in [
            AccountStatus::Inactive,
            AccountStatus::Frozen,
            AccountStatus::Closed,
        ] {
            account.status = status;
            assert!(!account.is_postable(), "{status} must not be postable");
        }
    }
}
