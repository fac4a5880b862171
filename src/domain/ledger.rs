use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Cents, Direction, EntryKind, LedgerEntry, PostingAccount, ValidationError};

/// Why a posting was refused by the ledger rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PostingError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("insufficient funds in account {account_number}: balance {balance}, required {required}")]
    InsufficientFunds {
        account_number: String,
        balance: Cents,
        required: Cents,
    },
}

/// Apply one movement to a balance with exact integer arithmetic.
pub fn apply_movement(
    balance_before: Cents,
    kind: EntryKind,
    amount: Cents,
) -> Result<Cents, ValidationError> {
    let result = match kind.direction() {
        Direction::Credit => balance_before.checked_add(amount),
        Direction::Debit => balance_before.checked_sub(amount),
    };
    result.ok_or(ValidationError::Overflow)
}

/// Check a posting against the account it targets and return the
/// resulting balance. Nothing here touches storage; the caller must hold
/// the account lock so `account.balance()` is current.
pub fn check_posting<A: PostingAccount>(
    account: &A,
    kind: EntryKind,
    amount: Cents,
    currency: &str,
) -> Result<Cents, PostingError> {
    if amount <= 0 {
        return Err(ValidationError::NonPositiveAmount(amount).into());
    }
    if !account.is_postable() {
        return Err(ValidationError::AccountNotPostable {
            account_number: account.account_number().to_string(),
            status: account.status(),
        }
        .into());
    }
    if account.currency() != currency {
        return Err(ValidationError::CurrencyMismatch {
            account_number: account.account_number().to_string(),
            account_currency: account.currency().to_string(),
            posting_currency: currency.to_string(),
        }
        .into());
    }

    let balance_after = apply_movement(account.balance(), kind, amount)?;

    if kind.direction() == Direction::Debit && balance_after < 0 && !account.allows_overdraft() {
        return Err(PostingError::InsufficientFunds {
            account_number: account.account_number().to_string(),
            balance: account.balance(),
            required: amount,
        });
    }

    Ok(balance_after)
}

/// The first inconsistency found while replaying an account's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ChainBreak {
    #[error("entry {transaction_number}: balance_before {actual} does not continue from {expected}")]
    Link {
        transaction_number: String,
        expected: Cents,
        actual: Cents,
    },

    #[error("entry {transaction_number}: balance_after {actual} should be {expected}")]
    Arithmetic {
        transaction_number: String,
        expected: Cents,
        actual: Cents,
    },

    #[error("entry {transaction_number}: amount {amount} is not positive")]
    NonPositiveAmount {
        transaction_number: String,
        amount: Cents,
    },

    #[error("entry {transaction_number} is out of order")]
    OutOfOrder { transaction_number: String },

    #[error("history ends at {history} but the account balance is {account}")]
    FinalBalance { history: Cents, account: Cents },
}

/// Replays entries in ascending (transaction_date, seq) order one at a time,
/// so arbitrarily long histories can be checked page by page.
#[derive(Debug, Clone)]
pub struct ChainWalker {
    balance: Cents,
    last: Option<super::EntryCursor>,
    checked: u64,
}

impl ChainWalker {
    pub fn new(opening_balance: Cents) -> Self {
        Self {
            balance: opening_balance,
            last: None,
            checked: 0,
        }
    }

    pub fn push(&mut self, entry: &LedgerEntry) -> Result<(), ChainBreak> {
        let cursor = entry.cursor();
        if self.last.is_some_and(|last| cursor <= last) {
            return Err(ChainBreak::OutOfOrder {
                transaction_number: entry.transaction_number.clone(),
            });
        }
        if entry.amount <= 0 {
            return Err(ChainBreak::NonPositiveAmount {
                transaction_number: entry.transaction_number.clone(),
                amount: entry.amount,
            });
        }
        if entry.balance_before != self.balance {
            return Err(ChainBreak::Link {
                transaction_number: entry.transaction_number.clone(),
                expected: self.balance,
                actual: entry.balance_before,
            });
        }
        let expected_after = apply_movement(entry.balance_before, entry.kind, entry.amount)
            .map_err(|_| ChainBreak::Arithmetic {
                transaction_number: entry.transaction_number.clone(),
                expected: entry.balance_before,
                actual: entry.balance_after,
            })?;
        if entry.balance_after != expected_after {
            return Err(ChainBreak::Arithmetic {
                transaction_number: entry.transaction_number.clone(),
                expected: expected_after,
                actual: entry.balance_after,
            });
        }

        self.balance = entry.balance_after;
        self.last = Some(cursor);
        self.checked += 1;
        Ok(())
    }

    /// Balance after the last entry pushed.
    pub fn balance(&self) -> Cents {
        self.balance
    }

    pub fn checked(&self) -> u64 {
        self.checked
    }

    /// Compare the replayed balance with the balance stored on the account.
    pub fn finish(self, account_balance: Cents) -> Result<Cents, ChainBreak> {
        if self.balance != account_balance {
            return Err(ChainBreak::FinalBalance {
                history: self.balance,
                account: account_balance,
            });
        }
        Ok(self.balance)
    }
}

/// Replay a complete ascending history and return the closing balance.
pub fn verify_chain(entries: &[LedgerEntry], opening_balance: Cents) -> Result<Cents, ChainBreak> {
    let mut walker = ChainWalker::new(opening_balance);
    for entry in entries {
        walker.push(entry)?;
    }
    Ok(walker.balance())
}

/// Outcome of replaying an account's stored history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub account_number: String,
    pub entries_checked: u64,
    pub replayed_balance: Cents,
    pub account_balance: Cents,
    pub failure: Option<ChainBreak>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.failure.is_none()
    }
}
