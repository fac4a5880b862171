use chrono::{DateTime, Utc};
use thiserror::Error;

use super::{AccountId, AccountStatus, Cents, PassbookStatus};

/// Input rejected before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Cents),

    #[error("currency mismatch: account {account_number} holds {account_currency}, posting is in {posting_currency}")]
    CurrencyMismatch {
        account_number: String,
        account_currency: String,
        posting_currency: String,
    },

    #[error("account {account_number} cannot accept postings while {status}")]
    AccountNotPostable {
        account_number: String,
        status: AccountStatus,
    },

    #[error("unknown account: {0}")]
    UnknownAccount(AccountId),

    #[error("transaction date {date} is earlier than the last entry on the account ({last})")]
    Backdated {
        date: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("balance arithmetic overflow")]
    Overflow,

    #[error("transfer source and destination must be different accounts")]
    SameAccount,

    #[error("sequence already exists: {0}")]
    SequenceExists(String),

    #[error("sequence value {0} is out of range")]
    SequenceValueOutOfRange(u64),

    #[error("invalid date range: {start} is after {end}")]
    InvalidDateRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("page size {size} must be between 1 and {max}")]
    InvalidPageSize { size: u32, max: u32 },

    #[error("account {account_number} must have a zero balance before closing (balance {balance})")]
    NonZeroBalance {
        account_number: String,
        balance: Cents,
    },

    #[error("account {0} is already closed")]
    AlreadyClosed(String),

    #[error("no passbook lines to record")]
    NothingToPrint,

    #[error("passbook lines must continue after the last printed entry, in ledger order")]
    PrintOutOfOrder,

    #[error("{requested} lines do not fit on the passbook page ({remaining} remaining)")]
    PassbookPageFull { requested: u32, remaining: u32 },

    #[error("a passbook cannot be retired as {0}")]
    InvalidPassbookRetirement(PassbookStatus),
}
