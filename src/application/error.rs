use thiserror::Error;

use crate::domain::{Cents, PostingError, ValidationError};

/// What could not be found.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    #[error("sequence not found: {0}")]
    Sequence(String),

    #[error("account not found: {0}")]
    Account(String),

    #[error("transaction not found: {0}")]
    Transaction(String),

    #[error("no active passbook for account: {0}")]
    Passbook(String),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Insufficient funds in account {account_number}: balance {balance}, required {required}")]
    InsufficientFunds {
        account_number: String,
        balance: Cents,
        required: Cents,
    },

    #[error("Timed out waiting for a lock: {0}")]
    ConcurrencyTimeout(String),

    #[error(transparent)]
    NotFound(#[from] NotFound),

    #[error("Sequence exhausted: {0}")]
    SequenceExhausted(String),

    #[error("Ledger integrity violation: {0}")]
    Integrity(String),

    #[error("Database error: {0:#}")]
    Database(anyhow::Error),
}

impl LedgerError {
    /// Only lock timeouts are worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrencyTimeout(_))
    }
}

impl From<PostingError> for LedgerError {
    fn from(err: PostingError) -> Self {
        match err {
            PostingError::Invalid(invalid) => LedgerError::Validation(invalid),
            PostingError::InsufficientFunds {
                account_number,
                balance,
                required,
            } => LedgerError::InsufficientFunds {
                account_number,
                balance,
                required,
            },
        }
    }
}

impl From<anyhow::Error> for LedgerError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<sqlx::Error>() {
            Some(sqlx_err) if is_lock_timeout(sqlx_err) => {
                LedgerError::ConcurrencyTimeout(format!("{err:#}"))
            }
            _ => LedgerError::Database(err),
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::from(anyhow::Error::new(err))
    }
}

/// SQLITE_BUSY / SQLITE_LOCKED (and their extended codes), or no pooled
/// connection within the acquire timeout.
fn is_lock_timeout(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, 5 | 6)),
        _ => false,
    }
}
