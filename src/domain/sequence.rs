use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimum number of digits in a formatted business identifier.
pub const IDENTIFIER_WIDTH: usize = 7;

/// Well-known counter names used by the surrounding application.
pub mod names {
    pub const CUSTOMER_NUMBER: &str = "CUSTOMER_NUMBER";
    pub const ACCOUNT_NUMBER: &str = "ACCOUNT_NUMBER";
    pub const TRANSACTION_NUMBER: &str = "TRANSACTION_NUMBER";
    pub const PASSBOOK_NUMBER: &str = "PASSBOOK_NUMBER";
}

/// A named, persisted counter. `last_number` is the value most recently
/// handed out; the next caller receives `last_number + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceCounter {
    pub name: String,
    pub prefix: Option<String>,
    pub last_number: u64,
    pub updated_at: DateTime<Utc>,
}

impl SequenceCounter {
    /// Identifier the counter would produce for `number`.
    pub fn identifier(&self, number: u64) -> String {
        format_identifier(self.prefix.as_deref(), number)
    }
}

/// `prefix + number` zero-padded to [`IDENTIFIER_WIDTH`] digits.
/// Numbers wider than the padding are rendered in full, never truncated.
pub fn format_identifier(prefix: Option<&str>, number: u64) -> String {
    format!(
        "{}{:0width$}",
        prefix.unwrap_or_default(),
        number,
        width = IDENTIFIER_WIDTH
    )
}
