use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, EntryCursor};

/// Lines printed on a fresh passbook page.
pub const DEFAULT_LINES_PER_PAGE: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassbookStatus {
    Active,
    Full,
    Lost,
    Replaced,
    Closed,
}

impl PassbookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassbookStatus::Active => "active",
            PassbookStatus::Full => "full",
            PassbookStatus::Lost => "lost",
            PassbookStatus::Replaced => "replaced",
            PassbookStatus::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(PassbookStatus::Active),
            "full" => Some(PassbookStatus::Full),
            "lost" => Some(PassbookStatus::Lost),
            "replaced" => Some(PassbookStatus::Replaced),
            "closed" => Some(PassbookStatus::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PassbookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Print state of the physical passbook issued for an account.
///
/// `last_printed` is the cursor of the last ledger entry put on paper;
/// the next print resumes strictly after it. An account has at most one
/// active passbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passbook {
    pub id: Uuid,
    pub account_id: AccountId,
    pub passbook_number: String,
    pub current_page: u32,
    pub last_printed_line: u32,
    pub lines_per_page: u32,
    pub last_printed: Option<EntryCursor>,
    pub last_print_date: Option<DateTime<Utc>>,
    pub status: PassbookStatus,
    pub issued_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

impl Passbook {
    pub fn new(account_id: AccountId, passbook_number: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            passbook_number,
            current_page: 1,
            last_printed_line: 0,
            lines_per_page: DEFAULT_LINES_PER_PAGE,
            last_printed: None,
            last_print_date: None,
            status: PassbookStatus::Active,
            issued_at: super::normalize_timestamp(Utc::now()),
            created_by: None,
        }
    }

    pub fn with_created_by(mut self, actor: impl Into<String>) -> Self {
        self.created_by = Some(actor.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == PassbookStatus::Active
    }

    pub fn remaining_lines(&self) -> u32 {
        self.lines_per_page.saturating_sub(self.last_printed_line)
    }

    pub fn advance_to_next_page(&mut self) {
        self.current_page += 1;
        self.last_printed_line = 0;
    }

    /// Move the print position past `lines` printed lines ending at `last`.
    /// A page that fills up turns over.
    pub fn record_print(&mut self, lines: u32, last: EntryCursor, at: DateTime<Utc>) {
        self.last_printed_line += lines;
        self.last_printed = Some(last);
        self.last_print_date = Some(at);
        if self.last_printed_line >= self.lines_per_page {
            self.advance_to_next_page();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(seq: i64) -> EntryCursor {
        EntryCursor {
            transaction_date: DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            seq,
        }
    }

    #[test]
    fn test_new_passbook_starts_on_first_line() {
        let passbook = Passbook::new(Uuid::new_v4(), "PB0000001".into());
        assert_eq!(passbook.current_page, 1);
        assert_eq!(passbook.last_printed_line, 0);
        assert_eq!(passbook.remaining_lines(), DEFAULT_LINES_PER_PAGE);
        assert!(passbook.is_active());
        assert!(passbook.last_printed.is_none());
    }

    #[test]
    fn test_full_page_turns_over() {
        let mut passbook = Passbook::new(Uuid::new_v4(), "PB0000001".into());
        passbook.lines_per_page = 5;

        passbook.record_print(3, cursor(3), Utc::now());
        assert_eq!((passbook.current_page, passbook.last_printed_line), (1, 3));
        assert_eq!(passbook.remaining_lines(), 2);

        passbook.record_print(2, cursor(5), Utc::now());
        assert_eq!((passbook.current_page, passbook.last_printed_line), (2, 0));
        assert_eq!(passbook.last_printed, Some(cursor(5)));
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            PassbookStatus::Active,
            PassbookStatus::Full,
            PassbookStatus::Lost,
            PassbookStatus::Replaced,
            PassbookStatus::Closed,
        ] {
            assert_eq!(PassbookStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(PassbookStatus::from_str("shredded"), None);
    }
}
