use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Cents};

pub type EntryId = Uuid;

/// Whether an entry adds to or takes from the account balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    TransferIn,
    TransferOut,
    Interest,
    Fee,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Deposit => "deposit",
            EntryKind::Withdrawal => "withdrawal",
            EntryKind::TransferIn => "transfer_in",
            EntryKind::TransferOut => "transfer_out",
            EntryKind::Interest => "interest",
            EntryKind::Fee => "fee",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deposit" => Some(EntryKind::Deposit),
            "withdrawal" => Some(EntryKind::Withdrawal),
            "transfer_in" => Some(EntryKind::TransferIn),
            "transfer_out" => Some(EntryKind::TransferOut),
            "interest" => Some(EntryKind::Interest),
            "fee" => Some(EntryKind::Fee),
            _ => None,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            EntryKind::Deposit | EntryKind::TransferIn | EntryKind::Interest => Direction::Credit,
            EntryKind::Withdrawal | EntryKind::TransferOut | EntryKind::Fee => Direction::Debit,
        }
    }

    pub fn is_credit(&self) -> bool {
        self.direction() == Direction::Credit
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where the movement was initiated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Teller,
    Atm,
    Online,
    Mobile,
    Transfer,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Teller => "teller",
            Channel::Atm => "atm",
            Channel::Online => "online",
            Channel::Mobile => "mobile",
            Channel::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "teller" => Some(Channel::Teller),
            "atm" => Some(Channel::Atm),
            "online" => Some(Channel::Online),
            "mobile" => Some(Channel::Mobile),
            "transfer" => Some(Channel::Transfer),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One posted movement on one account. Entries are never updated or
/// deleted; corrections are posted as offsetting entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    /// Insertion order, assigned by storage. Breaks ties between entries
    /// sharing a `transaction_date`.
    pub seq: i64,
    pub transaction_number: String,
    pub account_id: AccountId,
    pub kind: EntryKind,
    /// Magnitude, always positive. The sign comes from `kind`.
    pub amount: Cents,
    pub currency: String,
    pub balance_before: Cents,
    pub balance_after: Cents,
    pub description: Option<String>,
    pub reference_number: Option<String>,
    pub channel: Channel,
    /// When the movement happened from the business point of view.
    pub transaction_date: DateTime<Utc>,
    /// When the ledger recorded it.
    pub processed_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

impl LedgerEntry {
    /// Signed effect of this entry on the balance.
    pub fn signed_amount(&self) -> Cents {
        match self.kind.direction() {
            Direction::Credit => self.amount,
            Direction::Debit => -self.amount,
        }
    }

    pub fn cursor(&self) -> EntryCursor {
        EntryCursor {
            transaction_date: self.transaction_date,
            seq: self.seq,
        }
    }
}

/// Position in an account's history under the (transaction_date, seq) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryCursor {
    pub transaction_date: DateTime<Utc>,
    pub seq: i64,
}

/// Storage keeps microsecond precision; anything finer is dropped up front
/// so an entry read back compares equal to the one that was posted.
pub fn normalize_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            EntryKind::Deposit,
            EntryKind::Withdrawal,
            EntryKind::TransferIn,
            EntryKind::TransferOut,
            EntryKind::Interest,
            EntryKind::Fee,
        ] {
            assert_eq!(EntryKind::from_str(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_kind_directions() {
        assert!(EntryKind::Deposit.is_credit());
        assert!(EntryKind::TransferIn.is_credit());
        assert!(EntryKind::Interest.is_credit());
        assert!(!EntryKind::Withdrawal.is_credit());
        assert!(!EntryKind::TransferOut.is_credit());
        assert!(!EntryKind::Fee.is_credit());
    }

    #[test]
    fn test_channel_roundtrip() {
        for channel in [
            Channel::Teller,
            Channel::Atm,
            Channel::Online,
            Channel::Mobile,
            Channel::Transfer,
        ] {
            assert_eq!(Channel::from_str(channel.as_str()), Some(channel));
        }
        assert_eq!(Channel::default(), Channel::Teller);
    }

    #[test]
    fn test_cursor_orders_by_date_then_seq() {
        let day = DateTime::parse_from_rfc3339("2024-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = day + chrono::Duration::seconds(1);

        let a = EntryCursor { transaction_date: day, seq: 9 };
        let b = EntryCursor { transaction_date: day, seq: 10 };
        let c = EntryCursor { transaction_date: later, seq: 1 };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_normalize_timestamp_drops_nanoseconds() {
        let ts = DateTime::parse_from_rfc3339("2024-03-01T09:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let normalized = normalize_timestamp(ts);
        assert_eq!(normalized.timestamp_subsec_nanos(), 123_456_000);
    }
}
