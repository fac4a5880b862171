use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{EntryCursor, ValidationError};

/// Largest page a single read may request.
pub const MAX_PAGE_SIZE: u32 = 5_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

/// Half-open interval `[start, end)` over `transaction_date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Whole calendar days `first..=last`, i.e. `[first 00:00, last + 1 day 00:00)`.
    pub fn days(first: NaiveDate, last: NaiveDate) -> Result<Self, ValidationError> {
        let start = first.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = last
            .and_time(chrono::NaiveTime::MIN)
            .checked_add_signed(Duration::days(1))
            .ok_or(ValidationError::InvalidDateRange {
                start,
                end: DateTime::<Utc>::MAX_UTC,
            })?
            .and_utc();
        Self::new(start, end)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// Offset pagination. Pages are zero-indexed.
///
/// `as_of` pins the page to the entries that existed when the first page
/// was read (every `seq` up to and including it). Entries posted later
/// stay out of the walk, so pages neither repeat nor skip rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
    #[serde(default)]
    pub as_of: Option<i64>,
}

impl PageRequest {
    pub fn new(page: u32, size: u32) -> Result<Self, ValidationError> {
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(ValidationError::InvalidPageSize {
                size,
                max: MAX_PAGE_SIZE,
            });
        }
        Ok(Self {
            page,
            size,
            as_of: None,
        })
    }

    pub fn pinned_to(mut self, seq: i64) -> Self {
        self.as_of = Some(seq);
        self
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page) * i64::from(self.size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.size)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total_items: u64,
    /// Highest `seq` this page was read against; `None` while the history
    /// is empty.
    pub as_of: Option<i64>,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        self.total_items.div_ceil(u64::from(self.size.max(1)))
    }

    pub fn has_next(&self) -> bool {
        u64::from(self.page) + 1 < self.total_pages()
    }

    /// Request for the following page, pinned to the same snapshot.
    pub fn next_request(&self) -> Option<PageRequest> {
        if !self.has_next() {
            return None;
        }
        Some(PageRequest {
            page: self.page + 1,
            size: self.size,
            as_of: self.as_of,
        })
    }
}

/// A slice of history read with keyset pagination. Feeding `next` back in
/// continues exactly after the last item returned, whatever was inserted
/// in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next: Option<EntryCursor>,
}
