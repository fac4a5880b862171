use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use crate::domain::{
    AccountId, Cents, Channel, DateRange, EntryCursor, EntryKind, LedgerEntry, SortOrder,
};

use super::repository::{decode_timestamp, encode_timestamp};
use super::Repository;

const ENTRY_COLUMNS: &str = "seq, id, transaction_number, account_id, kind, amount, currency, balance_before, balance_after, description, reference_number, channel, transaction_date, processed_at, created_by";

const CREDIT_KINDS: &str = "('deposit', 'transfer_in', 'interest')";

/// Credit and debit totals over a date range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeTotals {
    pub credit_total: Cents,
    pub credit_count: u64,
    pub debit_total: Cents,
    pub debit_count: u64,
}

impl Repository {
    // ========================
    // Writes (inside a unit of work)
    // ========================

    /// Append an entry and return the storage-assigned `seq`.
    pub async fn insert_entry(conn: &mut SqliteConnection, entry: &LedgerEntry) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO ledger_entries (id, transaction_number, account_id, kind, amount, currency, balance_before, balance_after, description, reference_number, channel, transaction_date, processed_at, created_by)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING seq
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.transaction_number)
        .bind(entry.account_id.to_string())
        .bind(entry.kind.as_str())
        .bind(entry.amount)
        .bind(&entry.currency)
        .bind(entry.balance_before)
        .bind(entry.balance_after)
        .bind(&entry.description)
        .bind(&entry.reference_number)
        .bind(entry.channel.as_str())
        .bind(encode_timestamp(entry.transaction_date))
        .bind(encode_timestamp(entry.processed_at))
        .bind(&entry.created_by)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to save ledger entry")?;

        Ok(row.get("seq"))
    }

    /// Latest entry on an account, read inside the caller's transaction.
    pub async fn last_entry_on(
        conn: &mut SqliteConnection,
        account_id: AccountId,
    ) -> Result<Option<LedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE account_id = ? ORDER BY transaction_date DESC, seq DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(account_id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch last entry")?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    // ========================
    // Reads (lock-free, straight from the pool)
    // ========================

    pub async fn last_entry(&self, account_id: AccountId) -> Result<Option<LedgerEntry>> {
        let mut conn = self
            .pool()
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        Self::last_entry_on(&mut conn, account_id).await
    }

    /// One offset page plus the total number of entries, read from a single
    /// snapshot so the two agree.
    ///
    /// Only entries with `seq <= as_of` are visible. Without a bound the
    /// account's current highest `seq` is used and returned, so the caller
    /// can pin the following pages to it.
    pub async fn list_entries_page(
        &self,
        account_id: AccountId,
        offset: i64,
        limit: i64,
        order: SortOrder,
        as_of: Option<i64>,
    ) -> Result<(Vec<LedgerEntry>, u64, Option<i64>)> {
        let mut tx = self.begin().await?;

        let bound = match as_of {
            Some(seq) => Some(seq),
            None => sqlx::query_scalar::<_, Option<i64>>(
                "SELECT MAX(seq) FROM ledger_entries WHERE account_id = ?",
            )
            .bind(account_id.to_string())
            .fetch_one(&mut *tx)
            .await
            .context("Failed to read history bound")?,
        };
        let Some(bound) = bound else {
            tx.commit().await.context("Failed to end read transaction")?;
            return Ok((Vec::new(), 0, None));
        };

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM ledger_entries WHERE account_id = ? AND seq <= ?",
        )
        .bind(account_id.to_string())
        .bind(bound)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to count entries")?;

        let dir = order.as_sql();
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE account_id = ? AND seq <= ? ORDER BY transaction_date {dir}, seq {dir} LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(account_id.to_string())
            .bind(bound)
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *tx)
            .await
            .context("Failed to list entries")?;

        tx.commit().await.context("Failed to end read transaction")?;

        let entries = rows.iter().map(Self::row_to_entry).collect::<Result<Vec<_>>>()?;
        Ok((entries, u64::try_from(total).unwrap_or_default(), Some(bound)))
    }

    /// Keyset page: entries strictly after `cursor` in the given order.
    pub async fn list_entries_after(
        &self,
        account_id: AccountId,
        cursor: Option<EntryCursor>,
        limit: i64,
        order: SortOrder,
    ) -> Result<Vec<LedgerEntry>> {
        let mut conn = self
            .pool()
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        Self::list_entries_after_on(&mut conn, account_id, cursor, limit, order).await
    }

    pub async fn list_entries_after_on(
        conn: &mut SqliteConnection,
        account_id: AccountId,
        cursor: Option<EntryCursor>,
        limit: i64,
        order: SortOrder,
    ) -> Result<Vec<LedgerEntry>> {
        let dir = order.as_sql();
        let cmp = match order {
            SortOrder::Ascending => ">",
            SortOrder::Descending => "<",
        };

        let rows = match cursor {
            Some(cursor) => {
                let sql = format!(
                    "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE account_id = ? AND (transaction_date {cmp} ? OR (transaction_date = ? AND seq {cmp} ?)) ORDER BY transaction_date {dir}, seq {dir} LIMIT ?"
                );
                let date = encode_timestamp(cursor.transaction_date);
                sqlx::query(&sql)
                    .bind(account_id.to_string())
                    .bind(&date)
                    .bind(&date)
                    .bind(cursor.seq)
                    .bind(limit)
                    .fetch_all(&mut *conn)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE account_id = ? ORDER BY transaction_date {dir}, seq {dir} LIMIT ?"
                );
                sqlx::query(&sql)
                    .bind(account_id.to_string())
                    .bind(limit)
                    .fetch_all(&mut *conn)
                    .await
            }
        }
        .context("Failed to list entries after cursor")?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Entries with `range.start <= transaction_date < range.end`, ascending.
    pub async fn list_entries_in_range(
        &self,
        account_id: AccountId,
        range: DateRange,
        page: Option<(i64, i64)>,
    ) -> Result<Vec<LedgerEntry>> {
        let mut conn = self
            .pool()
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        Self::list_entries_in_range_on(&mut conn, account_id, range, page).await
    }

    pub async fn list_entries_in_range_on(
        conn: &mut SqliteConnection,
        account_id: AccountId,
        range: DateRange,
        page: Option<(i64, i64)>,
    ) -> Result<Vec<LedgerEntry>> {
        let (offset, limit) = page.unwrap_or((0, -1));
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE account_id = ? AND transaction_date >= ? AND transaction_date < ? ORDER BY transaction_date ASC, seq ASC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(account_id.to_string())
            .bind(encode_timestamp(range.start))
            .bind(encode_timestamp(range.end))
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut *conn)
            .await
            .context("Failed to list entries in range")?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    /// Sum of `amount` for one kind over a range; zero when nothing matches.
    pub async fn sum_amount(
        &self,
        account_id: AccountId,
        kind: EntryKind,
        range: DateRange,
    ) -> Result<Cents> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM ledger_entries
            WHERE account_id = ? AND kind = ? AND transaction_date >= ? AND transaction_date < ?
            "#,
        )
        .bind(account_id.to_string())
        .bind(kind.as_str())
        .bind(encode_timestamp(range.start))
        .bind(encode_timestamp(range.end))
        .fetch_one(self.pool())
        .await
        .context("Failed to sum entries")?;

        Ok(total)
    }

    pub async fn count_in_range(&self, account_id: AccountId, range: DateRange) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM ledger_entries
            WHERE account_id = ? AND transaction_date >= ? AND transaction_date < ?
            "#,
        )
        .bind(account_id.to_string())
        .bind(encode_timestamp(range.start))
        .bind(encode_timestamp(range.end))
        .fetch_one(self.pool())
        .await
        .context("Failed to count entries in range")?;

        Ok(u64::try_from(count).unwrap_or_default())
    }

    pub async fn range_totals_on(
        conn: &mut SqliteConnection,
        account_id: AccountId,
        range: DateRange,
    ) -> Result<RangeTotals> {
        let sql = format!(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN kind IN {CREDIT_KINDS} THEN amount ELSE 0 END), 0) AS credit_total,
                COALESCE(SUM(CASE WHEN kind IN {CREDIT_KINDS} THEN 1 ELSE 0 END), 0) AS credit_count,
                COALESCE(SUM(CASE WHEN kind NOT IN {CREDIT_KINDS} THEN amount ELSE 0 END), 0) AS debit_total,
                COALESCE(SUM(CASE WHEN kind NOT IN {CREDIT_KINDS} THEN 1 ELSE 0 END), 0) AS debit_count
            FROM ledger_entries
            WHERE account_id = ? AND transaction_date >= ? AND transaction_date < ?
            "#
        );
        let row = sqlx::query(&sql)
            .bind(account_id.to_string())
            .bind(encode_timestamp(range.start))
            .bind(encode_timestamp(range.end))
            .fetch_one(&mut *conn)
            .await
            .context("Failed to total entries in range")?;

        Ok(RangeTotals {
            credit_total: row.get("credit_total"),
            credit_count: u64::try_from(row.get::<i64, _>("credit_count")).unwrap_or_default(),
            debit_total: row.get("debit_total"),
            debit_count: u64::try_from(row.get::<i64, _>("debit_count")).unwrap_or_default(),
        })
    }

    /// Latest entry strictly before `ts`.
    pub async fn last_entry_before_on(
        conn: &mut SqliteConnection,
        account_id: AccountId,
        ts: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE account_id = ? AND transaction_date < ? ORDER BY transaction_date DESC, seq DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(account_id.to_string())
            .bind(encode_timestamp(ts))
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch entry before date")?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    /// Earliest entry at or after `ts`.
    pub async fn first_entry_from_on(
        conn: &mut SqliteConnection,
        account_id: AccountId,
        ts: DateTime<Utc>,
    ) -> Result<Option<LedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE account_id = ? AND transaction_date >= ? ORDER BY transaction_date ASC, seq ASC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(account_id.to_string())
            .bind(encode_timestamp(ts))
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch entry from date")?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    pub async fn get_entry_by_number(&self, transaction_number: &str) -> Result<Option<LedgerEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE transaction_number = ?");
        let row = sqlx::query(&sql)
            .bind(transaction_number)
            .fetch_optional(self.pool())
            .await
            .context("Failed to fetch entry by transaction number")?;

        row.as_ref().map(Self::row_to_entry).transpose()
    }

    pub async fn list_entries_by_reference(&self, reference_number: &str) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE reference_number = ? ORDER BY transaction_date ASC, seq ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(reference_number)
            .fetch_all(self.pool())
            .await
            .context("Failed to list entries by reference")?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    fn row_to_entry(row: &SqliteRow) -> Result<LedgerEntry> {
        let id_str: String = row.get("id");
        let account_id_str: String = row.get("account_id");
        let kind_str: String = row.get("kind");
        let channel_str: String = row.get("channel");
        let transaction_date_str: String = row.get("transaction_date");
        let processed_at_str: String = row.get("processed_at");

        Ok(LedgerEntry {
            id: Uuid::parse_str(&id_str).context("Invalid entry ID")?,
            seq: row.get("seq"),
            transaction_number: row.get("transaction_number"),
            account_id: Uuid::parse_str(&account_id_str).context("Invalid account ID")?,
            kind: EntryKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid entry kind: {}", kind_str))?,
            amount: row.get("amount"),
            currency: row.get("currency"),
            balance_before: row.get("balance_before"),
            balance_after: row.get("balance_after"),
            description: row.get("description"),
            reference_number: row.get("reference_number"),
            channel: Channel::from_str(&channel_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid channel: {}", channel_str))?,
            transaction_date: decode_timestamp(&transaction_date_str)
                .context("Invalid transaction_date")?,
            processed_at: decode_timestamp(&processed_at_str).context("Invalid processed_at")?,
            created_by: row.get("created_by"),
        })
    }
}
