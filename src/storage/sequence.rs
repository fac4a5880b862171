use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use crate::domain::SequenceCounter;

use super::repository::{decode_timestamp, encode_timestamp};
use super::Repository;

/// Result of trying to advance a counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Issued { number: u64, prefix: Option<String> },
    Exhausted,
    Missing,
}

impl Repository {
    /// Insert a counter row. Returns false when the name is already taken.
    pub async fn insert_sequence(
        &self,
        name: &str,
        prefix: Option<&str>,
        start: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO sequence_counters (name, prefix, last_number, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(prefix.filter(|p| !p.is_empty()))
        .bind(start)
        .bind(encode_timestamp(Utc::now()))
        .execute(self.pool())
        .await
        .context("Failed to create sequence")?;

        Ok(result.rows_affected() == 1)
    }

    /// Get a counter without advancing it.
    pub async fn get_sequence(&self, name: &str) -> Result<Option<SequenceCounter>> {
        let row = sqlx::query(
            "SELECT name, prefix, last_number, updated_at FROM sequence_counters WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await
        .context("Failed to fetch sequence")?;

        row.as_ref().map(Self::row_to_sequence).transpose()
    }

    /// Advance a counter in its own short transaction.
    pub async fn next_sequence_value(&self, name: &str) -> Result<Advance> {
        let mut tx = self.begin().await?;
        let advance = Self::advance_sequence(&mut tx, name).await?;
        if matches!(advance, Advance::Issued { .. }) {
            tx.commit().await.context("Failed to commit sequence")?;
        }
        Ok(advance)
    }

    /// Advance a counter inside the caller's transaction.
    ///
    /// Read, increment and write are one UPDATE statement, which also takes
    /// the write lock; concurrent callers queue on that lock and each sees
    /// the value left by the previous committed caller.
    pub async fn advance_sequence(conn: &mut SqliteConnection, name: &str) -> Result<Advance> {
        let row = sqlx::query(
            r#"
            UPDATE sequence_counters
            SET last_number = last_number + 1, updated_at = ?
            WHERE name = ? AND last_number < ?
            RETURNING last_number, prefix
            "#,
        )
        .bind(encode_timestamp(Utc::now()))
        .bind(name)
        .bind(i64::MAX)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to advance sequence")?;

        if let Some(row) = row {
            let number: i64 = row.get("last_number");
            return Ok(Advance::Issued {
                number: u64::try_from(number).context("Negative sequence value")?,
                prefix: row.get("prefix"),
            });
        }

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM sequence_counters WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to look up sequence")?;

        Ok(if exists.is_some() {
            Advance::Exhausted
        } else {
            Advance::Missing
        })
    }

    /// Overwrite `last_number`. Returns false when the counter does not exist.
    pub async fn reset_sequence(&self, name: &str, value: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sequence_counters SET last_number = ?, updated_at = ? WHERE name = ?",
        )
        .bind(value)
        .bind(encode_timestamp(Utc::now()))
        .bind(name)
        .execute(self.pool())
        .await
        .context("Failed to reset sequence")?;

        Ok(result.rows_affected() == 1)
    }

    fn row_to_sequence(row: &SqliteRow) -> Result<SequenceCounter> {
        let last_number: i64 = row.get("last_number");
        let updated_at_str: String = row.get("updated_at");

        Ok(SequenceCounter {
            name: row.get("name"),
            prefix: row.get("prefix"),
            last_number: u64::try_from(last_number).context("Negative sequence value")?,
            updated_at: decode_timestamp(&updated_at_str).context("Invalid updated_at timestamp")?,
        })
    }
}
