use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use crate::domain::{AccountId, EntryCursor, Passbook, PassbookStatus};

use super::repository::{decode_timestamp, encode_timestamp};
use super::Repository;

const PASSBOOK_COLUMNS: &str = "id, account_id, passbook_number, current_page, last_printed_line, lines_per_page, last_printed_date, last_printed_seq, last_print_date, status, issued_at, created_by";

impl Repository {
    pub async fn insert_passbook(conn: &mut SqliteConnection, passbook: &Passbook) -> Result<()> {
        let (last_date, last_seq) = split_cursor(passbook.last_printed);
        sqlx::query(
            r#"
            INSERT INTO passbooks (id, account_id, passbook_number, current_page, last_printed_line, lines_per_page, last_printed_date, last_printed_seq, last_print_date, status, issued_at, created_by)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(passbook.id.to_string())
        .bind(passbook.account_id.to_string())
        .bind(&passbook.passbook_number)
        .bind(passbook.current_page)
        .bind(passbook.last_printed_line)
        .bind(passbook.lines_per_page)
        .bind(last_date)
        .bind(last_seq)
        .bind(passbook.last_print_date.map(encode_timestamp))
        .bind(passbook.status.as_str())
        .bind(encode_timestamp(passbook.issued_at))
        .bind(&passbook.created_by)
        .execute(&mut *conn)
        .await
        .context("Failed to save passbook")?;
        Ok(())
    }

    pub async fn get_active_passbook(&self, account_id: AccountId) -> Result<Option<Passbook>> {
        let sql = format!(
            "SELECT {PASSBOOK_COLUMNS} FROM passbooks WHERE account_id = ? AND status = 'active'"
        );
        let row = sqlx::query(&sql)
            .bind(account_id.to_string())
            .fetch_optional(self.pool())
            .await
            .context("Failed to fetch passbook")?;

        row.as_ref().map(Self::row_to_passbook).transpose()
    }

    /// Fetch the active passbook and take the database write lock, like
    /// [`Repository::lock_account`] does for balances.
    pub async fn lock_active_passbook(
        conn: &mut SqliteConnection,
        account_id: AccountId,
    ) -> Result<Option<Passbook>> {
        let sql = format!(
            "UPDATE passbooks SET current_page = current_page WHERE account_id = ? AND status = 'active' RETURNING {PASSBOOK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(account_id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to lock passbook")?;

        row.as_ref().map(Self::row_to_passbook).transpose()
    }

    /// Persist the print position and status of a passbook.
    pub async fn update_passbook(conn: &mut SqliteConnection, passbook: &Passbook) -> Result<()> {
        let (last_date, last_seq) = split_cursor(passbook.last_printed);
        let result = sqlx::query(
            r#"
            UPDATE passbooks
            SET current_page = ?, last_printed_line = ?, last_printed_date = ?, last_printed_seq = ?, last_print_date = ?, status = ?
            WHERE id = ?
            "#,
        )
        .bind(passbook.current_page)
        .bind(passbook.last_printed_line)
        .bind(last_date)
        .bind(last_seq)
        .bind(passbook.last_print_date.map(encode_timestamp))
        .bind(passbook.status.as_str())
        .bind(passbook.id.to_string())
        .execute(&mut *conn)
        .await
        .context("Failed to update passbook")?;

        if result.rows_affected() != 1 {
            anyhow::bail!("Passbook update touched {} rows", result.rows_affected());
        }
        Ok(())
    }

    /// Retire the account's active passbook when the account closes.
    pub async fn close_active_passbook(conn: &mut SqliteConnection, account_id: AccountId) -> Result<()> {
        sqlx::query("UPDATE passbooks SET status = 'closed' WHERE account_id = ? AND status = 'active'")
            .bind(account_id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to close passbook")?;
        Ok(())
    }

    fn row_to_passbook(row: &SqliteRow) -> Result<Passbook> {
        let id_str: String = row.get("id");
        let account_id_str: String = row.get("account_id");
        let status_str: String = row.get("status");
        let issued_at_str: String = row.get("issued_at");
        let last_printed_date: Option<String> = row.get("last_printed_date");
        let last_printed_seq: Option<i64> = row.get("last_printed_seq");
        let last_print_date: Option<String> = row.get("last_print_date");

        let last_printed = match (last_printed_date, last_printed_seq) {
            (Some(date), Some(seq)) => Some(EntryCursor {
                transaction_date: decode_timestamp(&date).context("Invalid last_printed_date")?,
                seq,
            }),
            _ => None,
        };

        Ok(Passbook {
            id: Uuid::parse_str(&id_str).context("Invalid passbook ID")?,
            account_id: Uuid::parse_str(&account_id_str).context("Invalid account ID")?,
            passbook_number: row.get("passbook_number"),
            current_page: row.get("current_page"),
            last_printed_line: row.get("last_printed_line"),
            lines_per_page: row.get("lines_per_page"),
            last_printed,
            last_print_date: last_print_date
                .as_deref()
                .map(decode_timestamp)
                .transpose()
                .context("Invalid last_print_date")?,
            status: PassbookStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid passbook status: {}", status_str))?,
            issued_at: decode_timestamp(&issued_at_str).context("Invalid issued_at")?,
            created_by: row.get("created_by"),
        })
    }
}

fn split_cursor(cursor: Option<EntryCursor>) -> (Option<String>, Option<i64>) {
    match cursor {
        Some(cursor) => (Some(encode_timestamp(cursor.transaction_date)), Some(cursor.seq)),
        None => (None, None),
    }
}
