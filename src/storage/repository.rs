use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::domain::{Account, AccountId, AccountStatus, Cents};

use super::{MIGRATION_001_INITIAL, MIGRATION_002_PASSBOOKS};

const ACCOUNT_COLUMNS: &str = "id, account_number, name, currency, balance, status, allow_overdraft, opened_at, closed_at, created_by";

/// Repository for every statement the ledger runs against SQLite.
///
/// Reads go straight to the pool. Writes happen inside a [`Transaction`]
/// obtained from [`Repository::begin`]; the associated functions that take
/// a `&mut SqliteConnection` are the building blocks of those units of work.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the database described by `config`.
    ///
    /// WAL journaling keeps readers off the writer lock. `busy_timeout`
    /// bounds how long a writer waits for that lock before SQLite reports
    /// the database as busy.
    pub async fn connect(config: &DatabaseConfig, create_if_missing: bool) -> Result<Self> {
        let lock_timeout = Duration::from_millis(config.lock_timeout_ms);
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path))
            .context("Invalid database path")?
            .create_if_missing(create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(lock_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(lock_timeout)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!(path = %config.path, "connected to ledger database");
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        sqlx::query(MIGRATION_002_PASSBOOKS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;
        Ok(())
    }

    /// Initialize a database (connect, creating the file, then migrate).
    pub async fn init(config: &DatabaseConfig) -> Result<Self> {
        let repo = Self::connect(config, true).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a unit of work. Dropping the transaction without committing
    /// rolls it back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .context("Failed to begin transaction")
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ========================
    // Account operations
    // ========================

    /// Insert a new account row.
    pub async fn insert_account(conn: &mut SqliteConnection, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, account_number, name, currency, balance, status, allow_overdraft, opened_at, closed_at, created_by)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.to_string())
        .bind(&account.account_number)
        .bind(&account.name)
        .bind(&account.currency)
        .bind(account.balance)
        .bind(account.status.as_str())
        .bind(account.allow_overdraft)
        .bind(encode_timestamp(account.opened_at))
        .bind(account.closed_at.map(encode_timestamp))
        .bind(&account.created_by)
        .execute(&mut *conn)
        .await
        .context("Failed to save account")?;
        Ok(())
    }

    /// Get an account by ID.
    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        Self::get_account_on(&mut conn, id).await
    }

    /// Get an account inside the caller's transaction, without locking it.
    pub async fn get_account_on(conn: &mut SqliteConnection, id: AccountId) -> Result<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch account")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    /// Get an account by its account number.
    pub async fn get_account_by_number(&self, account_number: &str) -> Result<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_number = ?");
        let row = sqlx::query(&sql)
            .bind(account_number)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch account by number")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    /// Take the write lock and return the account as of that moment.
    ///
    /// The no-op UPDATE is the first write of the transaction, so SQLite
    /// grants the database write lock here; no other writer can change the
    /// balance between this read and commit.
    pub async fn lock_account(conn: &mut SqliteConnection, id: AccountId) -> Result<Option<Account>> {
        let sql = format!(
            "UPDATE accounts SET balance = balance WHERE id = ? RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to lock account")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    pub async fn update_balance(
        conn: &mut SqliteConnection,
        id: AccountId,
        balance: Cents,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE accounts SET balance = ? WHERE id = ?")
            .bind(balance)
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to update account balance")?;

        if result.rows_affected() != 1 {
            anyhow::bail!("Balance update touched {} rows", result.rows_affected());
        }
        Ok(())
    }

    pub async fn update_account_status(
        conn: &mut SqliteConnection,
        id: AccountId,
        status: AccountStatus,
        closed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query("UPDATE accounts SET status = ?, closed_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(closed_at.map(encode_timestamp))
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to update account status")?;
        Ok(())
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let id_str: String = row.get("id");
        let status_str: String = row.get("status");
        let opened_at_str: String = row.get("opened_at");
        let closed_at_str: Option<String> = row.get("closed_at");

        Ok(Account {
            id: Uuid::parse_str(&id_str).context("Invalid account ID")?,
            account_number: row.get("account_number"),
            name: row.get("name"),
            currency: row.get("currency"),
            balance: row.get("balance"),
            status: AccountStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid account status: {}", status_str))?,
            allow_overdraft: row.get::<i32, _>("allow_overdraft") != 0,
            opened_at: decode_timestamp(&opened_at_str).context("Invalid opened_at timestamp")?,
            closed_at: closed_at_str
                .as_deref()
                .map(decode_timestamp)
                .transpose()
                .context("Invalid closed_at timestamp")?,
            created_by: row.get("created_by"),
        })
    }
}

/// Fixed-width UTC text (`2024-01-31T09:30:00.000000Z`): lexical order is
/// chronological order, which the `(account_id, transaction_date, seq)`
/// index relies on.
pub(crate) fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}
