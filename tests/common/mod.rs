// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::path::PathBuf;

use anyhow::Result;
use branchledger::application::{LedgerService, PostingRequest};
use branchledger::config::LedgerConfig;
use branchledger::domain::{Account, Cents, EntryKind, LedgerEntry};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqlitePool};
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let service = LedgerService::init(db_path(&temp_dir).to_str().unwrap()).await?;
    Ok((service, temp_dir))
}

/// Same as [`test_service`] with extra pooled connections for concurrency tests
pub async fn test_service_with_pool(max_connections: u32) -> Result<(LedgerService, TempDir)> {
    test_service_with(max_connections, 30_000).await
}

/// A service that gives up on a held write lock after `lock_timeout_ms`
pub async fn test_service_with_lock_timeout(lock_timeout_ms: u64) -> Result<(LedgerService, TempDir)> {
    test_service_with(2, lock_timeout_ms).await
}

async fn test_service_with(
    max_connections: u32,
    lock_timeout_ms: u64,
) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let mut config = LedgerConfig::default().with_database_path(db_path(&temp_dir).to_str().unwrap());
    config.database.max_connections = max_connections;
    config.database.lock_timeout_ms = lock_timeout_ms;
    let service = LedgerService::open(&config).await?;
    Ok((service, temp_dir))
}

/// Open a raw connection on the test database and take the write lock
/// with `BEGIN IMMEDIATE`. The lock is held until `ROLLBACK` is sent on
/// the returned connection.
pub async fn hold_write_lock(temp_dir: &TempDir) -> Result<PoolConnection<Sqlite>> {
    let pool = raw_pool(temp_dir).await?;
    let mut conn = pool.acquire().await?;
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
    Ok(conn)
}

pub fn db_path(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("test.db")
}

/// A raw pool on the test database, for tampering with rows behind the
/// service's back.
pub async fn raw_pool(temp_dir: &TempDir) -> Result<SqlitePool> {
    let url = format!("sqlite:{}", db_path(temp_dir).display());
    Ok(SqlitePool::connect(&url).await?)
}

/// Helper to parse a date string into DateTime<Utc>
pub fn parse_date(date_str: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

pub fn day(date_str: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").unwrap()
}

/// Open a USD account without overdraft
pub async fn open_account(service: &LedgerService, name: &str) -> Result<Account> {
    Ok(service.open_account(name, "USD", false, Some("test")).await?)
}

/// Post one movement dated `date`
pub async fn post_at(
    service: &LedgerService,
    account: &Account,
    kind: EntryKind,
    amount: Cents,
    date: DateTime<Utc>,
) -> Result<LedgerEntry> {
    let request = PostingRequest::new(account.id, kind, amount, "USD").at(date);
    Ok(service.post(request).await?)
}

/// Post `count` alternating deposits and withdrawals, one minute apart
/// from `start`. Deposits are always larger, so the balance never dips.
pub async fn post_history(
    service: &LedgerService,
    account: &Account,
    count: usize,
    start: DateTime<Utc>,
) -> Result<Vec<LedgerEntry>> {
    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let (kind, amount) = if i % 2 == 0 {
            (EntryKind::Deposit, 10_000 + i as Cents)
        } else {
            (EntryKind::Withdrawal, 2_500)
        };
        let date = start + Duration::minutes(i as i64);
        entries.push(post_at(service, account, kind, amount, date).await?);
    }
    Ok(entries)
}
