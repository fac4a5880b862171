mod common;

use std::sync::Arc;

use anyhow::Result;
use branchledger::application::{LedgerError, NotFound, PostingRequest, TransferRequest};
use branchledger::domain::{
    names, AccountStatus, Channel, EntryKind, PageRequest, SortOrder, ValidationError,
};
use chrono::{Duration, Utc};
use common::{
    hold_write_lock, open_account, parse_date, post_at, raw_pool, test_service,
    test_service_with_lock_timeout, test_service_with_pool,
};
use uuid::Uuid;

#[tokio::test]
async fn test_credit_debit_credit_chain() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = open_account(&service, "Alice").await?;
    let day = parse_date("2024-03-01");

    post_at(&service, &account, EntryKind::Deposit, 500000, day).await?;
    post_at(&service, &account, EntryKind::Withdrawal, 50000, day + Duration::hours(1)).await?;
    post_at(&service, &account, EntryKind::Deposit, 100000, day + Duration::hours(2)).await?;

    assert_eq!(service.get_account(account.id).await?.balance, 550000);

    let last = service.last_entry(account.id).await?.unwrap();
    assert_eq!(last.amount, 100000);
    assert_eq!(last.kind, EntryKind::Deposit);
    assert_eq!(last.balance_before, 450000);
    assert_eq!(last.balance_after, 550000);

    Ok(())
}

#[tokio::test]
async fn test_entry_records_request_details() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = open_account(&service, "Alice").await?;

    let entry = service
        .post(
            PostingRequest::new(account.id, EntryKind::Deposit, 12345, "usd")
                .with_description("Cash deposit")
                .with_reference("SLIP-77")
                .with_channel(Channel::Atm)
                .at(parse_date("2024-03-01"))
                .by("teller01"),
        )
        .await?;

    assert_eq!(entry.transaction_number, "T0000001");
    assert_eq!(entry.account_id, account.id);
    assert_eq!(entry.currency, "USD");
    assert_eq!(entry.description.as_deref(), Some("Cash deposit"));
    assert_eq!(entry.reference_number.as_deref(), Some("SLIP-77"));
    assert_eq!(entry.channel, Channel::Atm);
    assert_eq!(entry.created_by.as_deref(), Some("teller01"));
    assert_eq!(entry.transaction_date, parse_date("2024-03-01"));

    let stored = service.find_by_transaction_number("T0000001").await?;
    assert_eq!(stored, entry);

    Ok(())
}

#[tokio::test]
async fn test_insufficient_funds_leaves_no_trace() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = open_account(&service, "Bob").await?;
    post_at(&service, &account, EntryKind::Deposit, 50000, parse_date("2024-03-01")).await?;

    let result = post_at(
        &service,
        &account,
        EntryKind::Withdrawal,
        100000,
        parse_date("2024-03-02"),
    )
    .await;

    let err = result.unwrap_err().downcast::<LedgerError>()?;
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds {
            balance: 50000,
            required: 100000,
            ..
        }
    ));
    assert!(!err.is_retryable());

    assert_eq!(service.get_account(account.id).await?.balance, 50000);
    let page = service
        .list_by_account(account.id, PageRequest::new(0, 50)?, SortOrder::Ascending)
        .await?;
    assert_eq!(page.total_items, 1);
    // The rejected post did not consume a transaction number
    assert_eq!(service.current_value(names::TRANSACTION_NUMBER).await?, 1);

    Ok(())
}

#[tokio::test]
async fn test_overdraft_allows_negative_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = service.open_account("Carol", "USD", true, None).await?;

    let entry = post_at(&service, &account, EntryKind::Fee, 1500, parse_date("2024-03-01")).await?;
    assert_eq!(entry.balance_after, -1500);
    assert_eq!(service.get_account(account.id).await?.balance, -1500);

    Ok(())
}

#[tokio::test]
async fn test_invalid_postings_are_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = open_account(&service, "Dave").await?;

    let zero = service
        .post(PostingRequest::new(account.id, EntryKind::Deposit, 0, "USD"))
        .await;
    assert!(matches!(
        zero,
        Err(LedgerError::Validation(ValidationError::NonPositiveAmount(0)))
    ));

    let negative = service
        .post(PostingRequest::new(account.id, EntryKind::Deposit, -100, "USD"))
        .await;
    assert!(matches!(
        negative,
        Err(LedgerError::Validation(ValidationError::NonPositiveAmount(-100)))
    ));

    let wrong_currency = service
        .post(PostingRequest::new(account.id, EntryKind::Deposit, 100, "EUR"))
        .await;
    assert!(matches!(
        wrong_currency,
        Err(LedgerError::Validation(ValidationError::CurrencyMismatch { .. }))
    ));

    // Requests are upper-cased on construction; a hand-built one is not
    let mut lowercase = PostingRequest::new(account.id, EntryKind::Deposit, 100, "USD");
    lowercase.currency = "usd".to_string();
    assert!(matches!(
        service.post(lowercase).await,
        Err(LedgerError::Validation(ValidationError::CurrencyMismatch { .. }))
    ));

    let unknown = Uuid::new_v4();
    let missing = service
        .post(PostingRequest::new(unknown, EntryKind::Deposit, 100, "USD"))
        .await;
    assert!(matches!(
        missing,
        Err(LedgerError::Validation(ValidationError::UnknownAccount(id))) if id == unknown
    ));

    assert_eq!(service.get_account(account.id).await?.balance, 0);
    assert!(service.last_entry(account.id).await?.is_none());
    assert_eq!(service.current_value(names::TRANSACTION_NUMBER).await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_backdated_posting_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = open_account(&service, "Erin").await?;
    post_at(&service, &account, EntryKind::Deposit, 1000, parse_date("2024-03-10")).await?;

    let result = post_at(&service, &account, EntryKind::Deposit, 1000, parse_date("2024-03-09")).await;
    let err = result.unwrap_err().downcast::<LedgerError>()?;
    assert!(matches!(
        err,
        LedgerError::Validation(ValidationError::Backdated { .. })
    ));

    // Same instant as the last entry is fine; seq breaks the tie
    let same = post_at(&service, &account, EntryKind::Deposit, 1000, parse_date("2024-03-10")).await?;
    assert_eq!(same.balance_before, 1000);

    Ok(())
}

#[tokio::test]
async fn test_undated_post_behind_last_entry_takes_its_date() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = open_account(&service, "Erin").await?;

    // The last entry sits ahead of the wall clock, as after a clock step back
    let ahead = post_at(&service, &account, EntryKind::Deposit, 1000, Utc::now() + Duration::days(1)).await?;

    let undated = service
        .post(PostingRequest::new(account.id, EntryKind::Withdrawal, 300, "USD"))
        .await?;
    assert_eq!(undated.transaction_date, ahead.transaction_date);
    assert_eq!(undated.balance_before, 1000);
    assert_eq!(service.last_entry(account.id).await?, Some(undated.clone()));

    // An explicit date earlier than the last entry is still refused
    let explicit = post_at(&service, &account, EntryKind::Deposit, 100, Utc::now()).await;
    let err = explicit.unwrap_err().downcast::<LedgerError>()?;
    assert!(matches!(
        err,
        LedgerError::Validation(ValidationError::Backdated { .. })
    ));

    // Undated transfers are held to the later of both accounts' last entries
    let other = open_account(&service, "Finn").await?;
    let transfer = service
        .post_transfer(TransferRequest::new(other.id, account.id, 200, "USD"))
        .await;
    assert!(matches!(
        transfer,
        Err(LedgerError::InsufficientFunds { .. })
    ));
    post_at(&service, &other, EntryKind::Deposit, 500, Utc::now()).await?;
    let transfer = service
        .post_transfer(TransferRequest::new(other.id, account.id, 200, "USD"))
        .await?;
    assert_eq!(transfer.debit.transaction_date, ahead.transaction_date);
    assert_eq!(transfer.credit.transaction_date, ahead.transaction_date);
    assert_eq!(service.get_account(account.id).await?.balance, 900);

    Ok(())
}

#[tokio::test]
async fn test_only_active_accounts_accept_postings() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = open_account(&service, "Frank").await?;

    service
        .set_account_status(account.id, AccountStatus::Frozen)
        .await?;
    let frozen = service
        .post(PostingRequest::new(account.id, EntryKind::Deposit, 100, "USD"))
        .await;
    assert!(matches!(
        frozen,
        Err(LedgerError::Validation(ValidationError::AccountNotPostable {
            status: AccountStatus::Frozen,
            ..
        }))
    ));

    service
        .set_account_status(account.id, AccountStatus::Active)
        .await?;
    service
        .post(PostingRequest::new(account.id, EntryKind::Deposit, 100, "USD"))
        .await?;

    Ok(())
}

#[tokio::test]
async fn test_close_account_requires_zero_balance() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let account = open_account(&service, "Grace").await?;
    post_at(&service, &account, EntryKind::Deposit, 2000, parse_date("2024-03-01")).await?;

    let result = service.close_account(account.id).await;
    assert!(matches!(
        result,
        Err(LedgerError::Validation(ValidationError::NonZeroBalance { balance: 2000, .. }))
    ));

    post_at(&service, &account, EntryKind::Withdrawal, 2000, parse_date("2024-03-02")).await?;
    let closed = service.close_account(account.id).await?;
    assert_eq!(closed.status, AccountStatus::Closed);
    assert!(closed.closed_at.is_some());

    let again = service.close_account(account.id).await;
    assert!(matches!(
        again,
        Err(LedgerError::Validation(ValidationError::AlreadyClosed(_)))
    ));

    let post_closed = service
        .post(PostingRequest::new(account.id, EntryKind::Deposit, 100, "USD"))
        .await;
    assert!(matches!(
        post_closed,
        Err(LedgerError::Validation(ValidationError::AccountNotPostable { .. }))
    ));

    Ok(())
}

#[tokio::test]
async fn test_unknown_account_lookup_is_not_found() -> Result<()> {
    let (service, _temp) = test_service().await?;

    assert!(matches!(
        service.get_account_by_number("A9999999").await,
        Err(LedgerError::NotFound(NotFound::Account(_)))
    ));
    assert!(matches!(
        service.find_by_transaction_number("T9999999").await,
        Err(LedgerError::NotFound(NotFound::Transaction(_)))
    ));

    Ok(())
}

#[tokio::test]
async fn test_stored_balance_drift_blocks_posting() -> Result<()> {
    let (service, temp) = test_service().await?;
    let account = open_account(&service, "Heidi").await?;
    post_at(&service, &account, EntryKind::Deposit, 1000, parse_date("2024-03-01")).await?;

    let pool = raw_pool(&temp).await?;
    sqlx::query("UPDATE accounts SET balance = 999999 WHERE id = ?")
        .bind(account.id.to_string())
        .execute(&pool)
        .await?;
    pool.close().await;

    let result = post_at(&service, &account, EntryKind::Deposit, 1000, parse_date("2024-03-02")).await;
    let err = result.unwrap_err().downcast::<LedgerError>()?;
    assert!(matches!(err, LedgerError::Integrity(_)));

    let report = service.verify_chain(account.id).await?;
    assert!(!report.is_intact());

    Ok(())
}

#[tokio::test]
async fn test_ledger_rows_are_immutable() -> Result<()> {
    let (service, temp) = test_service().await?;
    let account = open_account(&service, "Ivan").await?;
    post_at(&service, &account, EntryKind::Deposit, 1000, parse_date("2024-03-01")).await?;

    let pool = raw_pool(&temp).await?;
    let update = sqlx::query("UPDATE ledger_entries SET amount = 1")
        .execute(&pool)
        .await;
    assert!(update.is_err());
    let delete = sqlx::query("DELETE FROM ledger_entries").execute(&pool).await;
    assert!(delete.is_err());
    pool.close().await;

    Ok(())
}

#[tokio::test]
async fn test_transfer_posts_both_legs() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let source = open_account(&service, "Judy").await?;
    let destination = open_account(&service, "Ken").await?;
    post_at(&service, &source, EntryKind::Deposit, 10000, parse_date("2024-03-01")).await?;

    let result = service
        .post_transfer(
            TransferRequest::new(source.id, destination.id, 4000, "USD")
                .with_description("Rent share")
                .at(parse_date("2024-03-02")),
        )
        .await?;

    assert_eq!(result.debit.kind, EntryKind::TransferOut);
    assert_eq!(result.debit.balance_after, 6000);
    assert_eq!(result.debit.channel, Channel::Transfer);
    assert_eq!(result.credit.kind, EntryKind::TransferIn);
    assert_eq!(result.credit.balance_after, 4000);
    assert_eq!(result.debit.reference_number, result.credit.reference_number);

    let reference = result.debit.reference_number.clone().unwrap();
    let legs = service.find_by_reference_number(&reference).await?;
    assert_eq!(legs.len(), 2);

    assert_eq!(service.get_account(source.id).await?.balance, 6000);
    assert_eq!(service.get_account(destination.id).await?.balance, 4000);

    Ok(())
}

#[tokio::test]
async fn test_failed_transfer_leg_rolls_back_both() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let source = open_account(&service, "Leo").await?;
    let destination = service.open_account("Mia", "EUR", false, None).await?;
    post_at(&service, &source, EntryKind::Deposit, 10000, parse_date("2024-03-01")).await?;

    // The debit leg succeeds, the credit leg fails on currency
    let result = service
        .post_transfer(TransferRequest::new(source.id, destination.id, 4000, "USD"))
        .await;
    assert!(matches!(
        result,
        Err(LedgerError::Validation(ValidationError::CurrencyMismatch { .. }))
    ));

    assert_eq!(service.get_account(source.id).await?.balance, 10000);
    assert_eq!(service.get_account(destination.id).await?.balance, 0);
    let last = service.last_entry(source.id).await?.unwrap();
    assert_eq!(last.kind, EntryKind::Deposit);
    assert_eq!(service.current_value(names::TRANSACTION_NUMBER).await?, 1);

    let same = service
        .post_transfer(TransferRequest::new(source.id, source.id, 100, "USD"))
        .await;
    assert!(matches!(
        same,
        Err(LedgerError::Validation(ValidationError::SameAccount))
    ));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_posts_keep_chain_intact() -> Result<()> {
    let (service, _temp) = test_service_with_pool(8).await?;
    let account = open_account(&service, "Nina").await?;
    let service = Arc::new(service);
    let account_id = account.id;

    let handles: Vec<_> = (1..=40)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .post(PostingRequest::new(account_id, EntryKind::Deposit, i * 100, "USD"))
                    .await
            })
        })
        .collect();

    let mut numbers = Vec::new();
    for handle in handles {
        numbers.push(handle.await??.transaction_number);
    }
    numbers.sort();
    numbers.dedup();
    assert_eq!(numbers.len(), 40);

    let expected: i64 = (1..=40).map(|i| i * 100).sum();
    assert_eq!(service.get_account(account.id).await?.balance, expected);

    let report = service.verify_chain(account.id).await?;
    assert!(report.is_intact(), "{:?}", report.failure);
    assert_eq!(report.entries_checked, 40);
    assert_eq!(report.replayed_balance, expected);

    Ok(())
}

#[tokio::test]
async fn test_post_times_out_while_writer_holds_lock() -> Result<()> {
    let (service, temp) = test_service_with_lock_timeout(200).await?;
    let account = open_account(&service, "Omar").await?;
    post_at(&service, &account, EntryKind::Deposit, 5000, parse_date("2024-03-01")).await?;

    let mut writer = hold_write_lock(&temp).await?;

    let result = service
        .post(PostingRequest::new(account.id, EntryKind::Withdrawal, 1000, "USD"))
        .await;
    match result {
        Err(err @ LedgerError::ConcurrencyTimeout(_)) => assert!(err.is_retryable()),
        other => panic!("expected a concurrency timeout, got {other:?}"),
    }

    sqlx::query("ROLLBACK").execute(&mut *writer).await?;

    assert_eq!(service.get_account(account.id).await?.balance, 5000);
    assert_eq!(service.current_value(names::TRANSACTION_NUMBER).await?, 1);
    assert_eq!(service.last_entry(account.id).await?.map(|e| e.amount), Some(5000));

    // Retrying once the lock is gone succeeds
    let retried = service
        .post(PostingRequest::new(account.id, EntryKind::Withdrawal, 1000, "USD"))
        .await?;
    assert_eq!(retried.balance_after, 4000);

    Ok(())
}
