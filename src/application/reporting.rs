use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::domain::{
    Account, AccountId, Cents, ChainReport, ChainWalker, CursorPage, DateRange, EntryCursor,
    EntryKind, LedgerEntry, Page, PageRequest, SortOrder, ValidationError, MAX_PAGE_SIZE,
};
use crate::storage::Repository;

use super::{LedgerError, LedgerService, NotFound};

/// Entries fetched per round trip while replaying a full history.
const CHAIN_BATCH: i64 = 1_000;

/// Account statement over a half-open date range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub account_number: String,
    pub account_name: String,
    pub currency: String,
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
    pub opening_balance: Cents,
    pub closing_balance: Cents,
    pub total_credits: Cents,
    pub credit_count: u64,
    pub total_debits: Cents,
    pub debit_count: u64,
    pub entries: Vec<LedgerEntry>,
    pub generated_at: DateTime<Utc>,
}

impl Statement {
    pub fn net_change(&self) -> Cents {
        self.closing_balance - self.opening_balance
    }
}

impl LedgerService {
    async fn require_account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.repo
            .get_account(account_id)
            .await?
            .ok_or_else(|| NotFound::Account(account_id.to_string()).into())
    }

    /// One page of an account's history, ordered by (transaction date, seq).
    ///
    /// The returned page carries the snapshot it was read against; walk on
    /// with [`Page::next_request`] so entries posted meanwhile cannot shift
    /// later pages.
    #[instrument(skip(self))]
    pub async fn list_by_account(
        &self,
        account_id: AccountId,
        page: PageRequest,
        order: SortOrder,
    ) -> Result<Page<LedgerEntry>, LedgerError> {
        self.require_account(account_id).await?;
        let (items, total_items, as_of) = self
            .repo
            .list_entries_page(account_id, page.offset(), page.limit(), order, page.as_of)
            .await?;
        debug!(returned = items.len(), total_items, ?as_of, "listed entries");

        Ok(Page {
            items,
            page: page.page,
            size: page.size,
            total_items,
            as_of,
        })
    }

    /// Keyset read: up to `limit` entries strictly after `cursor`.
    ///
    /// `next` is the cursor of the last entry returned, or the given cursor
    /// when nothing new was found, so it can always be fed back in.
    #[instrument(skip(self))]
    pub async fn list_after(
        &self,
        account_id: AccountId,
        cursor: Option<EntryCursor>,
        limit: u32,
        order: SortOrder,
    ) -> Result<CursorPage<LedgerEntry>, LedgerError> {
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(ValidationError::InvalidPageSize {
                size: limit,
                max: MAX_PAGE_SIZE,
            }
            .into());
        }
        self.require_account(account_id).await?;

        let items = self
            .repo
            .list_entries_after(account_id, cursor, i64::from(limit), order)
            .await?;
        let next = items.last().map(LedgerEntry::cursor).or(cursor);
        debug!(returned = items.len(), "listed entries after cursor");
        Ok(CursorPage { items, next })
    }

    /// Next `lines` passbook lines after the last printed one.
    pub async fn passbook_lines(
        &self,
        account_id: AccountId,
        last_printed: Option<EntryCursor>,
        lines: u32,
    ) -> Result<CursorPage<LedgerEntry>, LedgerError> {
        self.list_after(account_id, last_printed, lines, SortOrder::Ascending)
            .await
    }

    /// Entries with `range.start <= transaction_date < range.end`, ascending.
    #[instrument(skip(self))]
    pub async fn list_by_date_range(
        &self,
        account_id: AccountId,
        range: DateRange,
        page: Option<PageRequest>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.require_account(account_id).await?;
        let entries = self
            .repo
            .list_entries_in_range(account_id, range, page.map(|p| (p.offset(), p.limit())))
            .await?;
        debug!(returned = entries.len(), "listed entries in range");
        Ok(entries)
    }

    /// Sum of `amount` for one kind over a range. Zero when nothing matches.
    pub async fn aggregate(
        &self,
        account_id: AccountId,
        kind: EntryKind,
        range: DateRange,
    ) -> Result<Cents, LedgerError> {
        self.require_account(account_id).await?;
        Ok(self.repo.sum_amount(account_id, kind, range).await?)
    }

    pub async fn count_in_range(
        &self,
        account_id: AccountId,
        range: DateRange,
    ) -> Result<u64, LedgerError> {
        self.require_account(account_id).await?;
        Ok(self.repo.count_in_range(account_id, range).await?)
    }

    /// The entry a subsequent post would chain from.
    pub async fn last_entry(&self, account_id: AccountId) -> Result<Option<LedgerEntry>, LedgerError> {
        self.require_account(account_id).await?;
        Ok(self.repo.last_entry(account_id).await?)
    }

    /// Most recent entries first.
    pub async fn recent(
        &self,
        account_id: AccountId,
        limit: u32,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self
            .list_after(account_id, None, limit, SortOrder::Descending)
            .await?
            .items)
    }

    pub async fn find_by_transaction_number(
        &self,
        transaction_number: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        self.repo
            .get_entry_by_number(transaction_number)
            .await?
            .ok_or_else(|| NotFound::Transaction(transaction_number.to_string()).into())
    }

    /// All entries sharing a reference number, e.g. both legs of a transfer.
    pub async fn find_by_reference_number(
        &self,
        reference_number: &str,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.repo.list_entries_by_reference(reference_number).await?)
    }

    /// Build a statement for `range`. Every figure comes from one read
    /// snapshot, so totals always match the listed entries.
    #[instrument(skip(self))]
    pub async fn statement(
        &self,
        account_id: AccountId,
        range: DateRange,
    ) -> Result<Statement, LedgerError> {
        let mut tx = self.repo.begin().await?;
        let account = Repository::get_account_on(&mut tx, account_id)
            .await?
            .ok_or_else(|| NotFound::Account(account_id.to_string()))?;

        let opening_balance =
            match Repository::last_entry_before_on(&mut tx, account_id, range.start).await? {
                Some(entry) => entry.balance_after,
                None => match Repository::first_entry_from_on(&mut tx, account_id, range.start)
                    .await?
                {
                    Some(entry) => entry.balance_before,
                    None => account.balance,
                },
            };

        let entries =
            Repository::list_entries_in_range_on(&mut tx, account_id, range, None).await?;
        let totals = Repository::range_totals_on(&mut tx, account_id, range).await?;
        tx.commit().await.context("Failed to end read transaction")?;

        let closing_balance = entries
            .last()
            .map_or(opening_balance, |entry| entry.balance_after);

        debug!(entries = entries.len(), opening_balance, closing_balance, "built statement");
        Ok(Statement {
            account_number: account.account_number,
            account_name: account.name,
            currency: account.currency,
            from_date: range.start,
            to_date: range.end,
            opening_balance,
            closing_balance,
            total_credits: totals.credit_total,
            credit_count: totals.credit_count,
            total_debits: totals.debit_total,
            debit_count: totals.debit_count,
            entries,
            generated_at: Utc::now(),
        })
    }

    /// Replay the whole history of an account from a single read snapshot
    /// and compare it with the stored balance.
    #[instrument(skip(self))]
    pub async fn verify_chain(&self, account_id: AccountId) -> Result<ChainReport, LedgerError> {
        let mut tx = self.repo.begin().await?;
        let account = Repository::get_account_on(&mut tx, account_id)
            .await?
            .ok_or_else(|| NotFound::Account(account_id.to_string()))?;

        let mut walker = ChainWalker::new(0);
        let mut cursor = None;
        let mut failure = None;

        'pages: loop {
            let batch = Repository::list_entries_after_on(
                &mut tx,
                account_id,
                cursor,
                CHAIN_BATCH,
                SortOrder::Ascending,
            )
            .await?;

            for entry in &batch {
                if let Err(err) = walker.push(entry) {
                    failure = Some(err);
                    break 'pages;
                }
            }

            match batch.last() {
                Some(last) if batch.len() as i64 == CHAIN_BATCH => cursor = Some(last.cursor()),
                _ => break,
            }
        }
        tx.commit().await.context("Failed to end read transaction")?;

        let entries_checked = walker.checked();
        let replayed_balance = walker.balance();
        if failure.is_none() {
            failure = walker.finish(account.balance).err();
        }

        if let Some(err) = &failure {
            warn!(account = %account.account_number, error = %err, "ledger chain broken");
        } else {
            debug!(account = %account.account_number, entries_checked, "ledger chain intact");
        }

        Ok(ChainReport {
            account_number: account.account_number,
            entries_checked,
            replayed_balance,
            account_balance: account.balance,
            failure,
        })
    }
}
