use anyhow::Context;
use chrono::Utc;
use tracing::{info, instrument};

use crate::domain::{
    format_identifier, normalize_timestamp, AccountId, LedgerEntry, Passbook, PassbookStatus,
    SortOrder, ValidationError, DEFAULT_LINES_PER_PAGE,
};
use crate::storage::Repository;

use super::service::issued;
use super::{LedgerError, LedgerService, NotFound};

impl LedgerService {
    /// The account's active passbook, issuing one with a fresh number if
    /// there is none yet.
    #[instrument(skip(self))]
    pub async fn open_passbook(
        &self,
        account_id: AccountId,
        actor: Option<&str>,
    ) -> Result<Passbook, LedgerError> {
        let mut tx = self.repo.begin().await?;
        if let Some(passbook) = Repository::lock_active_passbook(&mut tx, account_id).await? {
            return Ok(passbook);
        }

        let account = Repository::get_account_on(&mut tx, account_id)
            .await?
            .ok_or_else(|| NotFound::Account(account_id.to_string()))?;
        if account.is_closed() {
            return Err(ValidationError::AlreadyClosed(account.account_number).into());
        }

        let passbook = self.issue_passbook(&mut tx, account_id, actor).await?;
        tx.commit().await.context("Failed to commit passbook")?;

        info!(account = %account.account_number, passbook = %passbook.passbook_number, "issued passbook");
        Ok(passbook)
    }

    pub async fn passbook(&self, account_id: AccountId) -> Result<Option<Passbook>, LedgerError> {
        self.get_account(account_id).await?;
        Ok(self.repo.get_active_passbook(account_id).await?)
    }

    /// Entries not yet printed, as many as fit on the current page.
    /// Without a passbook the whole history is unprinted.
    pub async fn unprinted_lines(&self, account_id: AccountId) -> Result<Vec<LedgerEntry>, LedgerError> {
        let (cursor, remaining) = match self.passbook(account_id).await? {
            Some(passbook) => (passbook.last_printed, passbook.remaining_lines()),
            None => (None, DEFAULT_LINES_PER_PAGE),
        };
        if remaining == 0 {
            return Ok(Vec::new());
        }

        Ok(self
            .list_after(account_id, cursor, remaining, SortOrder::Ascending)
            .await?
            .items)
    }

    /// Record that `printed` went onto the current page. The entries must be
    /// exactly the next unprinted ones, in ledger order.
    #[instrument(skip(self, printed), fields(lines = printed.len()))]
    pub async fn record_print(
        &self,
        account_id: AccountId,
        printed: &[LedgerEntry],
    ) -> Result<Passbook, LedgerError> {
        let Some(last) = printed.last() else {
            return Err(ValidationError::NothingToPrint.into());
        };

        let mut tx = self.repo.begin().await?;
        let mut passbook = Repository::lock_active_passbook(&mut tx, account_id)
            .await?
            .ok_or_else(|| NotFound::Passbook(account_id.to_string()))?;

        let lines = u32::try_from(printed.len()).unwrap_or(u32::MAX);
        if lines > passbook.remaining_lines() {
            return Err(ValidationError::PassbookPageFull {
                requested: lines,
                remaining: passbook.remaining_lines(),
            }
            .into());
        }

        let expected = Repository::list_entries_after_on(
            &mut tx,
            account_id,
            passbook.last_printed,
            i64::from(lines),
            SortOrder::Ascending,
        )
        .await?;
        let in_order = expected.len() == printed.len()
            && expected
                .iter()
                .zip(printed)
                .all(|(stored, given)| stored.id == given.id);
        if !in_order {
            return Err(ValidationError::PrintOutOfOrder.into());
        }

        let page = passbook.current_page;
        passbook.record_print(lines, last.cursor(), normalize_timestamp(Utc::now()));
        Repository::update_passbook(&mut tx, &passbook).await?;
        tx.commit().await.context("Failed to commit passbook print")?;

        info!(passbook = %passbook.passbook_number, page, lines, "recorded passbook print");
        Ok(passbook)
    }

    /// Turn to a fresh page without printing.
    pub async fn next_passbook_page(&self, account_id: AccountId) -> Result<Passbook, LedgerError> {
        let mut tx = self.repo.begin().await?;
        let mut passbook = Repository::lock_active_passbook(&mut tx, account_id)
            .await?
            .ok_or_else(|| NotFound::Passbook(account_id.to_string()))?;

        passbook.advance_to_next_page();
        Repository::update_passbook(&mut tx, &passbook).await?;
        tx.commit().await.context("Failed to commit passbook page")?;
        Ok(passbook)
    }

    /// Retire the active passbook as `retired_as` (full, lost or replaced)
    /// and issue a new one. Printing continues after the last entry put on
    /// the old book.
    #[instrument(skip(self))]
    pub async fn replace_passbook(
        &self,
        account_id: AccountId,
        retired_as: PassbookStatus,
        actor: Option<&str>,
    ) -> Result<Passbook, LedgerError> {
        if !matches!(
            retired_as,
            PassbookStatus::Full | PassbookStatus::Lost | PassbookStatus::Replaced
        ) {
            return Err(ValidationError::InvalidPassbookRetirement(retired_as).into());
        }

        let mut tx = self.repo.begin().await?;
        let old = Repository::lock_active_passbook(&mut tx, account_id)
            .await?
            .ok_or_else(|| NotFound::Passbook(account_id.to_string()))?;

        let mut retired = old.clone();
        retired.status = retired_as;
        Repository::update_passbook(&mut tx, &retired).await?;

        let mut passbook = self.issue_passbook(&mut tx, account_id, actor).await?;
        passbook.last_printed = old.last_printed;
        Repository::update_passbook(&mut tx, &passbook).await?;
        tx.commit().await.context("Failed to commit passbook replacement")?;

        info!(old = %old.passbook_number, new = %passbook.passbook_number, retired_as = %retired_as, "replaced passbook");
        Ok(passbook)
    }

    async fn issue_passbook(
        &self,
        conn: &mut sqlx::SqliteConnection,
        account_id: AccountId,
        actor: Option<&str>,
    ) -> Result<Passbook, LedgerError> {
        let sequence = &self.sequences.passbook_name;
        let (number, prefix) = issued(sequence, Repository::advance_sequence(conn, sequence).await?)?;

        let mut passbook = Passbook::new(account_id, format_identifier(prefix.as_deref(), number));
        if let Some(actor) = actor {
            passbook = passbook.with_created_by(actor);
        }
        Repository::insert_passbook(conn, &passbook).await?;
        Ok(passbook)
    }
}
