use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{LedgerConfig, SequenceConfig};
use crate::domain::{
    check_posting, format_identifier, normalize_timestamp, Account, AccountId, AccountStatus,
    Cents, Channel, EntryKind, LedgerEntry, SequenceCounter, ValidationError,
};
use crate::storage::{Advance, Repository};

use super::{LedgerError, NotFound};

/// Application service for the ledger core: sequence numbers, postings and
/// history reads. This is the interface the rest of the bank application
/// calls into.
#[derive(Clone)]
pub struct LedgerService {
    pub(super) repo: Repository,
    pub(super) sequences: SequenceConfig,
}

/// One movement to post against one account.
#[derive(Debug, Clone)]
pub struct PostingRequest {
    pub account_id: AccountId,
    pub kind: EntryKind,
    pub amount: Cents,
    pub currency: String,
    pub description: Option<String>,
    pub reference_number: Option<String>,
    pub channel: Channel,
    /// Business date. Defaults to the time of posting, held back to the
    /// account's last entry if the clock is behind it.
    pub transaction_date: Option<DateTime<Utc>>,
    /// Authenticated actor, recorded verbatim.
    pub created_by: Option<String>,
}

impl PostingRequest {
    pub fn new(
        account_id: AccountId,
        kind: EntryKind,
        amount: Cents,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            kind,
            amount,
            currency: currency.into().to_uppercase(),
            description: None,
            reference_number: None,
            channel: Channel::default(),
            transaction_date: None,
            created_by: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_reference(mut self, reference_number: impl Into<String>) -> Self {
        self.reference_number = Some(reference_number.into());
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    pub fn at(mut self, transaction_date: DateTime<Utc>) -> Self {
        self.transaction_date = Some(transaction_date);
        self
    }

    pub fn by(mut self, actor: impl Into<String>) -> Self {
        self.created_by = Some(actor.into());
        self
    }
}

/// A movement between two accounts of the same currency.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source: AccountId,
    pub destination: AccountId,
    pub amount: Cents,
    pub currency: String,
    pub description: Option<String>,
    pub reference_number: Option<String>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
}

impl TransferRequest {
    pub fn new(
        source: AccountId,
        destination: AccountId,
        amount: Cents,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            source,
            destination,
            amount,
            currency: currency.into().to_uppercase(),
            description: None,
            reference_number: None,
            transaction_date: None,
            created_by: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_reference(mut self, reference_number: impl Into<String>) -> Self {
        self.reference_number = Some(reference_number.into());
        self
    }

    pub fn at(mut self, transaction_date: DateTime<Utc>) -> Self {
        self.transaction_date = Some(transaction_date);
        self
    }

    pub fn by(mut self, actor: impl Into<String>) -> Self {
        self.created_by = Some(actor.into());
        self
    }

    fn leg(&self, account_id: AccountId, kind: EntryKind, date: DateTime<Utc>) -> PostingRequest {
        PostingRequest {
            account_id,
            kind,
            amount: self.amount,
            currency: self.currency.clone(),
            description: self.description.clone(),
            reference_number: self.reference_number.clone(),
            channel: Channel::Transfer,
            transaction_date: Some(date),
            created_by: self.created_by.clone(),
        }
    }
}

/// Both legs of a transfer, committed together.
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub debit: LedgerEntry,
    pub credit: LedgerEntry,
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository, sequences: SequenceConfig) -> Self {
        Self { repo, sequences }
    }

    /// Create (if needed) and migrate the database described by `config`,
    /// and seed the counters the ledger mints from.
    pub async fn open(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let repo = Repository::init(&config.database).await?;
        let service = Self::new(repo, config.sequences.clone());
        service.seed_ledger_sequences().await?;
        Ok(service)
    }

    /// Initialize a new database at the given path with default settings.
    pub async fn init(database_path: &str) -> Result<Self, LedgerError> {
        Self::open(&LedgerConfig::default().with_database_path(database_path)).await
    }

    /// Connect to an existing, already initialized database.
    pub async fn connect(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let repo = Repository::connect(&config.database, false).await?;
        // Brings files created before later migrations up to date
        repo.migrate().await?;
        let service = Self::new(repo, config.sequences.clone());
        service.seed_ledger_sequences().await?;
        Ok(service)
    }

    /// Close the connection pool. Later calls on this service fail.
    pub async fn close(&self) {
        self.repo.close().await;
    }

    async fn seed_ledger_sequences(&self) -> Result<(), LedgerError> {
        let seeds = [
            (&self.sequences.account_name, &self.sequences.account_prefix),
            (
                &self.sequences.transaction_name,
                &self.sequences.transaction_prefix,
            ),
            (&self.sequences.passbook_name, &self.sequences.passbook_prefix),
        ];
        for (name, prefix) in seeds {
            self.ensure_sequence(name, Some(prefix.as_str()), 0).await?;
        }
        Ok(())
    }

    // ========================
    // Sequence operations
    // ========================

    /// Next business identifier for `name`, e.g. `C1000001`.
    #[instrument(skip(self))]
    pub async fn mint_identifier(&self, name: &str) -> Result<String, LedgerError> {
        let (number, prefix) = issued(name, self.repo.next_sequence_value(name).await?)?;
        let identifier = format_identifier(prefix.as_deref(), number);
        info!(sequence = name, %identifier, "minted identifier");
        Ok(identifier)
    }

    /// Next raw number for `name`, without formatting.
    #[instrument(skip(self))]
    pub async fn next_number(&self, name: &str) -> Result<u64, LedgerError> {
        let (number, _) = issued(name, self.repo.next_sequence_value(name).await?)?;
        debug!(sequence = name, number, "issued number");
        Ok(number)
    }

    /// Create a counter whose first issued number will be `start + 1`.
    pub async fn create_sequence(
        &self,
        name: &str,
        prefix: Option<&str>,
        start: u64,
    ) -> Result<SequenceCounter, LedgerError> {
        let start_value =
            i64::try_from(start).map_err(|_| ValidationError::SequenceValueOutOfRange(start))?;
        if !self.repo.insert_sequence(name, prefix, start_value).await? {
            return Err(ValidationError::SequenceExists(name.to_string()).into());
        }
        info!(sequence = name, start, "created sequence");
        self.get_sequence(name).await
    }

    /// Like [`LedgerService::create_sequence`], but an existing counter is
    /// left untouched. Returns whether a row was created.
    pub async fn ensure_sequence(
        &self,
        name: &str,
        prefix: Option<&str>,
        start: u64,
    ) -> Result<bool, LedgerError> {
        let start_value =
            i64::try_from(start).map_err(|_| ValidationError::SequenceValueOutOfRange(start))?;
        let created = self.repo.insert_sequence(name, prefix, start_value).await?;
        if created {
            info!(sequence = name, start, "seeded sequence");
        }
        Ok(created)
    }

    pub async fn get_sequence(&self, name: &str) -> Result<SequenceCounter, LedgerError> {
        self.repo
            .get_sequence(name)
            .await?
            .ok_or_else(|| NotFound::Sequence(name.to_string()).into())
    }

    /// The last number handed out for `name`.
    pub async fn current_value(&self, name: &str) -> Result<u64, LedgerError> {
        Ok(self.get_sequence(name).await?.last_number)
    }

    /// Privileged override of a counter's last number. Issuing a value that
    /// was already used again is the operator's responsibility.
    #[instrument(skip(self))]
    pub async fn reset_sequence(&self, name: &str, value: u64) -> Result<(), LedgerError> {
        let new_value =
            i64::try_from(value).map_err(|_| ValidationError::SequenceValueOutOfRange(value))?;
        if !self.repo.reset_sequence(name, new_value).await? {
            return Err(NotFound::Sequence(name.to_string()).into());
        }
        warn!(sequence = name, value, "sequence reset by administrative override");
        Ok(())
    }

    // ========================
    // Account operations
    // ========================

    /// Open an account with a zero balance and a freshly minted number.
    #[instrument(skip(self))]
    pub async fn open_account(
        &self,
        name: &str,
        currency: &str,
        allow_overdraft: bool,
        actor: Option<&str>,
    ) -> Result<Account, LedgerError> {
        let sequence = &self.sequences.account_name;
        let mut tx = self.repo.begin().await?;

        let (number, prefix) = issued(sequence, Repository::advance_sequence(&mut tx, sequence).await?)?;
        let mut account = Account::new(
            format_identifier(prefix.as_deref(), number),
            name.to_string(),
            currency.to_string(),
        )
        .with_overdraft(allow_overdraft);
        if let Some(actor) = actor {
            account = account.with_created_by(actor);
        }

        Repository::insert_account(&mut tx, &account).await?;
        tx.commit().await.context("Failed to commit account")?;

        info!(account = %account.account_number, currency = %account.currency, "opened account");
        Ok(account)
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.repo
            .get_account(id)
            .await?
            .ok_or_else(|| NotFound::Account(id.to_string()).into())
    }

    pub async fn get_account_by_number(&self, account_number: &str) -> Result<Account, LedgerError> {
        self.repo
            .get_account_by_number(account_number)
            .await?
            .ok_or_else(|| NotFound::Account(account_number.to_string()).into())
    }

    /// Move an account between active, inactive and frozen. Closing goes
    /// through [`LedgerService::close_account`].
    pub async fn set_account_status(
        &self,
        id: AccountId,
        status: AccountStatus,
    ) -> Result<Account, LedgerError> {
        if status == AccountStatus::Closed {
            return self.close_account(id).await;
        }

        let mut tx = self.repo.begin().await?;
        let mut account = Repository::lock_account(&mut tx, id)
            .await?
            .ok_or_else(|| NotFound::Account(id.to_string()))?;
        if account.is_closed() {
            return Err(ValidationError::AlreadyClosed(account.account_number).into());
        }

        Repository::update_account_status(&mut tx, id, status, None).await?;
        tx.commit().await.context("Failed to commit account status")?;

        info!(account = %account.account_number, from = %account.status, to = %status, "changed account status");
        account.status = status;
        Ok(account)
    }

    /// Close an account. The balance must be exactly zero.
    pub async fn close_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        let mut tx = self.repo.begin().await?;
        let mut account = Repository::lock_account(&mut tx, id)
            .await?
            .ok_or_else(|| NotFound::Account(id.to_string()))?;
        if account.is_closed() {
            return Err(ValidationError::AlreadyClosed(account.account_number).into());
        }
        if account.balance != 0 {
            return Err(ValidationError::NonZeroBalance {
                account_number: account.account_number,
                balance: account.balance,
            }
            .into());
        }

        let closed_at = normalize_timestamp(Utc::now());
        Repository::update_account_status(&mut tx, id, AccountStatus::Closed, Some(closed_at))
            .await?;
        Repository::close_active_passbook(&mut tx, id).await?;
        tx.commit().await.context("Failed to commit account closure")?;

        info!(account = %account.account_number, "closed account");
        account.status = AccountStatus::Closed;
        account.closed_at = Some(closed_at);
        Ok(account)
    }

    // ========================
    // Posting
    // ========================

    /// Append one entry to an account and move its balance, atomically.
    #[instrument(skip(self, request), fields(account = %request.account_id, kind = %request.kind, amount = request.amount))]
    pub async fn post(&self, request: PostingRequest) -> Result<LedgerEntry, LedgerError> {
        if request.amount <= 0 {
            return Err(ValidationError::NonPositiveAmount(request.amount).into());
        }

        let mut tx = self.repo.begin().await?;
        let entry = match self.post_on(&mut tx, request).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "posting rejected");
                return Err(err);
            }
        };
        tx.commit().await.context("Failed to commit posting")?;

        info!(
            transaction = %entry.transaction_number,
            balance_after = entry.balance_after,
            "posted entry"
        );
        Ok(entry)
    }

    /// Post both legs of a transfer in one unit of work: either both
    /// entries are committed or neither is.
    #[instrument(skip(self, request), fields(source = %request.source, destination = %request.destination, amount = request.amount))]
    pub async fn post_transfer(
        &self,
        mut request: TransferRequest,
    ) -> Result<TransferResult, LedgerError> {
        if request.source == request.destination {
            return Err(ValidationError::SameAccount.into());
        }
        if request.amount <= 0 {
            return Err(ValidationError::NonPositiveAmount(request.amount).into());
        }

        if request.reference_number.is_none() {
            request.reference_number = Some(Uuid::new_v4().simple().to_string());
        }
        let mut tx = self.repo.begin().await?;

        let legs = async {
            // Take the write lock before stamping the default date so both
            // legs are dated after every entry already committed.
            Repository::lock_account(&mut tx, request.source).await?;
            let date = match request.transaction_date {
                Some(date) => date,
                None => {
                    let source = Repository::last_entry_on(&mut tx, request.source).await?;
                    let destination =
                        Repository::last_entry_on(&mut tx, request.destination).await?;
                    [source, destination]
                        .iter()
                        .flatten()
                        .map(|last| last.transaction_date)
                        .fold(normalize_timestamp(Utc::now()), |latest, date| latest.max(date))
                }
            };

            let debit = self
                .post_on(&mut tx, request.leg(request.source, EntryKind::TransferOut, date))
                .await?;
            let credit = self
                .post_on(&mut tx, request.leg(request.destination, EntryKind::TransferIn, date))
                .await?;
            Ok::<_, LedgerError>(TransferResult { debit, credit })
        }
        .await;

        let result = match legs {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "transfer rejected");
                return Err(err);
            }
        };
        tx.commit().await.context("Failed to commit transfer")?;

        info!(
            debit = %result.debit.transaction_number,
            credit = %result.credit.transaction_number,
            "posted transfer"
        );
        Ok(result)
    }

    /// The posting algorithm, run inside the caller's transaction. Nothing
    /// is visible to other connections until that transaction commits.
    async fn post_on(
        &self,
        conn: &mut SqliteConnection,
        request: PostingRequest,
    ) -> Result<LedgerEntry, LedgerError> {
        let account = Repository::lock_account(conn, request.account_id)
            .await?
            .ok_or(ValidationError::UnknownAccount(request.account_id))?;

        let balance_after = check_posting(&account, request.kind, request.amount, &request.currency)?;

        let last = Repository::last_entry_on(conn, account.id).await?;
        match &last {
            Some(last) if last.balance_after != account.balance => {
                return Err(LedgerError::Integrity(format!(
                    "account {} balance {} disagrees with last entry {} ({})",
                    account.account_number,
                    account.balance,
                    last.transaction_number,
                    last.balance_after
                )));
            }
            None if account.balance != 0 => {
                return Err(LedgerError::Integrity(format!(
                    "account {} has balance {} but no ledger history",
                    account.account_number, account.balance
                )));
            }
            _ => {}
        }

        let last_date = last.as_ref().map(|entry| entry.transaction_date);
        let transaction_date = match request.transaction_date {
            Some(date) => {
                let date = normalize_timestamp(date);
                if let Some(last) = last_date.filter(|last| date < *last) {
                    return Err(ValidationError::Backdated { date, last }.into());
                }
                date
            }
            // A wall clock stepped backwards must not reject ordinary posts
            None => {
                let now = normalize_timestamp(Utc::now());
                match last_date {
                    Some(last) if now < last => {
                        warn!(%now, %last, "clock behind last entry, holding date at last entry");
                        last
                    }
                    _ => now,
                }
            }
        };

        let sequence = &self.sequences.transaction_name;
        let (number, prefix) = issued(sequence, Repository::advance_sequence(conn, sequence).await?)?;

        let mut entry = LedgerEntry {
            id: Uuid::new_v4(),
            seq: 0,
            transaction_number: format_identifier(prefix.as_deref(), number),
            account_id: account.id,
            kind: request.kind,
            amount: request.amount,
            currency: account.currency.clone(),
            balance_before: account.balance,
            balance_after,
            description: request.description,
            reference_number: request.reference_number,
            channel: request.channel,
            transaction_date,
            processed_at: normalize_timestamp(Utc::now()),
            created_by: request.created_by,
        };

        entry.seq = Repository::insert_entry(conn, &entry).await?;
        Repository::update_balance(conn, account.id, balance_after).await?;
        Ok(entry)
    }
}

pub(super) fn issued(name: &str, advance: Advance) -> Result<(u64, Option<String>), LedgerError> {
    match advance {
        Advance::Issued { number, prefix } => Ok((number, prefix)),
        Advance::Exhausted => Err(LedgerError::SequenceExhausted(name.to_string())),
        Advance::Missing => Err(NotFound::Sequence(name.to_string()).into()),
    }
}
