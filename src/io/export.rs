use anyhow::Result;
use std::io::Write;

use crate::application::{LedgerService, Statement};
use crate::domain::{format_cents, AccountId, DateRange, LedgerEntry, SortOrder, MAX_PAGE_SIZE};

const ENTRY_HEADER: [&str; 12] = [
    "transaction_number",
    "transaction_date",
    "kind",
    "channel",
    "amount",
    "currency",
    "balance_before",
    "balance_after",
    "description",
    "reference_number",
    "created_by",
    "processed_at",
];

/// Writes ledger history and statements as CSV or JSON.
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Export the entries of a statement to CSV. Returns the row count.
    pub async fn export_statement_csv<W: Write>(
        &self,
        account_id: AccountId,
        range: DateRange,
        writer: W,
    ) -> Result<usize> {
        let statement = self.service.statement(account_id, range).await?;
        write_entries_csv(&statement.entries, writer)
    }

    /// Export a full statement, balances and totals included, as JSON.
    pub async fn export_statement_json<W: Write>(
        &self,
        account_id: AccountId,
        range: DateRange,
        mut writer: W,
    ) -> Result<Statement> {
        let statement = self.service.statement(account_id, range).await?;

        let json = serde_json::to_string_pretty(&statement)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(statement)
    }

    /// Export an account's whole history, oldest first, reading it in
    /// keyset pages so memory stays bounded.
    pub async fn export_history_csv<W: Write>(
        &self,
        account_id: AccountId,
        writer: W,
    ) -> Result<usize> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(ENTRY_HEADER)?;

        let mut cursor = None;
        let mut count = 0;
        loop {
            let page = self
                .service
                .list_after(account_id, cursor, MAX_PAGE_SIZE, SortOrder::Ascending)
                .await?;
            if page.items.is_empty() {
                break;
            }
            for entry in &page.items {
                csv_writer.write_record(entry_record(entry))?;
                count += 1;
            }
            cursor = page.next;
        }

        csv_writer.flush()?;
        Ok(count)
    }
}

/// Write entries to CSV with a header row. Returns the row count.
pub fn write_entries_csv<W: Write>(entries: &[LedgerEntry], writer: W) -> Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(ENTRY_HEADER)?;
    for entry in entries {
        csv_writer.write_record(entry_record(entry))?;
    }
    csv_writer.flush()?;
    Ok(entries.len())
}

fn entry_record(entry: &LedgerEntry) -> [String; 12] {
    [
        entry.transaction_number.clone(),
        entry.transaction_date.to_rfc3339(),
        entry.kind.as_str().to_string(),
        entry.channel.as_str().to_string(),
        format_cents(entry.amount),
        entry.currency.clone(),
        format_cents(entry.balance_before),
        format_cents(entry.balance_after),
        entry.description.clone().unwrap_or_default(),
        entry.reference_number.clone().unwrap_or_default(),
        entry.created_by.clone().unwrap_or_default(),
        entry.processed_at.to_rfc3339(),
    ]
}
