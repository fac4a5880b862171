use anyhow::{Context, Result};
use std::io::Write;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};

use crate::application::{LedgerService, PostingRequest, TransferRequest};
use crate::config::LedgerConfig;
use crate::domain::{
    format_cents, parse_cents, Account, AccountStatus, Channel, DateRange, EntryKind, LedgerEntry,
    PageRequest, Passbook, PassbookStatus, SortOrder,
};
use crate::io::export::write_entries_csv;

/// Branchledger - bank ledger core administration
#[derive(Parser)]
#[command(name = "branchledger")]
#[command(about = "Sequence numbers, ledger postings and history reads for a branch banking system")]
#[command(version)]
pub struct Cli {
    /// Database file path (overrides configuration)
    #[arg(short, long)]
    pub database: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database and seed the ledger sequences
    Init,

    /// Sequence counter commands
    #[command(subcommand)]
    Sequence(SequenceCommands),

    /// Account commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Passbook commands
    #[command(subcommand)]
    Passbook(PassbookCommands),

    /// Post a single movement to an account
    Post {
        /// Account number
        account: String,

        /// deposit, withdrawal, transfer_in, transfer_out, interest or fee
        kind: String,

        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Currency (defaults to the account currency)
        #[arg(long)]
        currency: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        /// External reference number
        #[arg(short, long)]
        reference: Option<String>,

        /// teller, atm, online, mobile or transfer
        #[arg(long, default_value = "teller")]
        channel: String,

        /// Business date (YYYY-MM-DD, defaults to now)
        #[arg(long)]
        date: Option<String>,

        /// Actor recorded on the entry
        #[arg(long)]
        by: Option<String>,
    },

    /// Move money between two accounts atomically
    Transfer {
        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Source account number
        #[arg(long)]
        from: String,

        /// Destination account number
        #[arg(long)]
        to: String,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        reference: Option<String>,

        #[arg(long)]
        by: Option<String>,
    },

    /// Show one page of an account's history
    History {
        /// Account number
        account: String,

        /// Page number, starting at 0
        #[arg(short, long, default_value = "0")]
        page: u32,

        #[arg(short, long, default_value = "50")]
        size: u32,

        /// Newest first
        #[arg(long)]
        desc: bool,

        /// Snapshot printed by an earlier page; keeps later pages stable
        #[arg(long)]
        as_of: Option<i64>,
    },

    /// Produce a statement for a date range
    Statement {
        /// Account number
        account: String,

        /// First day (YYYY-MM-DD)
        #[arg(long)]
        from: String,

        /// Last day, inclusive (YYYY-MM-DD)
        #[arg(long)]
        to: String,

        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Verify the balance chain of one or more accounts
    Check {
        /// Account numbers
        #[arg(required = true)]
        accounts: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum SequenceCommands {
    /// Create a counter; the first issued number is START + 1
    Create {
        name: String,

        #[arg(short, long)]
        prefix: Option<String>,

        #[arg(short, long, default_value = "0")]
        start: u64,
    },

    /// Issue the next identifier
    Next { name: String },

    /// Show a counter without advancing it
    Show { name: String },

    /// Overwrite the last issued number
    Reset { name: String, value: u64 },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open an account with a zero balance
    Open {
        name: String,

        #[arg(short, long, default_value = "USD")]
        currency: String,

        #[arg(long)]
        allow_overdraft: bool,

        #[arg(long)]
        by: Option<String>,
    },

    /// Show an account
    Show { account: String },

    /// Set an account to active, inactive or frozen
    Status { account: String, status: String },

    /// Close an account with a zero balance
    Close { account: String },
}

#[derive(Subcommand)]
pub enum PassbookCommands {
    /// Show the active passbook, issuing one if needed
    Show {
        account: String,

        #[arg(long)]
        by: Option<String>,
    },

    /// Print the next unprinted lines that fit on the current page
    Print { account: String },

    /// Turn to a fresh page
    NextPage { account: String },

    /// Retire the active passbook as full, lost or replaced and issue a new one
    Replace {
        account: String,

        #[arg(long, default_value = "full")]
        reason: String,

        #[arg(long)]
        by: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl Cli {
    pub async fn run(self, mut config: LedgerConfig) -> Result<()> {
        if let Some(path) = self.database {
            config = config.with_database_path(path);
        }

        if matches!(self.command, Commands::Init) {
            LedgerService::open(&config).await?;
            println!("Database initialized: {}", config.database.path);
            return Ok(());
        }

        let service = LedgerService::connect(&config).await?;
        match self.command {
            Commands::Init => {}

            Commands::Sequence(cmd) => run_sequence_command(&service, cmd).await?,

            Commands::Account(cmd) => run_account_command(&service, cmd).await?,

            Commands::Passbook(cmd) => run_passbook_command(&service, cmd).await?,

            Commands::Post {
                account,
                kind,
                amount,
                currency,
                description,
                reference,
                channel,
                date,
                by,
            } => {
                let account = service.get_account_by_number(&account).await?;
                let kind = EntryKind::from_str(&kind)
                    .with_context(|| format!("Unknown transaction kind '{kind}'"))?;
                let channel = Channel::from_str(&channel)
                    .with_context(|| format!("Unknown channel '{channel}'"))?;
                let amount =
                    parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;

                let mut request = PostingRequest::new(
                    account.id,
                    kind,
                    amount,
                    currency.unwrap_or_else(|| account.currency.clone()),
                )
                .with_channel(channel);
                if let Some(description) = description {
                    request = request.with_description(description);
                }
                if let Some(reference) = reference {
                    request = request.with_reference(reference);
                }
                if let Some(date) = date {
                    request = request.at(parse_date(&date)?);
                }
                if let Some(by) = by {
                    request = request.by(by);
                }

                let entry = service.post(request).await?;
                println!(
                    "Posted {} {} {} on {}: balance {} -> {}",
                    entry.transaction_number,
                    entry.kind,
                    format_cents(entry.amount),
                    account.account_number,
                    format_cents(entry.balance_before),
                    format_cents(entry.balance_after)
                );
            }

            Commands::Transfer {
                amount,
                from,
                to,
                description,
                reference,
                by,
            } => {
                let source = service.get_account_by_number(&from).await?;
                let destination = service.get_account_by_number(&to).await?;
                let amount =
                    parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;

                let mut request =
                    TransferRequest::new(source.id, destination.id, amount, source.currency.clone());
                if let Some(description) = description {
                    request = request.with_description(description);
                }
                if let Some(reference) = reference {
                    request = request.with_reference(reference);
                }
                if let Some(by) = by {
                    request = request.by(by);
                }

                let result = service.post_transfer(request).await?;
                println!(
                    "Transferred {} {} -> {} ({} / {})",
                    format_cents(amount),
                    source.account_number,
                    destination.account_number,
                    result.debit.transaction_number,
                    result.credit.transaction_number
                );
            }

            Commands::History {
                account,
                page,
                size,
                desc,
                as_of,
            } => {
                let account = service.get_account_by_number(&account).await?;
                let order = if desc {
                    SortOrder::Descending
                } else {
                    SortOrder::Ascending
                };
                let mut request = PageRequest::new(page, size)?;
                if let Some(seq) = as_of {
                    request = request.pinned_to(seq);
                }
                let page = service.list_by_account(account.id, request, order).await?;

                if page.items.is_empty() {
                    println!("No entries found.");
                } else {
                    print_entries(&mut std::io::stdout(), &page.items)?;
                    println!(
                        "Page {} of {} ({} entries)",
                        page.page + 1,
                        page.total_pages(),
                        page.total_items
                    );
                    if let Some(seq) = page.as_of {
                        println!("Snapshot: --as-of {}", seq);
                    }
                }
            }

            Commands::Statement {
                account,
                from,
                to,
                format,
                output,
            } => {
                let account = service.get_account_by_number(&account).await?;
                let range = DateRange::days(parse_day(&from)?, parse_day(&to)?)?;
                let statement = service.statement(account.id, range).await?;

                let mut out: Box<dyn std::io::Write> = match &output {
                    Some(path) => Box::new(
                        std::fs::File::create(path)
                            .with_context(|| format!("Failed to create {path}"))?,
                    ),
                    None => Box::new(std::io::stdout()),
                };

                match format {
                    OutputFormat::Json => {
                        serde_json::to_writer_pretty(&mut out, &statement)?;
                        writeln!(out)?;
                    }
                    OutputFormat::Csv => {
                        write_entries_csv(&statement.entries, &mut out)?;
                    }
                    OutputFormat::Table => {
                        writeln!(
                            out,
                            "Statement for {} ({}) {} to {}",
                            statement.account_number,
                            statement.account_name,
                            from,
                            to
                        )?;
                        writeln!(out, "Opening balance: {}", format_cents(statement.opening_balance))?;
                        print_entries(&mut out, &statement.entries)?;
                        writeln!(
                            out,
                            "Credits: {} ({})  Debits: {} ({})",
                            format_cents(statement.total_credits),
                            statement.credit_count,
                            format_cents(statement.total_debits),
                            statement.debit_count
                        )?;
                        writeln!(out, "Closing balance: {}", format_cents(statement.closing_balance))?;
                    }
                }
                out.flush()?;
            }

            Commands::Check { accounts } => {
                let mut broken = 0;
                for number in accounts {
                    let account = service.get_account_by_number(&number).await?;
                    let report = service.verify_chain(account.id).await?;
                    match &report.failure {
                        None => println!(
                            "OK     {}: {} entries, balance {}",
                            report.account_number,
                            report.entries_checked,
                            format_cents(report.account_balance)
                        ),
                        Some(failure) => {
                            broken += 1;
                            println!("BROKEN {}: {}", report.account_number, failure);
                        }
                    }
                }
                if broken > 0 {
                    anyhow::bail!("{broken} account(s) failed chain verification");
                }
            }
        }
        Ok(())
    }
}

async fn run_sequence_command(service: &LedgerService, cmd: SequenceCommands) -> Result<()> {
    match cmd {
        SequenceCommands::Create {
            name,
            prefix,
            start,
        } => {
            let counter = service
                .create_sequence(&name, prefix.as_deref(), start)
                .await?;
            println!(
                "Created sequence {} (next: {})",
                counter.name,
                counter.identifier(counter.last_number.saturating_add(1))
            );
        }
        SequenceCommands::Next { name } => {
            println!("{}", service.mint_identifier(&name).await?);
        }
        SequenceCommands::Show { name } => {
            let counter = service.get_sequence(&name).await?;
            println!("Name:        {}", counter.name);
            println!("Prefix:      {}", counter.prefix.as_deref().unwrap_or("-"));
            println!("Last number: {}", counter.last_number);
            println!("Updated:     {}", counter.updated_at.format("%Y-%m-%d %H:%M:%S"));
        }
        SequenceCommands::Reset { name, value } => {
            service.reset_sequence(&name, value).await?;
            println!("Sequence {name} reset to {value}");
        }
    }
    Ok(())
}

async fn run_account_command(service: &LedgerService, cmd: AccountCommands) -> Result<()> {
    match cmd {
        AccountCommands::Open {
            name,
            currency,
            allow_overdraft,
            by,
        } => {
            let account = service
                .open_account(&name, &currency, allow_overdraft, by.as_deref())
                .await?;
            println!("Opened account {} ({})", account.account_number, account.name);
        }
        AccountCommands::Show { account } => {
            let account = service.get_account_by_number(&account).await?;
            print_account(&account);
        }
        AccountCommands::Status { account, status } => {
            let account = service.get_account_by_number(&account).await?;
            let status = AccountStatus::from_str(&status)
                .with_context(|| format!("Unknown account status '{status}'"))?;
            let account = service.set_account_status(account.id, status).await?;
            println!("Account {} is now {}", account.account_number, account.status);
        }
        AccountCommands::Close { account } => {
            let account = service.get_account_by_number(&account).await?;
            let account = service.close_account(account.id).await?;
            println!("Closed account {}", account.account_number);
        }
    }
    Ok(())
}

async fn run_passbook_command(service: &LedgerService, cmd: PassbookCommands) -> Result<()> {
    match cmd {
        PassbookCommands::Show { account, by } => {
            let account = service.get_account_by_number(&account).await?;
            let passbook = service.open_passbook(account.id, by.as_deref()).await?;
            print_passbook(&passbook);
        }
        PassbookCommands::Print { account } => {
            let account = service.get_account_by_number(&account).await?;
            service.open_passbook(account.id, None).await?;
            let lines = service.unprinted_lines(account.id).await?;
            if lines.is_empty() {
                println!("Nothing to print.");
                return Ok(());
            }
            print_entries(&mut std::io::stdout(), &lines)?;
            let passbook = service.record_print(account.id, &lines).await?;
            println!(
                "Printed {} line(s); next position page {} line {}",
                lines.len(),
                passbook.current_page,
                passbook.last_printed_line + 1
            );
        }
        PassbookCommands::NextPage { account } => {
            let account = service.get_account_by_number(&account).await?;
            let passbook = service.next_passbook_page(account.id).await?;
            println!("Passbook {} now on page {}", passbook.passbook_number, passbook.current_page);
        }
        PassbookCommands::Replace { account, reason, by } => {
            let account = service.get_account_by_number(&account).await?;
            let reason = PassbookStatus::from_str(&reason)
                .with_context(|| format!("Unknown passbook status '{reason}'"))?;
            let passbook = service
                .replace_passbook(account.id, reason, by.as_deref())
                .await?;
            println!("Issued passbook {}", passbook.passbook_number);
        }
    }
    Ok(())
}

fn print_passbook(passbook: &Passbook) {
    println!("Number:     {}", passbook.passbook_number);
    println!("Status:     {}", passbook.status);
    println!("Page:       {}", passbook.current_page);
    println!("Line:       {} of {}", passbook.last_printed_line, passbook.lines_per_page);
    if let Some(printed) = passbook.last_print_date {
        println!("Printed:    {}", printed.format("%Y-%m-%d %H:%M:%S"));
    }
    println!("Issued:     {}", passbook.issued_at.format("%Y-%m-%d %H:%M:%S"));
}

fn print_account(account: &Account) {
    println!("Number:    {}", account.account_number);
    println!("Name:      {}", account.name);
    println!("Balance:   {} {}", format_cents(account.balance), account.currency);
    println!("Status:    {}", account.status);
    println!("Overdraft: {}", if account.allow_overdraft { "allowed" } else { "no" });
    println!("Opened:    {}", account.opened_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(closed_at) = account.closed_at {
        println!("Closed:    {}", closed_at.format("%Y-%m-%d %H:%M:%S"));
    }
}

fn print_entries(out: &mut dyn Write, entries: &[LedgerEntry]) -> std::io::Result<()> {
    writeln!(
        out,
        "{:<12} {:<10} {:<12} {:>12} {:>14}  DESCRIPTION",
        "NUMBER", "DATE", "KIND", "AMOUNT", "BALANCE"
    )?;
    writeln!(out, "{}", "-".repeat(78))?;
    for entry in entries {
        writeln!(
            out,
            "{:<12} {:<10} {:<12} {:>12} {:>14}  {}",
            entry.transaction_number,
            entry.transaction_date.format("%Y-%m-%d"),
            entry.kind,
            format_cents(entry.signed_amount()),
            format_cents(entry.balance_after),
            truncate(entry.description.as_deref().unwrap_or(""), 30)
        )?;
    }
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    }
}

fn parse_day(date_str: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{date_str}'. Use YYYY-MM-DD"))
}

fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    let day = parse_day(date_str)?;
    Ok(day.and_time(chrono::NaiveTime::MIN).and_utc())
}
