mod ledger;
mod passbook;
mod repository;
mod sequence;

pub use ledger::RangeTotals;
pub use repository::*;
pub use sequence::Advance;

/// SQL migration for the initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// Passbook print state
pub const MIGRATION_002_PASSBOOKS: &str = include_str!("migrations/002_passbooks.sql");
