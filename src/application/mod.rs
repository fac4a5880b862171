// Application layer: the ledger core's public operations.
// `service` holds the sequence generator and the ledger writer,
// `reporting` the ledger reader, `passbook` the durable print position
// of issued passbooks.

pub mod error;
pub mod passbook;
pub mod reporting;
pub mod service;

pub use error::*;
pub use reporting::Statement;
pub use service::{LedgerService, PostingRequest, TransferRequest, TransferResult};
