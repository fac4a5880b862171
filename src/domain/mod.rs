mod account;
mod entry;
mod ledger;
mod money;
mod passbook;
mod query;
mod sequence;
mod validation;

pub use account::*;
pub use entry::*;
pub use ledger::*;
pub use money::*;
pub use passbook::*;
pub use query::*;
pub use sequence::*;
pub use validation::*;
