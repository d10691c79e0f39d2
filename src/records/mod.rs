//! `transaction_records` CRUD over the pool registry.

pub mod flavor;
pub mod store;

pub use flavor::SqlFlavor;
pub use store::{OperationOutcome, TransactionStore};
