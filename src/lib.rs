//! DB Pool Registry Library
//!
//! Lazily built, credential-keyed connection pools shared across a process,
//! plus CRUD operations on a `transaction_records` table for every SQL
//! dialect the registry knows.

pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod models;
pub mod records;

pub use config::Config;
pub use db::{PoolRegistry, SqlxBackend};
pub use error::{DbError, DbResult};
pub use records::TransactionStore;
