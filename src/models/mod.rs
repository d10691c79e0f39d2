//! Data models for the pool registry.
//!
//! This module re-exports all model types used throughout the application.

pub mod credential;
pub mod dialect;
pub mod transaction;

// Re-export commonly used types
pub use credential::{Credential, KeyValueCredential, ResourceKey, SqlCredential};
pub use dialect::{Dialect, DialectFamily};
pub use transaction::{NewTransaction, TABLE_NAME, TransactionRecord};
