//! Credential resolution.
//!
//! A [`CredentialSource`] returns raw secret blobs for a resource key; the
//! [`CredentialResolver`] parses them into typed [`Credential`]s and applies
//! a cache policy.
//!
//! [`Credential`]: crate::models::Credential

pub mod resolver;
pub mod source;

pub use resolver::{CachePolicy, CredentialResolver};
pub use source::{
    ChainedCredentialSource, CredentialSource, EnvCredentialSource, StaticCredentialSource,
};
