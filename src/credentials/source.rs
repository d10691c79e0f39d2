//! Credential sources.
//!
//! Sources only know how to return the raw JSON blob stored under a resource
//! key. They do not parse, cache, or retry.

use crate::error::{DbError, DbResult};
use crate::models::ResourceKey;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Environment variable prefix for [`EnvCredentialSource`].
pub const DEFAULT_ENV_PREFIX: &str = "DBPOOL_SECRET_";

/// Backing secret store reachable by resource key.
#[async_trait]
pub trait CredentialSource: Send + Sync + std::fmt::Debug {
    /// Fetch the raw secret blob for `key`.
    ///
    /// Fails with `CredentialNotFound` when the key is unregistered and
    /// `CredentialSourceUnavailable` when the store cannot be reached.
    async fn fetch_raw(&self, key: &ResourceKey) -> DbResult<String>;

    /// Get the name of this source for logging.
    fn name(&self) -> &'static str;
}

/// In-memory secret store, optionally loaded from a JSON file.
///
/// The file maps resource keys to blobs; a blob may be a JSON object or a
/// JSON-encoded string:
///
/// ```text
/// {
///   "/Example/RDS/MySQL/Credentials": {"host": "db", "username": "app", ...},
///   "/Example/DynamoDB/Credentials": "{\"region\": \"eu-west-1\"}"
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialSource {
    secrets: HashMap<ResourceKey, String>,
}

impl StaticCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with_secret(mut self, key: ResourceKey, blob: impl Into<String>) -> Self {
        self.insert(key, blob);
        self
    }

    pub fn insert(&mut self, key: ResourceKey, blob: impl Into<String>) {
        self.secrets.insert(key, blob.into());
    }

    /// Parse a key-to-blob JSON document.
    pub fn from_json_str(document: &str) -> DbResult<Self> {
        let value: serde_json::Value = serde_json::from_str(document)
            .map_err(|e| DbError::configuration(format!("Invalid credentials document: {}", e)))?;

        let Some(entries) = value.as_object() else {
            return Err(DbError::configuration(
                "Credentials document must be a JSON object keyed by resource key",
            ));
        };

        let mut source = Self::new();
        for (key, blob) in entries {
            let key = ResourceKey::new(key.as_str())?;
            let blob = match blob {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Object(_) => blob.to_string(),
                _ => {
                    return Err(DbError::configuration(format!(
                        "Credential '{}' must be an object or a JSON string",
                        key
                    )));
                }
            };
            source.insert(key, blob);
        }
        Ok(source)
    }

    /// Load a key-to-blob JSON document from disk.
    pub fn from_file(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|e| {
            DbError::configuration(format!(
                "Failed to read credentials file {}: {}",
                path.display(),
                e
            ))
        })?;
        let source = Self::from_json_str(&document)?;
        info!(
            path = %path.display(),
            count = source.len(),
            "Loaded credentials file"
        );
        Ok(source)
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

#[async_trait]
impl CredentialSource for StaticCredentialSource {
    async fn fetch_raw(&self, key: &ResourceKey) -> DbResult<String> {
        self.secrets
            .get(key)
            .cloned()
            .ok_or_else(|| DbError::credential_not_found(key.as_str()))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Reads blobs from environment variables (development and testing).
///
/// `/Example/RDS/MySQL/Credentials` is looked up as
/// `DBPOOL_SECRET_EXAMPLE_RDS_MYSQL_CREDENTIALS`.
#[derive(Debug, Clone)]
pub struct EnvCredentialSource {
    prefix: String,
}

impl EnvCredentialSource {
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_ENV_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Converts a resource key to the environment variable name.
    pub fn env_var_name(&self, key: &ResourceKey) -> String {
        let mut name = String::with_capacity(self.prefix.len() + key.as_str().len());
        name.push_str(&self.prefix);

        let mut last_was_separator = true;
        for c in key.as_str().chars() {
            if c.is_ascii_alphanumeric() {
                name.push(c.to_ascii_uppercase());
                last_was_separator = false;
            } else if !last_was_separator {
                name.push('_');
                last_was_separator = true;
            }
        }

        if name.ends_with('_') && name.len() > self.prefix.len() {
            name.pop();
        }
        name
    }
}

impl Default for EnvCredentialSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialSource for EnvCredentialSource {
    async fn fetch_raw(&self, key: &ResourceKey) -> DbResult<String> {
        let var = self.env_var_name(key);
        match std::env::var(&var) {
            Ok(blob) => Ok(blob),
            Err(std::env::VarError::NotPresent) => {
                debug!(resource_key = %key, env_var = %var, "Credential not in environment");
                Err(DbError::credential_not_found(key.as_str()))
            }
            Err(std::env::VarError::NotUnicode(_)) => Err(DbError::invalid_credential(
                key.as_str(),
                format!("{} is not valid unicode", var),
            )),
        }
    }

    fn name(&self) -> &'static str {
        "env"
    }
}

/// Tries each source in order and returns the first blob found.
///
/// A source that is unavailable does not stop the chain, but if no later
/// source has the key the unavailability is reported instead of a plain
/// not-found.
#[derive(Debug, Clone, Default)]
pub struct ChainedCredentialSource {
    sources: Vec<Arc<dyn CredentialSource>>,
}

impl ChainedCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Arc<dyn CredentialSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl CredentialSource for ChainedCredentialSource {
    async fn fetch_raw(&self, key: &ResourceKey) -> DbResult<String> {
        let mut unavailable = None;

        for source in &self.sources {
            match source.fetch_raw(key).await {
                Ok(blob) => {
                    debug!(resource_key = %key, source = source.name(), "Credential found");
                    return Ok(blob);
                }
                Err(DbError::CredentialNotFound { .. }) => continue,
                Err(e @ DbError::CredentialSourceUnavailable { .. }) => {
                    debug!(
                        resource_key = %key,
                        source = source.name(),
                        error = %e,
                        "Credential source unavailable, trying next"
                    );
                    unavailable.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(unavailable.unwrap_or_else(|| DbError::credential_not_found(key.as_str())))
    }

    fn name(&self) -> &'static str {
        "chain"
    }
}
