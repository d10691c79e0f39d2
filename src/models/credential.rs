//! Credential and resource key models.
//!
//! Secret blobs are parsed into a tagged [`Credential`] at fetch time, so a
//! blob with missing required fields fails fast instead of at connect time.

use crate::error::{DbError, DbResult};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Opaque identifier used to look up credentials and to key the pool cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Create a resource key. Blank keys are rejected.
    pub fn new(key: impl Into<String>) -> DbResult<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(DbError::invalid_input("Resource key cannot be empty"));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceKey {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ResourceKey {
    type Error = DbError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResourceKey> for String {
    fn from(key: ResourceKey) -> Self {
        key.0
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Credential for a relational target.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlCredential {
    pub host: String,
    pub username: String,
    /// Contains sensitive data - never log
    pub password: String,
    pub database: String,
    /// Falls back to the dialect's default port when absent.
    #[serde(default, deserialize_with = "deserialize_port")]
    pub port: Option<u16>,
    /// Oracle service name; the database name is used when absent.
    #[serde(default)]
    pub service_name: Option<String>,
}

impl std::fmt::Debug for SqlCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlCredential")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"****")
            .field("database", &self.database)
            .field("port", &self.port)
            .field("service_name", &self.service_name)
            .finish()
    }
}

/// Credential for a key-value (non-relational) target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueCredential {
    pub region: String,
    /// Explicit service endpoint; the regional default is used when absent.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
}

/// Parsed secret blob. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Sql(SqlCredential),
    KeyValue(KeyValueCredential),
}

impl Credential {
    /// Parse and validate a JSON secret blob.
    ///
    /// A blob carrying `host` is a SQL credential; one carrying `region` is a
    /// key-value credential. Anything else is rejected.
    pub fn from_json(resource_key: &ResourceKey, raw: &str) -> DbResult<Self> {
        let invalid = |message: String| DbError::invalid_credential(resource_key.as_str(), message);

        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| invalid(format!("Malformed JSON: {}", e)))?;

        let Some(object) = value.as_object() else {
            return Err(invalid("Expected a JSON object".to_string()));
        };

        if object.contains_key("host") {
            let credential: SqlCredential =
                serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
            for (field, content) in [
                ("host", &credential.host),
                ("username", &credential.username),
                ("database", &credential.database),
            ] {
                if content.trim().is_empty() {
                    return Err(invalid(format!("Field `{}` cannot be empty", field)));
                }
            }
            Ok(Self::Sql(credential))
        } else if object.contains_key("region") {
            let credential: KeyValueCredential =
                serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
            if credential.region.trim().is_empty() {
                return Err(invalid("Field `region` cannot be empty".to_string()));
            }
            Ok(Self::KeyValue(credential))
        } else {
            Err(invalid(
                "Expected either `host` (SQL) or `region` (key-value) fields".to_string(),
            ))
        }
    }

    pub fn as_sql(&self) -> Option<&SqlCredential> {
        match self {
            Self::Sql(credential) => Some(credential),
            Self::KeyValue(_) => None,
        }
    }

    pub fn as_key_value(&self) -> Option<&KeyValueCredential> {
        match self {
            Self::Sql(_) => None,
            Self::KeyValue(credential) => Some(credential),
        }
    }

    /// Short name of the credential shape, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sql(_) => "sql",
            Self::KeyValue(_) => "key-value",
        }
    }
}

/// Accept a port as either a JSON number or a numeric string.
fn deserialize_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u64),
        Text(String),
    }

    let port = match Option::<PortRepr>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(PortRepr::Number(n)) => u16::try_from(n)
            .map_err(|_| de::Error::custom(format!("port {} out of range", n)))?,
        Some(PortRepr::Text(s)) => s
            .trim()
            .parse::<u16>()
            .map_err(|_| de::Error::custom(format!("invalid port '{}'", s)))?,
    };

    if port == 0 {
        return Err(de::Error::custom("port must be greater than 0"));
    }
    Ok(Some(port))
}
