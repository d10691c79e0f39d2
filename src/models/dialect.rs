//! Database dialect model.
//!
//! A dialect names one database engine/wire protocol variant and fixes its
//! default port and connection-string family.

use crate::error::DbError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported database dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    MySql,
    AuroraMySql,
    PostgreSql,
    AuroraPostgreSql,
    MariaDb,
    MsSql,
    Oracle,
    Db2,
    DynamoDb,
}

/// Wire-protocol family shared by several dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectFamily {
    /// MySQL protocol: MySQL, Aurora MySQL, MariaDB
    MySql,
    /// PostgreSQL protocol: PostgreSQL, Aurora PostgreSQL
    Postgres,
    /// TDS
    MsSql,
    Oracle,
    Db2,
    /// Key-value HTTP API
    KeyValue,
}

impl Dialect {
    pub const ALL: [Dialect; 9] = [
        Dialect::MySql,
        Dialect::AuroraMySql,
        Dialect::PostgreSql,
        Dialect::AuroraPostgreSql,
        Dialect::MariaDb,
        Dialect::MsSql,
        Dialect::Oracle,
        Dialect::Db2,
        Dialect::DynamoDb,
    ];

    /// Get the display name for this dialect.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::AuroraMySql => "AuroraMySQL",
            Self::PostgreSql => "PostgreSQL",
            Self::AuroraPostgreSql => "AuroraPostgreSQL",
            Self::MariaDb => "MariaDB",
            Self::MsSql => "MSSQLServer",
            Self::Oracle => "OracleDB",
            Self::Db2 => "IBMDB2",
            Self::DynamoDb => "DynamoDB",
        }
    }

    /// Get the default port, substituted when a credential carries none.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::MySql | Self::AuroraMySql | Self::MariaDb => 3306,
            Self::PostgreSql | Self::AuroraPostgreSql => 5432,
            Self::MsSql => 1433,
            Self::Oracle => 1521,
            Self::Db2 => 50000,
            Self::DynamoDb => 443,
        }
    }

    /// Get the protocol family for this dialect.
    pub fn family(&self) -> DialectFamily {
        match self {
            Self::MySql | Self::AuroraMySql | Self::MariaDb => DialectFamily::MySql,
            Self::PostgreSql | Self::AuroraPostgreSql => DialectFamily::Postgres,
            Self::MsSql => DialectFamily::MsSql,
            Self::Oracle => DialectFamily::Oracle,
            Self::Db2 => DialectFamily::Db2,
            Self::DynamoDb => DialectFamily::KeyValue,
        }
    }

    /// True for dialects that take a host/user/password/database credential.
    pub fn is_relational(&self) -> bool {
        self.family() != DialectFamily::KeyValue
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for Dialect {
    type Err = DbError;

    /// Case-insensitive; separators (`-`, `_`, space) are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "mysql" => Ok(Self::MySql),
            "auroramysql" => Ok(Self::AuroraMySql),
            "postgresql" | "postgres" | "pg" => Ok(Self::PostgreSql),
            "aurorapostgresql" | "aurorapostgres" => Ok(Self::AuroraPostgreSql),
            "mariadb" => Ok(Self::MariaDb),
            "mssql" | "mssqlserver" | "sqlserver" => Ok(Self::MsSql),
            "oracle" | "oracledb" => Ok(Self::Oracle),
            "db2" | "ibmdb2" => Ok(Self::Db2),
            "dynamodb" | "dynamo" => Ok(Self::DynamoDb),
            _ => Err(DbError::unsupported_dialect(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_str_names_and_aliases() {
        assert_eq!("mysql".parse::<Dialect>().unwrap(), Dialect::MySql);
        assert_eq!("AuroraMySQL".parse::<Dialect>().unwrap(), Dialect::AuroraMySql);
        assert_eq!("aurora-mysql".parse::<Dialect>().unwrap(), Dialect::AuroraMySql);
        assert_eq!("postgres".parse::<Dialect>().unwrap(), Dialect::PostgreSql);
        assert_eq!(
            "Aurora_PostgreSQL".parse::<Dialect>().unwrap(),
            Dialect::AuroraPostgreSql
        );
        assert_eq!("MSSQLServer".parse::<Dialect>().unwrap(), Dialect::MsSql);
        assert_eq!("OracleDB".parse::<Dialect>().unwrap(), Dialect::Oracle);
        assert_eq!("IBMDB2".parse::<Dialect>().unwrap(), Dialect::Db2);
        assert_eq!("DynamoDB".parse::<Dialect>().unwrap(), Dialect::DynamoDb);
    }

    #[test]
    fn test_dialect_from_str_unknown() {
        let err = "sqlite".parse::<Dialect>().unwrap_err();
        assert!(matches!(err, DbError::UnsupportedDialect { ref dialect } if dialect == "sqlite"));
    }

    #[test]
    fn test_display_name_round_trips_through_from_str() {
        for dialect in Dialect::ALL {
            assert_eq!(dialect.display_name().parse::<Dialect>().unwrap(), dialect);
        }
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(Dialect::MySql.default_port(), 3306);
        assert_eq!(Dialect::MariaDb.default_port(), 3306);
        assert_eq!(Dialect::AuroraPostgreSql.default_port(), 5432);
        assert_eq!(Dialect::MsSql.default_port(), 1433);
        assert_eq!(Dialect::Oracle.default_port(), 1521);
        assert_eq!(Dialect::Db2.default_port(), 50000);
    }

    #[test]
    fn test_families() {
        assert_eq!(Dialect::AuroraMySql.family(), DialectFamily::MySql);
        assert_eq!(Dialect::MariaDb.family(), DialectFamily::MySql);
        assert_eq!(Dialect::AuroraPostgreSql.family(), DialectFamily::Postgres);
        assert!(!Dialect::DynamoDb.is_relational());
        assert!(Dialect::Db2.is_relational());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Dialect::AuroraPostgreSql).unwrap();
        assert_eq!(json, "\"aurorapostgresql\"");
        let parsed: Dialect = serde_json::from_str("\"mssql\"").unwrap();
        assert_eq!(parsed, Dialect::MsSql);
    }
}
