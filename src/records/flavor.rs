//! Dialect-specific SQL for `transaction_records`.
//!
//! Every SELECT renders its columns as text so rows decode the same way on
//! every driver; values are parsed back in [`parse_record`].

use crate::error::{DbError, DbResult};
use crate::models::transaction::{COLUMNS, parse_timestamp};
use crate::models::{Dialect, DialectFamily, TABLE_NAME, TransactionRecord};

/// SQL grammar of one relational dialect family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlFlavor {
    MySql,
    Postgres,
    MsSql,
    Oracle,
    Db2,
}

impl SqlFlavor {
    /// Flavor for a dialect. Key-value dialects have none.
    pub fn for_dialect(dialect: Dialect) -> DbResult<Self> {
        match dialect.family() {
            DialectFamily::MySql => Ok(Self::MySql),
            DialectFamily::Postgres => Ok(Self::Postgres),
            DialectFamily::MsSql => Ok(Self::MsSql),
            DialectFamily::Oracle => Ok(Self::Oracle),
            DialectFamily::Db2 => Ok(Self::Db2),
            DialectFamily::KeyValue => Err(DbError::unsupported_dialect(dialect.display_name())),
        }
    }

    /// Bind placeholder for the 1-based parameter `n`.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Self::MySql | Self::Db2 => "?".to_string(),
            Self::Postgres => format!("${}", n),
            Self::MsSql => format!("@P{}", n),
            Self::Oracle => format!(":{}", n),
        }
    }

    /// Placeholder for a timestamp bound as `YYYY-MM-DD HH:MM:SS` text.
    fn timestamp_param(&self, n: usize) -> String {
        let p = self.placeholder(n);
        match self {
            Self::MySql => p,
            Self::Postgres => format!("CAST({} AS TIMESTAMP)", p),
            Self::MsSql => format!("CAST({} AS DATETIME)", p),
            Self::Oracle => format!("TO_TIMESTAMP({}, 'YYYY-MM-DD HH24:MI:SS')", p),
            Self::Db2 => format!("TIMESTAMP({})", p),
        }
    }

    fn text(&self, column: &str) -> String {
        match self {
            Self::MySql => format!("CAST({} AS CHAR)", column),
            Self::Postgres => format!("CAST({} AS TEXT)", column),
            Self::MsSql => format!("CAST({} AS NVARCHAR(64))", column),
            Self::Oracle => format!("TO_CHAR({})", column),
            Self::Db2 => format!("VARCHAR({})", column),
        }
    }

    fn timestamp_text(&self, column: &str) -> String {
        match self {
            Self::MySql | Self::Postgres => self.text(column),
            Self::MsSql => format!("CONVERT(NVARCHAR(19), {}, 120)", column),
            Self::Oracle => format!("TO_CHAR({}, 'YYYY-MM-DD HH24:MI:SS')", column),
            Self::Db2 => format!("VARCHAR_FORMAT({}, 'YYYY-MM-DD HH24:MI:SS')", column),
        }
    }

    /// `SELECT <select_list>` of one random row.
    fn random_row(&self, select_list: &str) -> String {
        match self {
            Self::MySql => format!("SELECT {} FROM {} ORDER BY RAND() LIMIT 1", select_list, TABLE_NAME),
            Self::Postgres => format!("SELECT {} FROM {} ORDER BY RANDOM() LIMIT 1", select_list, TABLE_NAME),
            Self::MsSql => format!("SELECT TOP 1 {} FROM {} ORDER BY NEWID()", select_list, TABLE_NAME),
            Self::Oracle => format!(
                "SELECT {} FROM {} ORDER BY dbms_random.value FETCH FIRST 1 ROW ONLY",
                select_list, TABLE_NAME
            ),
            Self::Db2 => format!(
                "SELECT {} FROM {} ORDER BY RAND() FETCH FIRST 1 ROW ONLY",
                select_list, TABLE_NAME
            ),
        }
    }

    /// Idempotent table creation.
    ///
    /// Db2 has no `IF NOT EXISTS`; run [`Self::table_exists_sql`] first.
    pub fn create_table_sql(&self) -> String {
        match self {
            Self::MySql => format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 transaction_id VARCHAR(36) PRIMARY KEY, \
                 user_id VARCHAR(36), \
                 transaction_ts TIMESTAMP, \
                 product_id VARCHAR(36), \
                 quantity INTEGER, \
                 unit_price DECIMAL(10,2), \
                 total_amount DECIMAL(12,2), \
                 currency VARCHAR(3), \
                 payment_method VARCHAR(20), \
                 status VARCHAR(20))",
                TABLE_NAME
            ),
            Self::Postgres => format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 transaction_id VARCHAR(36) PRIMARY KEY, \
                 user_id VARCHAR(36), \
                 transaction_ts TIMESTAMP, \
                 product_id VARCHAR(36), \
                 quantity INTEGER, \
                 unit_price NUMERIC(10,2), \
                 total_amount NUMERIC(12,2), \
                 currency VARCHAR(3), \
                 payment_method VARCHAR(20), \
                 status VARCHAR(20))",
                TABLE_NAME
            ),
            Self::MsSql => format!(
                "IF NOT EXISTS (SELECT * FROM sysobjects WHERE name='{0}' AND xtype='U') \
                 CREATE TABLE {0} (\
                 transaction_id UNIQUEIDENTIFIER PRIMARY KEY, \
                 user_id NVARCHAR(36), \
                 transaction_ts DATETIME, \
                 product_id NVARCHAR(36), \
                 quantity INT, \
                 unit_price DECIMAL(10,2), \
                 total_amount DECIMAL(12,2), \
                 currency NVARCHAR(3), \
                 payment_method NVARCHAR(20), \
                 status NVARCHAR(20))",
                TABLE_NAME
            ),
            // ORA-00955: name is already used by an existing object
            Self::Oracle => format!(
                "BEGIN EXECUTE IMMEDIATE 'CREATE TABLE {} (\
                 transaction_id VARCHAR2(36) PRIMARY KEY, \
                 user_id VARCHAR2(36), \
                 transaction_ts TIMESTAMP, \
                 product_id VARCHAR2(36), \
                 quantity NUMBER, \
                 unit_price NUMBER(10,2), \
                 total_amount NUMBER(12,2), \
                 currency VARCHAR2(3), \
                 payment_method VARCHAR2(20), \
                 status VARCHAR2(20))'; \
                 EXCEPTION WHEN OTHERS THEN IF SQLCODE != -955 THEN RAISE; END IF; END;",
                TABLE_NAME
            ),
            Self::Db2 => format!(
                "CREATE TABLE {} (\
                 transaction_id VARCHAR(36) NOT NULL PRIMARY KEY, \
                 user_id VARCHAR(36), \
                 transaction_ts TIMESTAMP, \
                 product_id VARCHAR(36), \
                 quantity INTEGER, \
                 unit_price DECIMAL(10,2), \
                 total_amount DECIMAL(12,2), \
                 currency VARCHAR(3), \
                 payment_method VARCHAR(20), \
                 status VARCHAR(20))",
                TABLE_NAME
            ),
        }
    }

    /// Existence check for flavors whose DDL is not idempotent on its own.
    pub fn table_exists_sql(&self) -> Option<String> {
        match self {
            Self::Db2 => Some(format!(
                "SELECT 1 FROM SYSCAT.TABLES WHERE TABNAME = '{}' AND TABSCHEMA = CURRENT SCHEMA",
                TABLE_NAME.to_ascii_uppercase()
            )),
            _ => None,
        }
    }

    /// INSERT of all columns in [`COLUMNS`] order.
    pub fn insert_sql(&self) -> String {
        let values: Vec<String> = COLUMNS
            .iter()
            .enumerate()
            .map(|(i, column)| {
                if *column == "transaction_ts" {
                    self.timestamp_param(i + 1)
                } else {
                    self.placeholder(i + 1)
                }
            })
            .collect();

        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            TABLE_NAME,
            COLUMNS.join(", "),
            values.join(", ")
        )
    }

    /// One random row, all columns rendered as text in [`COLUMNS`] order.
    pub fn select_random_sql(&self) -> String {
        let select_list: Vec<String> = COLUMNS
            .iter()
            .map(|column| {
                let expr = if *column == "transaction_ts" {
                    self.timestamp_text(column)
                } else {
                    self.text(column)
                };
                format!("{} AS {}", expr, column)
            })
            .collect();
        self.random_row(&select_list.join(", "))
    }

    /// Id of one random row.
    pub fn random_id_sql(&self) -> String {
        self.random_row(&format!("{} AS transaction_id", self.text("transaction_id")))
    }

    /// Parameters: status, transaction_id.
    pub fn update_status_sql(&self) -> String {
        format!(
            "UPDATE {} SET status = {} WHERE transaction_id = {}",
            TABLE_NAME,
            self.placeholder(1),
            self.placeholder(2)
        )
    }

    /// Parameter: transaction_id.
    pub fn delete_sql(&self) -> String {
        format!(
            "DELETE FROM {} WHERE transaction_id = {}",
            TABLE_NAME,
            self.placeholder(1)
        )
    }
}

/// Build a record from text values in [`COLUMNS`] order.
pub fn parse_record(values: &[Option<String>]) -> DbResult<TransactionRecord> {
    if values.len() != COLUMNS.len() {
        return Err(DbError::internal(format!(
            "Expected {} columns, got {}",
            COLUMNS.len(),
            values.len()
        )));
    }

    let text = |i: usize| -> DbResult<String> {
        values[i]
            .as_deref()
            .map(|v| v.trim().to_string())
            .ok_or_else(|| DbError::internal(format!("Column {} is NULL", COLUMNS[i])))
    };
    let invalid = |i: usize, value: &str| {
        DbError::internal(format!("Column {} has invalid value '{}'", COLUMNS[i], value))
    };

    let ts = text(2)?;
    let quantity = text(4)?;
    let unit_price = text(5)?;
    let total_amount = text(6)?;

    Ok(TransactionRecord {
        transaction_id: text(0)?,
        user_id: text(1)?,
        transaction_ts: parse_timestamp(&ts).ok_or_else(|| invalid(2, &ts))?,
        product_id: text(3)?,
        quantity: quantity.parse().map_err(|_| invalid(4, &quantity))?,
        unit_price: unit_price.parse().map_err(|_| invalid(5, &unit_price))?,
        total_amount: total_amount.parse().map_err(|_| invalid(6, &total_amount))?,
        currency: text(7)?,
        payment_method: text(8)?,
        status: text(9)?,
    })
}
