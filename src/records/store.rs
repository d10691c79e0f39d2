//! CRUD operations on `transaction_records` through pooled connections.

use super::flavor::{SqlFlavor, parse_record};
use crate::db::pool::{DbConnection, SqlxBackend};
use crate::db::registry::PoolRegistry;
use crate::error::{DbError, DbResult};
use crate::models::transaction::{COLUMNS, STATUSES};
use crate::models::{Dialect, NewTransaction, ResourceKey, TABLE_NAME, TransactionRecord};
use futures_util::{StreamExt, TryStreamExt, stream};
use rand::seq::SliceRandom;
use serde::Serialize;
use sqlx::Row;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Run `$body` with `$conn` bound to the driver connection behind a lease.
///
/// The body is expanded once per driver, so the same query code is checked
/// against each database type.
macro_rules! on_connection {
    ($lease:expr, |$conn:ident| $body:expr) => {
        match $lease {
            DbConnection::MySql(lease) => {
                let $conn = &mut **lease;
                $body
            }
            DbConnection::Postgres(lease) => {
                let $conn = &mut **lease;
                $body
            }
        }
    };
}

/// Result of one store operation, serialized as the command output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationOutcome {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<TransactionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
}

impl OperationOutcome {
    fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            record: None,
            rows_affected: None,
        }
    }

    fn with_record(mut self, record: TransactionRecord) -> Self {
        self.record = Some(record);
        self
    }

    fn with_rows_affected(mut self, rows: u64) -> Self {
        self.rows_affected = Some(rows);
        self
    }
}

/// `transaction_records` bound to one (dialect, resource key) pool.
pub struct TransactionStore {
    registry: Arc<PoolRegistry<SqlxBackend>>,
    dialect: Dialect,
    resource_key: ResourceKey,
    flavor: SqlFlavor,
}

impl TransactionStore {
    /// Fails with `UnsupportedDialect` for dialects without SQL.
    pub fn new(
        registry: Arc<PoolRegistry<SqlxBackend>>,
        dialect: Dialect,
        resource_key: ResourceKey,
    ) -> DbResult<Self> {
        let flavor = SqlFlavor::for_dialect(dialect)?;
        Ok(Self {
            registry,
            dialect,
            resource_key,
            flavor,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn resource_key(&self) -> &ResourceKey {
        &self.resource_key
    }

    pub fn flavor(&self) -> SqlFlavor {
        self.flavor
    }

    /// Create the table if it does not exist.
    pub async fn initialize(&self) -> DbResult<OperationOutcome> {
        let mut lease = self.lease().await?;
        let result = self.create_table(&mut lease).await;
        self.finish(lease, &result).await;
        result?;

        info!(
            dialect = %self.dialect,
            resource_key = %self.resource_key,
            table = TABLE_NAME,
            "Table initialized"
        );
        Ok(OperationOutcome::message(format!(
            "Table '{}' initialized successfully.",
            TABLE_NAME
        )))
    }

    /// Insert `count` random records over at most `concurrency` leases.
    pub async fn load_sample_data(
        &self,
        count: usize,
        concurrency: usize,
    ) -> DbResult<OperationOutcome> {
        if concurrency == 0 {
            return Err(DbError::invalid_input("concurrency must be greater than 0"));
        }

        stream::iter(0..count)
            .map(Ok::<_, DbError>)
            .try_for_each_concurrent(concurrency, |_| async move {
                self.insert_record(NewTransaction::sample().into_record(new_id()))
                    .await
                    .map(|_| ())
            })
            .await?;

        info!(
            dialect = %self.dialect,
            resource_key = %self.resource_key,
            count,
            "Sample data loaded"
        );
        Ok(
            OperationOutcome::message(format!("{} sample records inserted successfully.", count))
                .with_rows_affected(count as u64),
        )
    }

    /// Fetch one random record.
    pub async fn select_random(&self) -> DbResult<OperationOutcome> {
        let mut lease = self.lease().await?;
        let result = self.fetch_random(&mut lease).await;
        self.finish(lease, &result).await;

        Ok(match result? {
            Some(record) => OperationOutcome::message("Random record retrieved.").with_record(record),
            None => OperationOutcome::message("No records found in the table."),
        })
    }

    /// Insert `record`, or a random one when `None`, under a fresh UUID v4.
    pub async fn insert(&self, record: Option<NewTransaction>) -> DbResult<OperationOutcome> {
        let new = record.unwrap_or_else(NewTransaction::sample);
        new.validate().map_err(DbError::invalid_input)?;

        let record = self.insert_record(new.into_record(new_id())).await?;
        Ok(OperationOutcome::message("Record inserted successfully.")
            .with_record(record)
            .with_rows_affected(1))
    }

    /// Set a random status on one random record.
    pub async fn update_random_status(&self) -> DbResult<OperationOutcome> {
        let status = STATUSES
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(STATUSES[0]);

        let mut lease = self.lease().await?;
        let result = self.update_status(&mut lease, status).await;
        self.finish(lease, &result).await;

        Ok(match result? {
            Some((id, rows)) => OperationOutcome::message(format!(
                "Updated status to '{}' for transaction_id {}.",
                status, id
            ))
            .with_rows_affected(rows),
            None => OperationOutcome::message("No records found to update."),
        })
    }

    /// Delete one random record.
    pub async fn delete_random(&self) -> DbResult<OperationOutcome> {
        let mut lease = self.lease().await?;
        let result = self.delete_one(&mut lease).await;
        self.finish(lease, &result).await;

        Ok(match result? {
            Some((id, rows)) => {
                OperationOutcome::message(format!("Deleted transaction with ID {}.", id))
                    .with_rows_affected(rows)
            }
            None => OperationOutcome::message("No records found to delete."),
        })
    }

    async fn lease(&self) -> DbResult<DbConnection> {
        self.registry.acquire(self.dialect, &self.resource_key).await
    }

    async fn insert_record(&self, record: TransactionRecord) -> DbResult<TransactionRecord> {
        let mut lease = self.lease().await?;
        let result = self.execute_insert(&mut lease, &record).await;
        self.finish(lease, &result).await;
        result?;

        debug!(transaction_id = %record.transaction_id, "Record inserted");
        Ok(record)
    }

    async fn create_table(&self, lease: &mut DbConnection) -> DbResult<()> {
        let exists_sql = self.flavor.table_exists_sql();
        let create_sql = self.flavor.create_table_sql();
        on_connection!(lease, |conn| {
            if let Some(sql) = &exists_sql {
                if sqlx::query(sql).fetch_optional(&mut *conn).await?.is_some() {
                    debug!(table = TABLE_NAME, "Table already exists");
                    return Ok(());
                }
            }
            sqlx::query(&create_sql).execute(&mut *conn).await?;
        });
        Ok(())
    }

    async fn execute_insert(
        &self,
        lease: &mut DbConnection,
        record: &TransactionRecord,
    ) -> DbResult<()> {
        let sql = self.flavor.insert_sql();
        on_connection!(lease, |conn| {
            sqlx::query(&sql)
                .bind(record.transaction_id.clone())
                .bind(record.user_id.clone())
                .bind(record.timestamp_text())
                .bind(record.product_id.clone())
                .bind(record.quantity)
                .bind(record.unit_price)
                .bind(record.total_amount)
                .bind(record.currency.clone())
                .bind(record.payment_method.clone())
                .bind(record.status.clone())
                .execute(&mut *conn)
                .await?;
        });
        Ok(())
    }

    async fn fetch_random(&self, lease: &mut DbConnection) -> DbResult<Option<TransactionRecord>> {
        let sql = self.flavor.select_random_sql();
        let values = on_connection!(lease, |conn| {
            match sqlx::query(&sql).fetch_optional(&mut *conn).await? {
                Some(row) => Some(
                    (0..COLUMNS.len())
                        .map(|i| row.try_get::<Option<String>, _>(i))
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                None => None,
            }
        });

        values.map(|values| parse_record(&values)).transpose()
    }

    async fn random_id(&self, lease: &mut DbConnection) -> DbResult<Option<String>> {
        let sql = self.flavor.random_id_sql();
        let id = on_connection!(lease, |conn| {
            match sqlx::query(&sql).fetch_optional(&mut *conn).await? {
                Some(row) => Some(row.try_get::<String, _>(0)?),
                None => None,
            }
        });
        Ok(id.map(|id| id.trim().to_string()))
    }

    async fn update_status(
        &self,
        lease: &mut DbConnection,
        status: &str,
    ) -> DbResult<Option<(String, u64)>> {
        let Some(id) = self.random_id(lease).await? else {
            return Ok(None);
        };

        let sql = self.flavor.update_status_sql();
        let rows = on_connection!(lease, |conn| {
            sqlx::query(&sql)
                .bind(status.to_string())
                .bind(id.clone())
                .execute(&mut *conn)
                .await?
                .rows_affected()
        });
        Ok(Some((id, rows)))
    }

    async fn delete_one(&self, lease: &mut DbConnection) -> DbResult<Option<(String, u64)>> {
        let Some(id) = self.random_id(lease).await? else {
            return Ok(None);
        };

        let sql = self.flavor.delete_sql();
        let rows = on_connection!(lease, |conn| {
            sqlx::query(&sql)
                .bind(id.clone())
                .execute(&mut *conn)
                .await?
                .rows_affected()
        });
        Ok(Some((id, rows)))
    }

    /// Return the lease, discarding it when the connection itself failed.
    async fn finish<T>(&self, lease: DbConnection, result: &DbResult<T>) {
        match result {
            Err(e @ DbError::Connection { .. }) => {
                warn!(
                    dialect = %self.dialect,
                    resource_key = %self.resource_key,
                    error = %e,
                    "Discarding connection after driver failure"
                );
                lease.discard().await;
            }
            _ => lease.release(),
        }
    }
}

impl std::fmt::Debug for TransactionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionStore")
            .field("dialect", &self.dialect)
            .field("resource_key", &self.resource_key)
            .field("flavor", &self.flavor)
            .finish()
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
