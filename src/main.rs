//! DB Pool Registry - Main entry point.
//!
//! Runs one operation against `transaction_records` through the shared pool
//! registry and prints the outcome as JSON.

use db_pool_registry::config::{Command, Config, TargetArgs};
use db_pool_registry::credentials::{
    ChainedCredentialSource, CredentialResolver, EnvCredentialSource, StaticCredentialSource,
};
use db_pool_registry::db::{DialectRegistry, PoolRegistry, SqlxBackend};
use db_pool_registry::error::{DbError, DbResult};
use db_pool_registry::models::NewTransaction;
use db_pool_registry::records::TransactionStore;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr; stdout carries the JSON result.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn build_registry(config: &Config) -> DbResult<Arc<PoolRegistry<SqlxBackend>>> {
    let mut chain = ChainedCredentialSource::new();
    if let Some(path) = &config.credentials_file {
        chain = chain.with_source(Arc::new(StaticCredentialSource::from_file(path)?));
    }
    chain = chain.with_source(Arc::new(EnvCredentialSource::with_prefix(
        config.secret_env_prefix.clone(),
    )));

    let resolver = Arc::new(CredentialResolver::new(
        Arc::new(chain),
        config.cache_policy(),
    ));

    Ok(PoolRegistry::new(
        Arc::new(SqlxBackend::new()),
        resolver,
        DialectRegistry::standard(),
        &config.pool,
    ))
}

async fn ping(
    registry: &PoolRegistry<SqlxBackend>,
    target: &TargetArgs,
) -> DbResult<Value> {
    let lease = registry
        .acquire(target.dialect, &target.resource_key)
        .await?;
    lease.release();
    let status = registry.status(target.dialect, &target.resource_key).await;
    Ok(json!({
        "message": format!("Connected to {} '{}'.", target.dialect, target.resource_key),
        "status": status,
    }))
}

async fn run(registry: &Arc<PoolRegistry<SqlxBackend>>, command: &Command) -> DbResult<Value> {
    let target = command.target();
    let store = || {
        TransactionStore::new(
            Arc::clone(registry),
            target.dialect,
            target.resource_key.clone(),
        )
    };

    let outcome = match command {
        Command::Ping(target) => return ping(registry, target).await,
        Command::Initialize(_) => store()?.initialize().await?,
        Command::LoadSampleData {
            count, concurrency, ..
        } => store()?.load_sample_data(*count, *concurrency).await?,
        Command::SelectRandom(_) => store()?.select_random().await?,
        Command::Insert { record, .. } => {
            let record = record
                .as_deref()
                .map(serde_json::from_str::<NewTransaction>)
                .transpose()
                .map_err(|e| DbError::invalid_input(format!("Invalid --record JSON: {}", e)))?;
            store()?.insert(record).await?
        }
        Command::UpdateRandomStatus(_) => store()?.update_random_status().await?,
        Command::DeleteRandom(_) => store()?.delete_random().await?,
    };

    serde_json::to_value(outcome).map_err(|e| DbError::internal(e.to_string()))
}

fn error_body(err: &DbError) -> Value {
    json!({
        "error": err.to_string(),
        "code": err.code(),
        "suggestion": err.suggestion(),
        "retryable": err.is_retryable(),
    })
}

#[tokio::main]
async fn main() {
    let config = Config::parse_args();

    init_tracing(&config);

    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    }

    info!(
        operation = config.command.name(),
        dialect = %config.command.target().dialect,
        resource_key = %config.command.target().resource_key,
        "Starting DB Pool Registry v{}",
        env!("CARGO_PKG_VERSION")
    );

    let registry = match build_registry(&config) {
        Ok(registry) => registry,
        Err(e) => {
            error!(error = %e, "Failed to set up pool registry");
            println!("{}", error_body(&e));
            std::process::exit(1);
        }
    };

    let result = run(&registry, &config.command).await;
    registry.close_all().await;

    match result {
        Ok(body) => println!("{}", body),
        Err(e) => {
            error!(operation = config.command.name(), error = %e, "Operation failed");
            println!("{}", error_body(&e));
            std::process::exit(1);
        }
    }
}
