//! Job store connection pool.
//!
//! Postgres in production, SQLite for local runs and tests. An in-memory
//! SQLite database lives only as long as one of its connections, so its pool
//! keeps a connection open for the life of the process.

use std::time::Duration;

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use tokio::time::sleep;

use crate::config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database after {attempts} attempts: {source}")]
    ConnectionFailed {
        attempts: u32,
        #[source]
        source: sea_orm::DbErr,
    },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

const CONNECT_ATTEMPTS: u32 = 5;
const FIRST_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Storage backends the job store is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite { in_memory: bool },
}

impl Backend {
    pub fn from_url(url: &str) -> Result<Self, DatabaseError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(DatabaseError::InvalidConfiguration {
                message: "Database URL cannot be empty".to_string(),
            });
        }

        let (scheme, rest) = url.split_once(':').unwrap_or((url, ""));
        match scheme {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "sqlite" => Ok(Self::Sqlite {
                in_memory: rest.contains(":memory:") || rest.contains("mode=memory"),
            }),
            other => Err(DatabaseError::InvalidConfiguration {
                message: format!("Unsupported database scheme '{}'", other),
            }),
        }
    }
}

/// Pool settings for the configured database.
pub fn connect_options(cfg: &AppConfig) -> Result<ConnectOptions, DatabaseError> {
    let backend = Backend::from_url(&cfg.database_url)?;

    let mut opt = ConnectOptions::new(cfg.database_url.trim());
    opt.max_connections(cfg.db_max_connections.max(1))
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    match backend {
        Backend::Sqlite { in_memory: true } => {
            opt.min_connections(1);
        }
        Backend::Sqlite { in_memory: false } | Backend::Postgres => {
            opt.idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(1800));
        }
    }

    Ok(opt)
}

/// Opens the pool, retrying transient failures with doubling delays.
///
/// ```no_run
/// use smm_dispatch::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let db = init_pool(&AppConfig::default()).await?;
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    let opt = connect_options(cfg)?;
    Ok(connect_with_retry(opt, CONNECT_ATTEMPTS).await?)
}

async fn connect_with_retry(
    opt: ConnectOptions,
    attempts: u32,
) -> Result<DatabaseConnection, DatabaseError> {
    let mut delay = FIRST_RETRY_DELAY;
    let mut attempt = 1;

    loop {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                tracing::info!(attempt, "Connected to database");
                return Ok(conn);
            }
            Err(source) if attempt >= attempts => {
                tracing::error!(attempts, error = %source, "Giving up on database connection");
                return Err(DatabaseError::ConnectionFailed { attempts, source });
            }
            Err(err) => {
                tracing::warn!(attempt, error = %err, retry_in = ?delay, "Database connection failed");
                sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Runs `SELECT 1` against the pool.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());
    db.query_one(stmt)
        .await
        .context("Database health check failed")?;
    Ok(())
}
