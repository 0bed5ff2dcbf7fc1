use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use tracing::info;

use crate::config::RelayPaths;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(paths: &RelayPaths) -> Result<Self> {
        info!("Connecting to database: {}", paths.db_path.display());

        // Pragmas go on the connect options so every pooled connection gets them
        let options = SqliteConnectOptions::from_str(&paths.db_url())
            .with_context(|| format!("Invalid database URL: {}", paths.db_url()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database: {}", paths.db_url()))?;

        info!("Running database migrations...");
        run_migrations(&pool).await?;

        info!("Database initialized");

        Ok(Self { pool })
    }

    /// Cheap liveness probe used by `/health/ready`.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }
}

/// Current schema version - increment when adding migrations
const SCHEMA_VERSION: i64 = 1;

pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL DEFAULT (unixepoch()),
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    let current_version: i64 =
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    if current_version > SCHEMA_VERSION {
        anyhow::bail!(
            "Database schema version {} is newer than supported version {}. Please upgrade the application.",
            current_version,
            SCHEMA_VERSION
        );
    }

    if current_version == SCHEMA_VERSION {
        info!(
            "Database schema is up to date (version {})",
            current_version
        );
        return Ok(());
    }

    info!(
        "Migrating database from version {} to {}",
        current_version, SCHEMA_VERSION
    );

    // Timestamps are milliseconds since the Unix epoch
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            customer_address TEXT NOT NULL UNIQUE,
            assigned_operator TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create conversations table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            id INTEGER NOT NULL,
            direction TEXT NOT NULL CHECK (direction IN ('incoming', 'outgoing')),
            sender TEXT NOT NULL,
            text TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            PRIMARY KEY (conversation_id, id)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create messages table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_operator ON conversations(assigned_operator)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT OR IGNORE INTO schema_version (version, description) VALUES (?, 'conversations and messages')",
    )
    .bind(SCHEMA_VERSION)
    .execute(pool)
    .await?;

    info!("Database migrated to version {}", SCHEMA_VERSION);
    Ok(())
}
