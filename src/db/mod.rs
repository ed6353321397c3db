//! SQLite-backed relational store for the knowledge graph engine.

pub mod schema;

use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::path::Path;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Connection pool plus the pragmas and migration state required by the
/// engine. One `Database` owns one relational store file, matching the
/// single-process exclusive-handle model in spec.md §5.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if absent) the store at `db_path` and runs
    /// migrations. Fails with `EngineError::Internal` if the on-disk schema
    /// version does not match what this build expects.
    pub async fn open(db_path: &Path, config: &EngineConfig) -> EngineResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .idle_timeout(std::time::Duration::from_secs(600))
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL;").execute(&pool).await?;
        sqlx::query(&format!("PRAGMA busy_timeout = {};", config.busy_timeout_ms))
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL;").execute(&pool).await?;
        sqlx::query("PRAGMA foreign_keys = ON;").execute(&pool).await?;
        sqlx::query("PRAGMA cache_size = -64000;").execute(&pool).await?;

        let db = Self { pool };
        db.run_migrations().await?;
        db.check_schema_version().await?;

        Ok(db)
    }

    /// Opens an in-memory database, for tests.
    pub async fn open_in_memory(config: &EngineConfig) -> EngineResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON;").execute(&pool).await?;
        sqlx::query(&format!("PRAGMA busy_timeout = {};", config.busy_timeout_ms))
            .execute(&pool)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        db.check_schema_version().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> EngineResult<()> {
        sqlx::query(schema::CREATE_TABLES).execute(&self.pool).await?;
        log::info!("database migrations completed");
        Ok(())
    }

    async fn check_schema_version(&self) -> EngineResult<()> {
        let row = sqlx::query("SELECT version FROM schema_version WHERE id = 1")
            .fetch_one(&self.pool)
            .await?;
        let version: i64 = row.try_get("version")?;
        if version != CURRENT_SCHEMA_VERSION {
            return Err(EngineError::Internal(format!(
                "on-disk schema version {version} does not match expected {CURRENT_SCHEMA_VERSION}"
            )));
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_in_memory_and_creates_tables() {
        let db = Database::open_in_memory(&EngineConfig::default()).await.unwrap();
        let row = sqlx::query("SELECT COUNT(*) as c FROM knowledge_nodes")
            .fetch_one(db.pool())
            .await
            .unwrap();
        let count: i64 = row.try_get("c").unwrap();
        assert_eq!(count, 0);
    }
}
