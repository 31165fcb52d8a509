// Database connection and pool management
// This module handles SQLite database connections using sqlx

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_max_connections(database_url, 10).await
    }

    pub async fn with_max_connections(database_url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {database_url}"))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(30));

        let mut pool_options = SqlitePoolOptions::new();
        if in_memory {
            // Every connection to :memory: is its own database; keep exactly one alive.
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            if let Some(parent) = Path::new(options.get_filename()).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
            }
            options = options.journal_mode(SqliteJournalMode::Wal);
            pool_options = pool_options.max_connections(max_connections.max(1));
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {database_url}"))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Round-trips a trivial query; used to fail fast before a run starts.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database is not reachable")?;
        Ok(())
    }

    pub async fn migrate(&self) -> Result<()> {
        let create_products_sql = r#"
            CREATE TABLE IF NOT EXISTS products (
                sku TEXT PRIMARY KEY,
                external_id TEXT NOT NULL,
                name TEXT NOT NULL,
                short_name TEXT NOT NULL,
                price TEXT,
                image_url TEXT,
                attributes TEXT NOT NULL DEFAULT '[]',
                slug TEXT,
                category_id INTEGER NOT NULL,
                category_slug TEXT NOT NULL,
                first_seen_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
        "#;

        let create_categories_sql = r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                slug TEXT NOT NULL,
                is_leaf BOOLEAN NOT NULL DEFAULT 1
            )
        "#;

        let create_proxies_sql = r#"
            CREATE TABLE IF NOT EXISTS proxies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL,
                port INTEGER NOT NULL,
                username TEXT,
                password TEXT,
                alive BOOLEAN NOT NULL DEFAULT 1,
                cnt INTEGER NOT NULL DEFAULT 0
            )
        "#;

        let create_indexes_sql = r#"
            CREATE INDEX IF NOT EXISTS idx_products_category_id ON products (category_id);
            CREATE INDEX IF NOT EXISTS idx_products_external_id ON products (external_id);
            CREATE INDEX IF NOT EXISTS idx_proxies_alive ON proxies (alive, cnt);
        "#;

        sqlx::query(create_products_sql).execute(&self.pool).await?;
        sqlx::query(create_categories_sql).execute(&self.pool).await?;
        sqlx::query(create_proxies_sql).execute(&self.pool).await?;
        sqlx::raw_sql(create_indexes_sql).execute(&self.pool).await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
