//! External registries the crawl reads from: categories and proxies.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::warn;

use crate::domain::{Category, ProxyEndpoint};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry query failed: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait CategorySource: Send + Sync {
    /// Every known category, leaf or not, ordered by id.
    async fn categories(&self) -> Result<Vec<Category>, RegistryError>;
}

#[async_trait]
pub trait ProxySource: Send + Sync {
    /// Live proxies, least used first.
    async fn live_proxies(&self) -> Result<Vec<ProxyEndpoint>, RegistryError>;
}

/// Both registries backed by tables in the catalog database.
#[derive(Clone)]
pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add_category(&self, category: &Category) -> Result<(), RegistryError> {
        sqlx::query(
            "INSERT INTO categories (id, slug, is_leaf) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET slug = excluded.slug, is_leaf = excluded.is_leaf",
        )
        .bind(category.id)
        .bind(&category.slug)
        .bind(category.is_leaf)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_proxy(&self, proxy: &ProxyEndpoint, alive: bool) -> Result<(), RegistryError> {
        sqlx::query(
            "INSERT INTO proxies (address, port, username, password, alive) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&proxy.address)
        .bind(i64::from(proxy.port))
        .bind(&proxy.username)
        .bind(&proxy.password)
        .bind(alive)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CategorySource for SqliteRegistry {
    async fn categories(&self) -> Result<Vec<Category>, RegistryError> {
        let rows = sqlx::query("SELECT id, slug, is_leaf FROM categories ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<Category, RegistryError> {
                Ok(Category {
                    id: row.try_get("id")?,
                    slug: row.try_get("slug")?,
                    is_leaf: row.try_get("is_leaf")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ProxySource for SqliteRegistry {
    async fn live_proxies(&self) -> Result<Vec<ProxyEndpoint>, RegistryError> {
        let rows = sqlx::query(
            "SELECT address, port, username, password FROM proxies WHERE alive ORDER BY cnt, id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut proxies = Vec::with_capacity(rows.len());
        for row in rows {
            let address: String = row.try_get("address")?;
            let port: i64 = row.try_get("port")?;
            let Ok(port) = u16::try_from(port) else {
                warn!("Skipping proxy {} with invalid port {}", address, port);
                continue;
            };
            proxies.push(ProxyEndpoint {
                address,
                port,
                username: row.try_get("username")?,
                password: row.try_get("password")?,
            });
        }
        Ok(proxies)
    }
}

/// Fixed category list, for selected runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCategorySource {
    categories: Vec<Category>,
}

impl StaticCategorySource {
    pub fn new(categories: Vec<Category>) -> Self {
        Self { categories }
    }
}

#[async_trait]
impl CategorySource for StaticCategorySource {
    async fn categories(&self) -> Result<Vec<Category>, RegistryError> {
        Ok(self.categories.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::DatabaseConnection;

    async fn registry() -> SqliteRegistry {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        SqliteRegistry::new(db.pool().clone())
    }

    #[tokio::test]
    async fn reads_categories_in_id_order() {
        let registry = registry().await;
        registry.add_category(&Category::leaf(9, "truby")).await.unwrap();
        registry
            .add_category(&Category {
                is_leaf: false,
                ..Category::leaf(1, "metalloprokat")
            })
            .await
            .unwrap();

        let categories = registry.categories().await.unwrap();
        assert_eq!(categories.len(), 2);
        assert_eq!(categories[0].slug, "metalloprokat");
        assert!(!categories[0].is_leaf);
        assert_eq!(categories[1], Category::leaf(9, "truby"));
    }

    #[tokio::test]
    async fn only_live_proxies_least_used_first() {
        let registry = registry().await;
        registry
            .add_proxy(&ProxyEndpoint::new("10.0.0.1", 3128), true)
            .await
            .unwrap();
        registry
            .add_proxy(&ProxyEndpoint::new("10.0.0.2", 3128).with_credentials("u", "p"), true)
            .await
            .unwrap();
        registry
            .add_proxy(&ProxyEndpoint::new("10.0.0.3", 3128), false)
            .await
            .unwrap();
        sqlx::query("UPDATE proxies SET cnt = 5 WHERE address = '10.0.0.1'")
            .execute(&registry.pool)
            .await
            .unwrap();

        let proxies = registry.live_proxies().await.unwrap();
        let addresses: Vec<_> = proxies.iter().map(|p| p.address.as_str()).collect();
        assert_eq!(addresses, ["10.0.0.2", "10.0.0.1"]);
        assert_eq!(proxies[0].username.as_deref(), Some("u"));
    }

    #[tokio::test]
    async fn out_of_range_port_is_skipped() {
        let registry = registry().await;
        sqlx::query("INSERT INTO proxies (address, port) VALUES ('10.0.0.9', 70000)")
            .execute(&registry.pool)
            .await
            .unwrap();
        assert!(registry.live_proxies().await.unwrap().is_empty());
    }
}
