//! Batched idempotent product persistence
//!
//! A batch is one transaction of `INSERT ... ON CONFLICT(sku) DO UPDATE`
//! statements: readers see either none or all of it, and replaying the same
//! batch leaves the table as it was after the first delivery.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::domain::{Attribute, Price, ProductRecord};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Stored row for {sku} is malformed: {message}")]
    Malformed { sku: String, message: String },
}

/// Destination for extracted product records.
#[async_trait]
pub trait ProductSink: Send + Sync {
    /// Writes the batch and returns the number of distinct rows written.
    async fn upsert(&self, records: &[ProductRecord]) -> Result<usize, SinkError>;
}

const UPSERT_SQL: &str = r#"
    INSERT INTO products (
        sku, external_id, name, short_name, price, image_url,
        attributes, slug, category_id, category_slug, updated_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
    ON CONFLICT(sku) DO UPDATE SET
        external_id = excluded.external_id,
        name = excluded.name,
        short_name = excluded.short_name,
        price = excluded.price,
        image_url = excluded.image_url,
        attributes = excluded.attributes,
        slug = excluded.slug,
        category_id = excluded.category_id,
        category_slug = excluded.category_slug,
        updated_at = excluded.updated_at
"#;

#[derive(Clone)]
pub struct SqliteProductSink {
    pool: SqlitePool,
}

impl SqliteProductSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> Result<i64, SinkError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn find_by_sku(&self, sku: &str) -> Result<Option<ProductRecord>, SinkError> {
        let row = sqlx::query(
            r#"
            SELECT sku, external_id, name, short_name, price, image_url,
                   attributes, slug, category_id, category_slug
            FROM products WHERE sku = ?
            "#,
        )
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let sku: String = row.try_get("sku")?;
        let malformed = |message: String| SinkError::Malformed {
            sku: sku.clone(),
            message,
        };

        let price = row
            .try_get::<Option<String>, _>("price")?
            .map(|text| text.parse::<Price>())
            .transpose()
            .map_err(|err| malformed(err.to_string()))?;
        let attributes: Vec<Attribute> =
            serde_json::from_str(&row.try_get::<String, _>("attributes")?)
                .map_err(|err| malformed(err.to_string()))?;

        Ok(Some(ProductRecord {
            external_id: row.try_get("external_id")?,
            display_name: row.try_get("name")?,
            short_name: row.try_get("short_name")?,
            price,
            image_url: row.try_get("image_url")?,
            attributes,
            slug: row.try_get("slug")?,
            category_id: row.try_get("category_id")?,
            category_slug: row.try_get("category_slug")?,
            sku,
        }))
    }
}

#[async_trait]
impl ProductSink for SqliteProductSink {
    async fn upsert(&self, records: &[ProductRecord]) -> Result<usize, SinkError> {
        if records.is_empty() {
            return Ok(0);
        }

        let batch = dedupe_by_sku(records);
        let mut tx = self.pool.begin().await?;
        for record in &batch {
            sqlx::query(UPSERT_SQL)
                .bind(&record.sku)
                .bind(&record.external_id)
                .bind(&record.display_name)
                .bind(&record.short_name)
                .bind(record.price.map(|price| price.to_string()))
                .bind(&record.image_url)
                .bind(record.attributes_json())
                .bind(&record.slug)
                .bind(record.category_id)
                .bind(&record.category_slug)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        debug!("Upserted {} products ({} in batch)", batch.len(), records.len());
        Ok(batch.len())
    }
}

/// Keeps the last record per sku, in order of first appearance.
fn dedupe_by_sku(records: &[ProductRecord]) -> Vec<&ProductRecord> {
    let mut slot: HashMap<&str, usize> = HashMap::with_capacity(records.len());
    let mut batch: Vec<&ProductRecord> = Vec::with_capacity(records.len());
    for record in records {
        match slot.get(record.sku.as_str()) {
            Some(&index) => batch[index] = record,
            None => {
                slot.insert(record.sku.as_str(), batch.len());
                batch.push(record);
            }
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::DatabaseConnection;

    async fn sink() -> SqliteProductSink {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        SqliteProductSink::new(db.pool().clone())
    }

    fn record(sku: &str, cents: i64) -> ProductRecord {
        ProductRecord {
            sku: sku.to_string(),
            external_id: format!("id-{sku}"),
            display_name: sku.to_string(),
            short_name: sku.to_string(),
            price: Some(Price::from_cents(cents)),
            image_url: Some("https://shop.example/a.webp".to_string()),
            attributes: vec![Attribute::new("Длина", "6 м"), Attribute::new("", "ГОСТ")],
            slug: Some(format!("{sku}-slug")),
            category_id: 42,
            category_slug: "truby".to_string(),
        }
    }

    #[tokio::test]
    async fn repeated_delivery_does_not_duplicate() {
        let sink = sink().await;
        let batch = vec![record("Труба 20x2", 10_000), record("Труба 25x2", 12_000)];

        assert_eq!(sink.upsert(&batch).await.unwrap(), 2);
        assert_eq!(sink.upsert(&batch).await.unwrap(), 2);
        assert_eq!(sink.count().await.unwrap(), 2);
        assert_eq!(
            sink.find_by_sku("Труба 20x2").await.unwrap(),
            Some(batch[0].clone())
        );
    }

    #[tokio::test]
    async fn last_applied_values_win() {
        let sink = sink().await;
        sink.upsert(&[record("Уголок 50x50", 5_000)]).await.unwrap();

        let mut updated = record("Уголок 50x50", 5_500);
        updated.category_id = 7;
        updated.attributes.clear();
        updated.image_url = None;
        sink.upsert(&[updated.clone()]).await.unwrap();

        assert_eq!(sink.count().await.unwrap(), 1);
        assert_eq!(sink.find_by_sku("Уголок 50x50").await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn update_keeps_first_seen_timestamp() {
        let sink = sink().await;
        sink.upsert(&[record("Лист 2мм", 100)]).await.unwrap();
        sqlx::query("UPDATE products SET first_seen_at = '2020-01-01 00:00:00'")
            .execute(&sink.pool)
            .await
            .unwrap();

        sink.upsert(&[record("Лист 2мм", 200)]).await.unwrap();
        let first_seen: String = sqlx::query_scalar("SELECT first_seen_at FROM products")
            .fetch_one(&sink.pool)
            .await
            .unwrap();
        assert_eq!(first_seen, "2020-01-01 00:00:00");
    }

    #[tokio::test]
    async fn duplicate_skus_in_one_batch_collapse_to_the_last() {
        let sink = sink().await;
        let written = sink
            .upsert(&[record("Швеллер 10", 1), record("Балка 20", 2), record("Швеллер 10", 3)])
            .await
            .unwrap();

        assert_eq!(written, 2);
        let stored = sink.find_by_sku("Швеллер 10").await.unwrap().unwrap();
        assert_eq!(stored.price, Some(Price::from_cents(3)));
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let sink = sink().await;
        assert_eq!(sink.upsert(&[]).await.unwrap(), 0);
        assert_eq!(sink.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_table_is_an_error() {
        let db = DatabaseConnection::new("sqlite::memory:").await.unwrap();
        let sink = SqliteProductSink::new(db.pool().clone());
        assert!(matches!(
            sink.upsert(&[record("Круг 10", 1)]).await,
            Err(SinkError::Database(_))
        ));
    }
}
