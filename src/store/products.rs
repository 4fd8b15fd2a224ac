use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use super::ProductStore;
use crate::models::{Product, ProductMeta, TextMatch};

/// Repository for catalog products and merchants.
#[derive(Clone)]
pub struct ProductRepository {
    pool: PgPool,
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductStore for ProductRepository {
    async fn products_by_ids(&self, ids: &[String]) -> Result<Vec<Product>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, title, description, merchant_id, category_id, popularity
            FROM products
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch products by ids")?;

        Ok(products)
    }

    async fn metas_by_ids(&self, ids: &[String]) -> Result<Vec<(String, ProductMeta)>> {
        let products = self.products_by_ids(ids).await?;
        Ok(products
            .iter()
            .map(|p| (p.id.clone(), ProductMeta::from(p)))
            .collect())
    }

    async fn search_text(&self, query: &str, limit: i64) -> Result<Vec<TextMatch>> {
        // Trigram similarity over title and description, query bound as a
        // parameter. Requires pg_trgm indexes on both columns.
        let matches = sqlx::query_as::<_, TextMatch>(
            r#"
            SELECT id AS product_id,
                   LEAST(1.0, GREATEST(similarity(title, $1), similarity(description, $1)))::float8 AS score
            FROM products
            WHERE title % $1 OR description % $1
            ORDER BY score DESC, id
            LIMIT $2
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Fuzzy product search failed")?;

        Ok(matches)
    }

    async fn top_by_category(&self, category_id: &str, limit: i64) -> Result<Vec<(String, f64)>> {
        let rows: Vec<(String, f64)> = sqlx::query_as(
            r#"
            SELECT id, popularity
            FROM products
            WHERE category_id = $1
            ORDER BY popularity DESC, id
            LIMIT $2
            "#,
        )
        .bind(category_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch category products")?;

        Ok(rows)
    }

    async fn top_by_popularity(&self, limit: i64) -> Result<Vec<(String, f64)>> {
        let rows: Vec<(String, f64)> = sqlx::query_as(
            r#"
            SELECT id, popularity
            FROM products
            ORDER BY popularity DESC, id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch top products")?;

        Ok(rows)
    }

    async fn update_popularity(&self, rows: &[(String, f64)]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let (ids, scores): (Vec<String>, Vec<f64>) = rows.iter().cloned().unzip();

        sqlx::query(
            r#"
            UPDATE products AS p
            SET popularity = u.popularity
            FROM UNNEST($1::text[], $2::float8[]) AS u(id, popularity)
            WHERE p.id = u.id
            "#,
        )
        .bind(&ids)
        .bind(&scores)
        .execute(&self.pool)
        .await
        .context("Failed to write product popularity")?;

        Ok(())
    }

    async fn update_merchant_popularity(&self, rows: &[(String, f64)]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let (ids, scores): (Vec<String>, Vec<f64>) = rows.iter().cloned().unzip();

        sqlx::query(
            r#"
            UPDATE merchants AS m
            SET popularity = u.popularity
            FROM UNNEST($1::text[], $2::float8[]) AS u(id, popularity)
            WHERE m.id = u.id
            "#,
        )
        .bind(&ids)
        .bind(&scores)
        .execute(&self.pool)
        .await
        .context("Failed to write merchant popularity")?;

        Ok(())
    }
}
