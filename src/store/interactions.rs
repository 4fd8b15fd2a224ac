use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::InteractionStore;
use crate::models::{NewInteraction, TrainingRow};

/// Weight expression shared by the rollup queries; mirrors
/// `InteractionType::weight`.
const WEIGHT_CASE: &str = r#"
    CASE type
        WHEN 'VIEW' THEN 0.5
        WHEN 'CLICK' THEN 1.0
        WHEN 'CART' THEN 3.0
        WHEN 'PURCHASE' THEN 8.0
        ELSE 0.0
    END * value
"#;

/// Repository for the append-only interaction log.
#[derive(Clone)]
pub struct InteractionRepository {
    pool: PgPool,
}

impl InteractionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InteractionStore for InteractionRepository {
    async fn append(&self, row: NewInteraction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO interactions (id, user_id, product_id, type, value, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&row.user_id)
        .bind(&row.product_id)
        .bind(row.kind.as_str())
        .bind(row.value)
        .execute(&self.pool)
        .await
        .context("Failed to append interaction")?;

        Ok(())
    }

    async fn popularity_rollup(
        &self,
        window_days: i64,
        limit: i64,
    ) -> Result<Vec<(String, f64)>> {
        let sql = format!(
            r#"
            SELECT product_id, SUM({WEIGHT_CASE})::float8 AS score
            FROM interactions
            WHERE created_at >= NOW() - ($1 * INTERVAL '1 day')
            GROUP BY product_id
            ORDER BY score DESC, product_id
            LIMIT $2
            "#
        );

        let rows: Vec<(String, f64)> = sqlx::query_as(&sql)
            .bind(window_days)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Popularity rollup failed")?;

        Ok(rows)
    }

    async fn merchant_rollup(&self, window_days: i64, limit: i64) -> Result<Vec<(String, f64)>> {
        let sql = format!(
            r#"
            SELECT p.merchant_id, SUM({WEIGHT_CASE})::float8 AS score
            FROM interactions i
            JOIN products p ON p.id = i.product_id
            WHERE i.created_at >= NOW() - ($1 * INTERVAL '1 day')
            GROUP BY p.merchant_id
            ORDER BY score DESC, p.merchant_id
            LIMIT $2
            "#
        );

        let rows: Vec<(String, f64)> = sqlx::query_as(&sql)
            .bind(window_days)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Merchant rollup failed")?;

        Ok(rows)
    }

    async fn training_rows(&self, window_days: i64, limit: i64) -> Result<Vec<TrainingRow>> {
        let sql = format!(
            r#"
            SELECT COALESCE(user_id, 'anon') AS user_key,
                   product_id,
                   SUM({WEIGHT_CASE})::float8 AS weight
            FROM interactions
            WHERE created_at >= NOW() - ($1 * INTERVAL '1 day')
            GROUP BY user_key, product_id
            ORDER BY user_key, product_id
            LIMIT $2
            "#
        );

        let rows = sqlx::query_as::<_, TrainingRow>(&sql)
            .bind(window_days)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to load CF training rows")?;

        Ok(rows)
    }
}
