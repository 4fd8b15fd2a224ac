use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use super::FeatureBlobStore;

/// Repository for latent-factor feature blobs.
///
/// Vectors are stored as JSON arrays of reals keyed by (namespace, key);
/// the per-user top-K projection lives in the cache, these blobs are the
/// durable copy.
#[derive(Clone)]
pub struct FeatureRepository {
    pool: PgPool,
}

impl FeatureRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeatureBlobStore for FeatureRepository {
    async fn put_vectors(&self, namespace: &str, vectors: &[(String, Vec<f32>)]) -> Result<()> {
        if vectors.is_empty() {
            return Ok(());
        }

        let mut keys = Vec::with_capacity(vectors.len());
        let mut blobs = Vec::with_capacity(vectors.len());
        for (key, vector) in vectors {
            keys.push(key.clone());
            blobs.push(serde_json::to_value(vector).context("Failed to encode factor vector")?);
        }

        sqlx::query(
            r#"
            INSERT INTO feature_store (key, namespace, value)
            SELECT u.key, $1, u.value
            FROM UNNEST($2::text[], $3::jsonb[]) AS u(key, value)
            ON CONFLICT (key, namespace) DO UPDATE
            SET value = EXCLUDED.value
            "#,
        )
        .bind(namespace)
        .bind(&keys)
        .bind(&blobs)
        .execute(&self.pool)
        .await
        .context("Failed to persist factor vectors")?;

        Ok(())
    }

    async fn vectors(&self, namespace: &str) -> Result<Vec<(String, Vec<f32>)>> {
        let rows: Vec<(String, serde_json::Value)> = sqlx::query_as(
            r#"
            SELECT key, value
            FROM feature_store
            WHERE namespace = $1
            ORDER BY key
            "#,
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load factor vectors")?;

        let mut vectors = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            let vector: Vec<f32> = serde_json::from_value(value)
                .with_context(|| format!("Undecodable factor blob for key {}", key))?;
            vectors.push((key, vector));
        }

        Ok(vectors)
    }
}
