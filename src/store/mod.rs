//! Typed repositories over the relational store.
//!
//! The ranker and workers depend on these traits, not on Postgres; the
//! concrete repositories are thin `sqlx` wrappers constructed once at
//! startup and shared by clone.

mod features;
mod interactions;
mod products;

pub use features::FeatureRepository;
pub use interactions::InteractionRepository;
pub use products::ProductRepository;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{NewInteraction, Product, ProductMeta, TextMatch, TrainingRow};

#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Full product rows for the given ids (missing ids are skipped).
    async fn products_by_ids(&self, ids: &[String]) -> Result<Vec<Product>>;

    /// Meta records for the given ids (missing ids are skipped).
    async fn metas_by_ids(&self, ids: &[String]) -> Result<Vec<(String, ProductMeta)>>;

    /// Trigram similarity search over title and description; scores in [0,1],
    /// best match first. The query is passed as a bound parameter.
    async fn search_text(&self, query: &str, limit: i64) -> Result<Vec<TextMatch>>;

    /// Products in a category ordered by popularity descending: (id, popularity).
    async fn top_by_category(&self, category_id: &str, limit: i64) -> Result<Vec<(String, f64)>>;

    /// Catalog-wide products ordered by popularity descending. Backfill
    /// fallback for when the global top-K set is cold.
    async fn top_by_popularity(&self, limit: i64) -> Result<Vec<(String, f64)>>;

    /// Batch write of aggregated product popularity.
    async fn update_popularity(&self, rows: &[(String, f64)]) -> Result<()>;

    /// Batch write of aggregated merchant popularity.
    async fn update_merchant_popularity(&self, rows: &[(String, f64)]) -> Result<()>;
}

#[async_trait]
pub trait InteractionStore: Send + Sync {
    /// Append one interaction row (append-only log).
    async fn append(&self, row: NewInteraction) -> Result<()>;

    /// Weighted popularity per product over the trailing window, heaviest
    /// first, capped at `limit` rows.
    async fn popularity_rollup(&self, window_days: i64, limit: i64)
        -> Result<Vec<(String, f64)>>;

    /// Weighted popularity per merchant over the trailing window.
    async fn merchant_rollup(&self, window_days: i64, limit: i64) -> Result<Vec<(String, f64)>>;

    /// Grouped (user, product) -> summed weight rows for CF training.
    /// Anonymous interactions group under the "anon" user key.
    async fn training_rows(&self, window_days: i64, limit: i64) -> Result<Vec<TrainingRow>>;
}

#[async_trait]
pub trait FeatureBlobStore: Send + Sync {
    /// Upsert latent vectors under a namespace (`user_factors` /
    /// `product_factors`).
    async fn put_vectors(&self, namespace: &str, vectors: &[(String, Vec<f32>)]) -> Result<()>;

    /// All vectors stored under a namespace.
    async fn vectors(&self, namespace: &str) -> Result<Vec<(String, Vec<f32>)>>;
}
