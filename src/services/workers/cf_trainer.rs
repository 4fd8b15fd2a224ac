// ============================================
// Collaborative Filtering Trainer
// ============================================
//
// Offline SGD over implicit feedback. Interactions from the trailing
// window are grouped into (user, product) -> summed weight triples; user
// and product factors are trained jointly, persisted as feature blobs and
// projected into per-user top-K sets in the cache.
//
// Training is deterministic: triples are visited in sorted order and all
// vectors are initialized from a single seeded RNG, so a fixed seed and
// input reproduce bit-identical factors and top-K lists.

use anyhow::Result;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::cache::{ttl, CacheKey, FeedCache};
use crate::config::TrainerConfig;
use crate::models::TrainingRow;
use crate::store::{FeatureBlobStore, InteractionStore};

pub const USER_FACTORS_NS: &str = "user_factors";
pub const PRODUCT_FACTORS_NS: &str = "product_factors";

const WINDOW_DAYS: i64 = 90;
const ROW_CAP: i64 = 1_000_000;
const EPOCHS: usize = 3;
const LEARNING_RATE: f32 = 0.025;
const REGULARIZATION: f32 = 0.01;
const INIT_SCALE: f32 = 0.005;
const TOP_K: usize = 200;

/// Trained low-rank factors. `BTreeMap` keeps iteration (and therefore
/// persistence and projection order) deterministic.
#[derive(Debug, Clone)]
pub struct FactorModel {
    pub dim: usize,
    pub users: BTreeMap<String, Array1<f32>>,
    pub products: BTreeMap<String, Array1<f32>>,
}

impl FactorModel {
    /// Predicted affinity, `None` when either side is untrained.
    pub fn predict(&self, user_key: &str, product_id: &str) -> Option<f32> {
        let u = self.users.get(user_key)?;
        let p = self.products.get(product_id)?;
        Some(u.dot(p))
    }

    /// Product ids and the (products x dim) matrix for batch scoring.
    fn product_matrix(&self) -> (Vec<&str>, Array2<f32>) {
        let ids: Vec<&str> = self.products.keys().map(String::as_str).collect();
        let mut matrix = Array2::zeros((ids.len(), self.dim));
        for (row, vector) in self.products.values().enumerate() {
            matrix.row_mut(row).assign(vector);
        }
        (ids, matrix)
    }
}

/// Deterministic SGD matrix factorization over grouped training rows.
pub fn train(rows: &[TrainingRow], dim: usize, seed: u64) -> FactorModel {
    // Re-group defensively and fix the visit order.
    let mut triples: BTreeMap<(String, String), f64> = BTreeMap::new();
    for row in rows {
        *triples
            .entry((row.user_key.clone(), row.product_id.clone()))
            .or_insert(0.0) += row.weight;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let init_vector = |rng: &mut StdRng| -> Array1<f32> {
        Array1::from_iter((0..dim).map(|_| rng.gen_range(-INIT_SCALE..INIT_SCALE)))
    };

    // Users first, products second, each in sorted id order: the init
    // draw sequence is a function of (seed, id sets) only.
    let mut users: BTreeMap<String, Array1<f32>> = BTreeMap::new();
    for (user_key, _) in triples.keys() {
        if !users.contains_key(user_key) {
            users.insert(user_key.clone(), Array1::zeros(dim));
        }
    }
    for vector in users.values_mut() {
        *vector = init_vector(&mut rng);
    }

    let mut products: BTreeMap<String, Array1<f32>> = BTreeMap::new();
    for (_, product_id) in triples.keys() {
        if !products.contains_key(product_id) {
            products.insert(product_id.clone(), Array1::zeros(dim));
        }
    }
    for vector in products.values_mut() {
        *vector = init_vector(&mut rng);
    }

    for _ in 0..EPOCHS {
        for ((user_key, product_id), weight) in &triples {
            let u = users[user_key].clone();
            let p = products[product_id].clone();

            let err = *weight as f32 - u.dot(&p);

            let u_next = &u + &((&p * err - &u * REGULARIZATION) * LEARNING_RATE);
            let p_next = &p + &((&u * err - &p * REGULARIZATION) * LEARNING_RATE);

            users.insert(user_key.clone(), u_next);
            products.insert(product_id.clone(), p_next);
        }
    }

    FactorModel {
        dim,
        users,
        products,
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrainingStats {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rows_loaded: usize,
    pub users_trained: usize,
    pub products_trained: usize,
    pub top_k_written: usize,
    pub duration_ms: u64,
}

pub struct CfTrainer {
    interactions: Arc<dyn InteractionStore>,
    features: Arc<dyn FeatureBlobStore>,
    cache: Arc<dyn FeedCache>,
    config: TrainerConfig,
}

impl CfTrainer {
    pub fn new(
        interactions: Arc<dyn InteractionStore>,
        features: Arc<dyn FeatureBlobStore>,
        cache: Arc<dyn FeedCache>,
        config: TrainerConfig,
    ) -> Self {
        Self {
            interactions,
            features,
            cache,
            config,
        }
    }

    /// One full training pass: load, train, persist factors, project
    /// per-user top-K into the cache.
    pub async fn run_once(&self) -> Result<TrainingStats> {
        let started = Instant::now();
        let started_at = Utc::now();

        let rows = self
            .interactions
            .training_rows(WINDOW_DAYS, ROW_CAP)
            .await?;

        if rows.is_empty() {
            info!("No training rows in window, skipping CF training");
            return Ok(TrainingStats {
                started_at: Some(started_at),
                completed_at: Some(Utc::now()),
                duration_ms: started.elapsed().as_millis() as u64,
                ..TrainingStats::default()
            });
        }

        info!(
            rows = rows.len(),
            dim = self.config.latent_dim,
            "Training latent factors"
        );

        let model = train(&rows, self.config.latent_dim, self.config.rng_seed);

        self.persist_factors(&model).await?;
        let top_k_written = self.project_top_k(&model).await;

        let stats = TrainingStats {
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
            rows_loaded: rows.len(),
            users_trained: model.users.len(),
            products_trained: model.products.len(),
            top_k_written,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            users = stats.users_trained,
            products = stats.products_trained,
            top_k_written = stats.top_k_written,
            duration_ms = stats.duration_ms,
            "CF training finished"
        );

        Ok(stats)
    }

    async fn persist_factors(&self, model: &FactorModel) -> Result<()> {
        let user_blobs: Vec<(String, Vec<f32>)> = model
            .users
            .iter()
            .map(|(key, vector)| (key.clone(), vector.to_vec()))
            .collect();
        self.features
            .put_vectors(USER_FACTORS_NS, &user_blobs)
            .await?;

        let product_blobs: Vec<(String, Vec<f32>)> = model
            .products
            .iter()
            .map(|(key, vector)| (key.clone(), vector.to_vec()))
            .collect();
        self.features
            .put_vectors(PRODUCT_FACTORS_NS, &product_blobs)
            .await?;

        Ok(())
    }

    /// Score every trained user against the product matrix and atomically
    /// replace their cached top-K. Per-user failures are logged and the
    /// pass continues.
    async fn project_top_k(&self, model: &FactorModel) -> usize {
        let (product_ids, matrix) = model.product_matrix();
        let mut written = 0usize;

        for (user_key, user_vector) in &model.users {
            let scores = matrix.dot(user_vector);

            let mut ranked: Vec<(&str, f32)> = product_ids
                .iter()
                .copied()
                .zip(scores.iter().copied())
                .collect();
            // Descending score, id ascending on ties: a stable projection.
            ranked.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(b.0))
            });
            ranked.truncate(TOP_K);

            let entries: Vec<(String, f64)> = ranked
                .into_iter()
                .map(|(id, score)| (id.to_string(), score as f64))
                .collect();

            let key = CacheKey::user_top_k(user_key);
            match self
                .cache
                .replace_top_k(&key, &entries, Some(ttl::USER_TOP_K))
                .await
            {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!(user = %user_key, error = %e, "Top-K write failed, continuing");
                }
            }
        }

        written
    }
}
