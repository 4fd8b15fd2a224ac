// ============================================
// Popularity Aggregator
// ============================================
//
// Windowed rollup of the interaction log: weighted per-product scores are
// written back to the catalog, published as the global top-K set and
// mirrored into the product meta cache. A second pass rolls up merchant
// popularity. Designed to run as a cron-scheduled one-shot process.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::cache::{CacheKey, FeedCache};
use crate::models::ProductMeta;
use crate::store::{InteractionStore, ProductStore};

const WINDOW_DAYS: i64 = 30;
const PRODUCT_ROLLUP_CAP: i64 = 50_000;
const MERCHANT_ROLLUP_CAP: i64 = 10_000;
/// Meta cache writes go out in slices to keep individual commands bounded.
const META_WARM_CHUNK: usize = 1_000;

#[derive(Debug, Clone, Default)]
pub struct PopularityStats {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub products_updated: usize,
    pub merchants_updated: usize,
    pub duration_ms: u64,
}

pub struct PopularityAggregator {
    interactions: Arc<dyn InteractionStore>,
    products: Arc<dyn ProductStore>,
    cache: Arc<dyn FeedCache>,
}

impl PopularityAggregator {
    pub fn new(
        interactions: Arc<dyn InteractionStore>,
        products: Arc<dyn ProductStore>,
        cache: Arc<dyn FeedCache>,
    ) -> Self {
        Self {
            interactions,
            products,
            cache,
        }
    }

    /// One full aggregation pass.
    pub async fn run_once(&self) -> Result<PopularityStats> {
        let started = Instant::now();
        let started_at = Utc::now();

        let rollup = self
            .interactions
            .popularity_rollup(WINDOW_DAYS, PRODUCT_ROLLUP_CAP)
            .await?;

        info!(products = rollup.len(), window_days = WINDOW_DAYS, "Popularity rollup loaded");

        self.products.update_popularity(&rollup).await?;

        self.cache
            .replace_top_k(CacheKey::global_top_k(), &rollup, None)
            .await?;

        self.warm_meta(&rollup).await;

        let merchants = self
            .interactions
            .merchant_rollup(WINDOW_DAYS, MERCHANT_ROLLUP_CAP)
            .await?;
        self.products.update_merchant_popularity(&merchants).await?;

        let stats = PopularityStats {
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
            products_updated: rollup.len(),
            merchants_updated: merchants.len(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            products = stats.products_updated,
            merchants = stats.merchants_updated,
            duration_ms = stats.duration_ms,
            "Popularity aggregation finished"
        );

        Ok(stats)
    }

    /// Proactively mirror the rolled-up products into the meta cache.
    /// Best-effort: the ranker re-hydrates on miss anyway.
    async fn warm_meta(&self, rollup: &[(String, f64)]) {
        for chunk in rollup.chunks(META_WARM_CHUNK) {
            let ids: Vec<String> = chunk.iter().map(|(id, _)| id.clone()).collect();

            let metas: Vec<(String, ProductMeta)> = match self.products.metas_by_ids(&ids).await {
                Ok(metas) => metas,
                Err(e) => {
                    warn!(error = %e, "Meta fetch for cache warm failed, skipping chunk");
                    continue;
                }
            };

            if let Err(e) = self.cache.put_meta(&metas).await {
                warn!(error = %e, count = metas.len(), "Meta cache warm failed, skipping chunk");
            }
        }
    }
}
