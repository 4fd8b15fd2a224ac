//! In-memory cache and store fakes implementing the production seams.
//!
//! The fakes honor the contracts the components rely on: trail trim to 50,
//! (1,1) posterior defaults, sorted top-K reads and weighted rollups.
//! Failure toggles let tests exercise the degraded paths.
#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use feed_ranking_service::cache::{CacheError, CacheResult, FeedCache, TRAIL_MAX_LEN};
use feed_ranking_service::models::{
    NewInteraction, Product, ProductMeta, TextMatch, TrainingRow,
};
use feed_ranking_service::store::{FeatureBlobStore, InteractionStore, ProductStore};

fn injected_cache_error() -> CacheError {
    CacheError::Redis(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "injected cache failure",
    )))
}

#[derive(Default)]
struct CacheState {
    zsets: HashMap<String, Vec<(String, f64)>>,
    metas: HashMap<String, String>,
    posteriors: HashMap<String, (u64, u64)>,
    trails: HashMap<String, VecDeque<String>>,
    queue: VecDeque<String>,
}

/// In-memory `FeedCache`.
#[derive(Default)]
pub struct MemoryFeedCache {
    state: Mutex<CacheState>,
    failing: AtomicBool,
}

impl MemoryFeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip all cache operations into the failing state.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> CacheResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(injected_cache_error())
        } else {
            Ok(())
        }
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn trail_len(&self, session_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .trails
            .get(session_id)
            .map(|t| t.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl FeedCache for MemoryFeedCache {
    async fn replace_top_k(
        &self,
        key: &str,
        entries: &[(String, f64)],
        _ttl_secs: Option<u64>,
    ) -> CacheResult<()> {
        self.check()?;
        let mut sorted = entries.to_vec();
        sorted.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        self.state
            .lock()
            .unwrap()
            .zsets
            .insert(key.to_string(), sorted);
        Ok(())
    }

    async fn top_k(&self, key: &str, limit: usize) -> CacheResult<Vec<(String, f64)>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .zsets
            .get(key)
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn put_meta(&self, entries: &[(String, ProductMeta)]) -> CacheResult<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        for (id, meta) in entries {
            state
                .metas
                .insert(id.clone(), serde_json::to_string(meta)?);
        }
        Ok(())
    }

    async fn meta_many(&self, ids: &[String]) -> CacheResult<Vec<Option<ProductMeta>>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .map(|id| {
                state
                    .metas
                    .get(id)
                    .and_then(|json| serde_json::from_str(json).ok())
            })
            .collect())
    }

    async fn posterior(&self, key: &str) -> CacheResult<(u64, u64)> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.posteriors.get(key).copied().unwrap_or((1, 1)))
    }

    async fn record_outcome(&self, key: &str, success: bool) -> CacheResult<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let entry = state.posteriors.entry(key.to_string()).or_insert((1, 1));
        if success {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
        Ok(())
    }

    async fn push_trail(&self, session_id: &str, product_id: &str) -> CacheResult<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let trail = state.trails.entry(session_id.to_string()).or_default();
        if trail.front().map(String::as_str) != Some(product_id) {
            trail.push_front(product_id.to_string());
            trail.truncate(TRAIL_MAX_LEN);
        }
        Ok(())
    }

    async fn recent_trail(&self, session_id: &str, limit: usize) -> CacheResult<Vec<String>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .trails
            .get(session_id)
            .map(|trail| trail.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn enqueue_event(&self, payload: &str) -> CacheResult<()> {
        self.check()?;
        self.state
            .lock()
            .unwrap()
            .queue
            .push_front(payload.to_string());
        Ok(())
    }

    async fn dequeue_event(&self, _timeout: Duration) -> CacheResult<Option<String>> {
        self.check()?;
        Ok(self.state.lock().unwrap().queue.pop_back())
    }
}

#[derive(Default)]
struct StoreState {
    products: BTreeMap<String, Product>,
    merchant_popularity: BTreeMap<String, f64>,
    interactions: Vec<NewInteraction>,
    features: BTreeMap<(String, String), Vec<f32>>,
}

/// In-memory store implementing all three repository seams.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: Vec<Product>) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            for product in products {
                state.products.insert(product.id.clone(), product);
            }
        }
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("injected store failure");
        }
        Ok(())
    }

    pub fn interaction_count(&self) -> usize {
        self.state.lock().unwrap().interactions.len()
    }

    pub fn product_popularity(&self, id: &str) -> Option<f64> {
        self.state
            .lock()
            .unwrap()
            .products
            .get(id)
            .map(|p| p.popularity)
    }

    pub fn merchant_popularity(&self, id: &str) -> Option<f64> {
        self.state
            .lock()
            .unwrap()
            .merchant_popularity
            .get(id)
            .copied()
    }
}

/// Character trigram Jaccard similarity, the fake's stand-in for pg_trgm.
fn trigram_similarity(a: &str, b: &str) -> f64 {
    fn trigrams(s: &str) -> HashSet<String> {
        let chars: Vec<char> = s.to_lowercase().chars().collect();
        chars
            .windows(3)
            .map(|w| w.iter().collect::<String>())
            .collect()
    }

    let (ta, tb) = (trigrams(a), trigrams(b));
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let shared = ta.intersection(&tb).count() as f64;
    let union = (ta.len() + tb.len()) as f64 - shared;
    (shared / union).clamp(0.0, 1.0)
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn products_by_ids(&self, ids: &[String]) -> Result<Vec<Product>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| state.products.get(id).cloned())
            .collect())
    }

    async fn metas_by_ids(&self, ids: &[String]) -> Result<Vec<(String, ProductMeta)>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| {
                state
                    .products
                    .get(id)
                    .map(|p| (id.clone(), ProductMeta::from(p)))
            })
            .collect())
    }

    async fn search_text(&self, query: &str, limit: i64) -> Result<Vec<TextMatch>> {
        self.check()?;
        let state = self.state.lock().unwrap();

        let mut matches: Vec<TextMatch> = state
            .products
            .values()
            .filter_map(|p| {
                let score = trigram_similarity(&p.title, query)
                    .max(trigram_similarity(&p.description, query));
                if score > 0.0 {
                    Some(TextMatch {
                        product_id: p.id.clone(),
                        score,
                    })
                } else {
                    None
                }
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.product_id.cmp(&b.product_id))
        });
        matches.truncate(limit as usize);
        Ok(matches)
    }

    async fn top_by_category(&self, category_id: &str, limit: i64) -> Result<Vec<(String, f64)>> {
        self.check()?;
        let state = self.state.lock().unwrap();

        let mut rows: Vec<(String, f64)> = state
            .products
            .values()
            .filter(|p| p.category_id == category_id)
            .map(|p| (p.id.clone(), p.popularity))
            .collect();
        rows.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn top_by_popularity(&self, limit: i64) -> Result<Vec<(String, f64)>> {
        self.check()?;
        let state = self.state.lock().unwrap();

        let mut rows: Vec<(String, f64)> = state
            .products
            .values()
            .map(|p| (p.id.clone(), p.popularity))
            .collect();
        rows.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn update_popularity(&self, rows: &[(String, f64)]) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        for (id, popularity) in rows {
            if let Some(product) = state.products.get_mut(id) {
                product.popularity = *popularity;
            }
        }
        Ok(())
    }

    async fn update_merchant_popularity(&self, rows: &[(String, f64)]) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        for (id, popularity) in rows {
            state.merchant_popularity.insert(id.clone(), *popularity);
        }
        Ok(())
    }
}

#[async_trait]
impl InteractionStore for MemoryStore {
    async fn append(&self, row: NewInteraction) -> Result<()> {
        self.check()?;
        self.state.lock().unwrap().interactions.push(row);
        Ok(())
    }

    async fn popularity_rollup(
        &self,
        _window_days: i64,
        limit: i64,
    ) -> Result<Vec<(String, f64)>> {
        self.check()?;
        let state = self.state.lock().unwrap();

        let mut grouped: BTreeMap<String, f64> = BTreeMap::new();
        for row in &state.interactions {
            *grouped.entry(row.product_id.clone()).or_insert(0.0) +=
                row.kind.weight() * row.value;
        }

        let mut rows: Vec<(String, f64)> = grouped.into_iter().collect();
        rows.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn merchant_rollup(&self, _window_days: i64, limit: i64) -> Result<Vec<(String, f64)>> {
        self.check()?;
        let state = self.state.lock().unwrap();

        let mut grouped: BTreeMap<String, f64> = BTreeMap::new();
        for row in &state.interactions {
            if let Some(product) = state.products.get(&row.product_id) {
                *grouped.entry(product.merchant_id.clone()).or_insert(0.0) +=
                    row.kind.weight() * row.value;
            }
        }

        let mut rows: Vec<(String, f64)> = grouped.into_iter().collect();
        rows.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn training_rows(&self, _window_days: i64, limit: i64) -> Result<Vec<TrainingRow>> {
        self.check()?;
        let state = self.state.lock().unwrap();

        let mut grouped: BTreeMap<(String, String), f64> = BTreeMap::new();
        for row in &state.interactions {
            let user_key = row.user_id.clone().unwrap_or_else(|| "anon".to_string());
            *grouped
                .entry((user_key, row.product_id.clone()))
                .or_insert(0.0) += row.kind.weight() * row.value;
        }

        Ok(grouped
            .into_iter()
            .take(limit as usize)
            .map(|((user_key, product_id), weight)| TrainingRow {
                user_key,
                product_id,
                weight,
            })
            .collect())
    }
}

#[async_trait]
impl FeatureBlobStore for MemoryStore {
    async fn put_vectors(&self, namespace: &str, vectors: &[(String, Vec<f32>)]) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        for (key, vector) in vectors {
            state
                .features
                .insert((namespace.to_string(), key.clone()), vector.clone());
        }
        Ok(())
    }

    async fn vectors(&self, namespace: &str) -> Result<Vec<(String, Vec<f32>)>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .features
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|((_, key), vector)| (key.clone(), vector.clone()))
            .collect())
    }
}

/// Catalog product helper for fixtures.
pub fn product(id: &str, title: &str, merchant: &str, category: &str, popularity: f64) -> Product {
    Product {
        id: id.to_string(),
        title: title.to_string(),
        description: format!("{} description", title),
        merchant_id: merchant.to_string(),
        category_id: category.to_string(),
        popularity,
    }
}
