//! Feed Ranker
//!
//! The online path: multi-source candidate generation, meta hydration,
//! score fusion with Thompson-sampled merchant quality, diversity
//! re-ranking and cursor pagination.
//!
//! The ranker never fails a request for operational reasons. Every cache
//! and store call carries a deadline; a call that errors or expires is
//! treated as a miss and the request completes with whatever candidates
//! have accumulated.

mod diversity;

pub use diversity::DiversityReranker;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, FeedCache};
use crate::config::RankerConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    Candidate, CandidateSource, FeedItem, FeedProduct, FeedRequest, FeedResponse, ProductMeta,
};
use crate::services::bandit::{Bandit, BanditScope};
use crate::store::ProductStore;

// Score fusion weights.
const W_CF: f64 = 0.45;
const W_POP: f64 = 0.18;
const W_BANDIT: f64 = 0.12;
const W_SESSION: f64 = 0.10;
const W_TEXT_WITH_QUERY: f64 = 0.20;
const W_TEXT_NO_QUERY: f64 = 0.05;

/// Floor and scale applied to fuzzy-match scores when they seed a base score.
const TEXT_BASE_FLOOR: f64 = 0.05;
const TEXT_BASE_SCALE: f64 = 0.8;

const TEXT_SEARCH_LIMIT: i64 = 200;
const CATEGORY_FETCH_LIMIT: i64 = 200;
/// Only the freshest part of the trail counts as session affinity.
const TRAIL_AFFINITY_WINDOW: usize = 20;

const POPULARITY_BACKFILL_WEIGHT: f64 = 0.6;
const CATEGORY_BACKFILL_WEIGHT: f64 = 0.5;

/// Insertion-ordered candidate set. First writer wins the slot; the text
/// phase max-merges into existing entries.
struct CandidateSet {
    ordered: Vec<Candidate>,
    index: HashMap<String, usize>,
}

impl CandidateSet {
    fn new() -> Self {
        Self {
            ordered: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.ordered.len()
    }

    fn insert_if_absent(&mut self, product_id: &str, base_score: f64, source: CandidateSource) {
        if self.index.contains_key(product_id) {
            return;
        }
        self.index
            .insert(product_id.to_string(), self.ordered.len());
        self.ordered.push(Candidate {
            product_id: product_id.to_string(),
            base_score,
            text_score: 0.0,
            source,
        });
    }

    /// Text matches raise an existing base score to at least
    /// `floor + scale * text` and always record the text score.
    fn merge_text_match(&mut self, product_id: &str, text_score: f64) {
        let seeded = TEXT_BASE_FLOOR + TEXT_BASE_SCALE * text_score;
        match self.index.get(product_id) {
            Some(&idx) => {
                let candidate = &mut self.ordered[idx];
                candidate.base_score = candidate.base_score.max(seeded);
                candidate.text_score = text_score;
            }
            None => {
                self.index
                    .insert(product_id.to_string(), self.ordered.len());
                self.ordered.push(Candidate {
                    product_id: product_id.to_string(),
                    base_score: seeded,
                    text_score,
                    source: CandidateSource::Textual,
                });
            }
        }
    }

    fn truncate(&mut self, cap: usize) {
        if self.ordered.len() > cap {
            self.ordered.truncate(cap);
            self.index.retain(|_, idx| *idx < cap);
        }
    }

    fn into_candidates(self) -> Vec<Candidate> {
        self.ordered
    }
}

pub struct FeedRanker {
    cache: Arc<dyn FeedCache>,
    products: Arc<dyn ProductStore>,
    bandit: Bandit,
    diversity: DiversityReranker,
    config: RankerConfig,
}

impl FeedRanker {
    pub fn new(
        cache: Arc<dyn FeedCache>,
        products: Arc<dyn ProductStore>,
        config: RankerConfig,
    ) -> Self {
        let bandit = Bandit::new(cache.clone());
        Self {
            cache,
            products,
            bandit,
            diversity: DiversityReranker::new(),
            config,
        }
    }

    pub fn with_diversity(mut self, diversity: DiversityReranker) -> Self {
        self.diversity = diversity;
        self
    }

    /// Produce one ranked, paginated feed page.
    ///
    /// Only invalid parameters produce an error; degraded dependencies
    /// produce a degraded page.
    pub async fn get_feed(&self, request: FeedRequest) -> ServiceResult<FeedResponse> {
        let limit = self.resolve_limit(request.limit)?;
        let search_text = request
            .search_text
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty());

        let candidates = self
            .generate_candidates(&request, search_text, limit)
            .await;

        if candidates.is_empty() {
            return Ok(FeedResponse {
                items: Vec::new(),
                cursor: None,
            });
        }

        let hydrated = self.hydrate(&candidates).await;
        let trail = self.session_trail(request.session_id.as_deref()).await;

        let scored = self
            .fuse_scores(candidates, hydrated, &trail, search_text.is_some())
            .await;

        let ranked = self.diversity.rerank(scored, limit);
        let page = paginate(ranked, request.cursor.as_deref(), limit);

        info!(
            user_id = request.user_id.as_deref().unwrap_or("-"),
            returned = page.items.len(),
            "Feed page served"
        );

        Ok(page)
    }

    fn resolve_limit(&self, limit: Option<u32>) -> ServiceResult<usize> {
        match limit {
            None => Ok(self.config.default_limit),
            Some(l) if l >= 1 && l as usize <= self.config.max_limit => Ok(l as usize),
            Some(l) => Err(ServiceError::InvalidInput(format!(
                "limit must be within 1..={}, got {}",
                self.config.max_limit, l
            ))),
        }
    }

    /// Candidate generation phases in declared order: personalized,
    /// textual, popularity backfill, category backfill.
    async fn generate_candidates(
        &self,
        request: &FeedRequest,
        search_text: Option<&str>,
        limit: usize,
    ) -> Vec<Candidate> {
        let mut set = CandidateSet::new();

        // Phase 1: personalized CF top-K.
        if let Some(user_id) = request.user_id.as_deref() {
            let key = CacheKey::user_top_k(user_id);
            if let Some(entries) = self
                .timed("user_top_k", self.cache.top_k(&key, self.config.candidate_cap))
                .await
            {
                for (product_id, cf_score) in entries {
                    set.insert_if_absent(&product_id, cf_score, CandidateSource::Personalized);
                }
            }
        }

        // Phase 2: fuzzy text matches.
        if let Some(query) = search_text {
            if let Some(matches) = self
                .timed(
                    "text_search",
                    self.products.search_text(query, TEXT_SEARCH_LIMIT),
                )
                .await
            {
                for m in matches {
                    set.merge_text_match(&m.product_id, m.score.clamp(0.0, 1.0));
                }
            }
        }

        // Phase 3: popularity backfill when the pool is thin; the cached
        // global top-K with a cold-start fallback to the store.
        if set.len() < 3 * limit {
            let mut entries = self
                .timed(
                    "global_top_k",
                    self.cache
                        .top_k(CacheKey::global_top_k(), self.config.candidate_cap),
                )
                .await
                .unwrap_or_default();

            if entries.is_empty() {
                entries = self
                    .timed(
                        "top_by_popularity",
                        self.products.top_by_popularity(self.config.candidate_cap as i64),
                    )
                    .await
                    .unwrap_or_default();
            }

            for (product_id, popularity) in entries {
                set.insert_if_absent(
                    &product_id,
                    POPULARITY_BACKFILL_WEIGHT * popularity,
                    CandidateSource::Popularity,
                );
            }
        }

        // Phase 4: category backfill.
        if let Some(category_id) = request.category_id.as_deref() {
            if set.len() < 2 * limit {
                if let Some(rows) = self
                    .timed(
                        "top_by_category",
                        self.products.top_by_category(category_id, CATEGORY_FETCH_LIMIT),
                    )
                    .await
                {
                    for (product_id, popularity) in rows {
                        set.insert_if_absent(
                            &product_id,
                            CATEGORY_BACKFILL_WEIGHT * popularity,
                            CandidateSource::Category,
                        );
                    }
                }
            }
        }

        set.truncate(self.config.candidate_cap);
        set.into_candidates()
    }

    /// Bulk-hydrate product meta: cache first, store for the misses.
    /// Store-hydrated products are warmed back into the cache as a
    /// fire-and-forget task.
    async fn hydrate(&self, candidates: &[Candidate]) -> HashMap<String, FeedProduct> {
        let ids: Vec<String> = candidates.iter().map(|c| c.product_id.clone()).collect();
        let mut hydrated: HashMap<String, FeedProduct> = HashMap::with_capacity(ids.len());

        let cached = self
            .timed("meta_many", self.cache.meta_many(&ids))
            .await
            .unwrap_or_else(|| vec![None; ids.len()]);

        let mut misses: Vec<String> = Vec::new();
        for (id, meta) in ids.iter().zip(cached.into_iter()) {
            match meta {
                Some(meta) => {
                    hydrated.insert(id.clone(), FeedProduct::from_meta(id, &meta));
                }
                None => misses.push(id.clone()),
            }
        }

        if !misses.is_empty() {
            if let Some(products) = self
                .timed("products_by_ids", self.products.products_by_ids(&misses))
                .await
            {
                let warm: Vec<(String, ProductMeta)> = products
                    .iter()
                    .map(|p| (p.id.clone(), ProductMeta::from(p)))
                    .collect();

                for p in products {
                    hydrated.insert(
                        p.id.clone(),
                        FeedProduct {
                            id: p.id,
                            title: p.title,
                            description: p.description,
                            merchant_id: p.merchant_id,
                            category_id: p.category_id,
                            popularity: p.popularity,
                        },
                    );
                }

                // Opportunistic warm-back; failure only logged.
                let cache = self.cache.clone();
                tokio::spawn(async move {
                    if let Err(e) = cache.put_meta(&warm).await {
                        warn!(error = %e, count = warm.len(), "Meta warm-back failed");
                    }
                });
            }
        }

        hydrated
    }

    async fn session_trail(&self, session_id: Option<&str>) -> HashSet<String> {
        let Some(session_id) = session_id else {
            return HashSet::new();
        };

        self.timed(
            "recent_trail",
            self.cache.recent_trail(session_id, TRAIL_AFFINITY_WINDOW),
        )
        .await
        .map(|trail| trail.into_iter().collect())
        .unwrap_or_default()
    }

    /// Combine the base score with popularity, merchant quality, text and
    /// session affinity. Candidates without meta are dropped.
    async fn fuse_scores(
        &self,
        candidates: Vec<Candidate>,
        hydrated: HashMap<String, FeedProduct>,
        trail: &HashSet<String>,
        has_query: bool,
    ) -> Vec<FeedItem> {
        let w_text = if has_query {
            W_TEXT_WITH_QUERY
        } else {
            W_TEXT_NO_QUERY
        };

        // One Thompson draw per distinct merchant per request.
        let mut merchant_samples: HashMap<String, f64> = HashMap::new();
        let mut items: Vec<FeedItem> = Vec::with_capacity(candidates.len());
        let mut dropped = 0usize;

        for candidate in candidates {
            let Some(product) = hydrated.get(&candidate.product_id) else {
                dropped += 1;
                continue;
            };

            let merchant_quality = match merchant_samples.get(&product.merchant_id) {
                Some(&sample) => sample,
                None => {
                    let sample = self
                        .bandit
                        .sample(BanditScope::Merchant, &product.merchant_id)
                        .await;
                    merchant_samples.insert(product.merchant_id.clone(), sample);
                    sample
                }
            };

            let session_affinity = if trail.contains(&candidate.product_id) {
                1.0
            } else {
                0.0
            };

            let score = W_CF * candidate.base_score
                + W_POP * product.popularity
                + W_BANDIT * merchant_quality
                + w_text * candidate.text_score
                + W_SESSION * session_affinity;

            items.push(FeedItem {
                score: score.max(0.0),
                product: product.clone(),
            });
        }

        if dropped > 0 {
            debug!(dropped = dropped, "Candidates dropped for missing meta");
        }

        // Descending by fused score; NaN never occurs but the comparator
        // stays total anyway.
        items.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        items
    }

    /// Deadline wrapper: expired or failed calls degrade to `None`.
    async fn timed<T, E, F>(&self, call: &str, fut: F) -> Option<T>
    where
        E: std::fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        let deadline = Duration::from_millis(self.config.call_timeout_ms);
        match tokio::time::timeout(deadline, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(call = call, error = %e, "Dependency call failed, degrading");
                None
            }
            Err(_) => {
                warn!(call = call, timeout_ms = self.config.call_timeout_ms, "Dependency call timed out, degrading");
                None
            }
        }
    }
}

/// Offset-by-last-id pagination. The cursor is the id of the last item of
/// the previous page; a stale or unknown cursor restarts from the top.
fn paginate(ranked: Vec<FeedItem>, cursor: Option<&str>, limit: usize) -> FeedResponse {
    let start = match cursor {
        Some(cursor_id) => ranked
            .iter()
            .position(|item| item.product.id == cursor_id)
            .map(|pos| pos + 1)
            .unwrap_or(0),
        None => 0,
    };

    let items: Vec<FeedItem> = ranked.into_iter().skip(start).take(limit).collect();
    let cursor = items.last().map(|item| item.product.id.clone());

    FeedResponse { items, cursor }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_item(id: &str, score: f64) -> FeedItem {
        FeedItem {
            score,
            product: FeedProduct {
                id: id.to_string(),
                title: String::new(),
                description: String::new(),
                merchant_id: "m".to_string(),
                category_id: "c".to_string(),
                popularity: 0.0,
            },
        }
    }

    #[test]
    fn test_candidate_set_first_writer_wins() {
        let mut set = CandidateSet::new();
        set.insert_if_absent("p1", 0.9, CandidateSource::Personalized);
        set.insert_if_absent("p1", 0.1, CandidateSource::Popularity);

        let candidates = set.into_candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].base_score, 0.9);
        assert_eq!(candidates[0].source, CandidateSource::Personalized);
    }

    #[test]
    fn test_text_merge_raises_base() {
        let mut set = CandidateSet::new();
        set.insert_if_absent("p1", 0.2, CandidateSource::Personalized);
        set.merge_text_match("p1", 1.0);

        let candidates = set.into_candidates();
        assert!((candidates[0].base_score - 0.85).abs() < 1e-9);
        assert_eq!(candidates[0].text_score, 1.0);

        // A weak match never lowers a strong CF base.
        let mut set = CandidateSet::new();
        set.insert_if_absent("p2", 0.9, CandidateSource::Personalized);
        set.merge_text_match("p2", 0.1);
        let candidates = set.into_candidates();
        assert_eq!(candidates[0].base_score, 0.9);
        assert_eq!(candidates[0].text_score, 0.1);
    }

    #[test]
    fn test_candidate_set_preserves_insertion_order() {
        let mut set = CandidateSet::new();
        set.insert_if_absent("p3", 0.1, CandidateSource::Popularity);
        set.insert_if_absent("p1", 0.2, CandidateSource::Popularity);
        set.merge_text_match("p2", 0.5);
        set.truncate(2);

        let ids: Vec<String> = set
            .into_candidates()
            .into_iter()
            .map(|c| c.product_id)
            .collect();
        assert_eq!(ids, vec!["p3", "p1"]);
    }

    #[test]
    fn test_paginate_from_cursor() {
        let ranked = vec![
            feed_item("p1", 0.5),
            feed_item("p2", 0.4),
            feed_item("p3", 0.3),
            feed_item("p4", 0.2),
        ];

        let page = paginate(ranked, Some("p2"), 2);
        let ids: Vec<&str> = page.items.iter().map(|i| i.product.id.as_str()).collect();
        assert_eq!(ids, vec!["p3", "p4"]);
        assert_eq!(page.cursor.as_deref(), Some("p4"));
    }

    #[test]
    fn test_paginate_stale_cursor_restarts() {
        let ranked = vec![feed_item("p1", 0.5), feed_item("p2", 0.4)];
        let page = paginate(ranked, Some("gone"), 1);
        assert_eq!(page.items[0].product.id, "p1");
        assert_eq!(page.cursor.as_deref(), Some("p1"));
    }

    #[test]
    fn test_paginate_empty() {
        let page = paginate(Vec::new(), None, 10);
        assert!(page.items.is_empty());
        assert!(page.cursor.is_none());
    }
}
