use std::collections::HashMap;

use crate::models::FeedItem;

/// Diversity re-ranker: reorders a score-sorted pool so no merchant or
/// category dominates the page the caller returns.
///
/// Constraints, with N the page size (capped at the pool size):
/// - at most `ceil(N * max_merchant_ratio)` items per merchant,
/// - at most `ceil(N * max_category_ratio)` items per category,
/// - no run of more than `max_consecutive` items from one merchant.
///
/// The whole pool is reordered so pagination can slice past the first
/// page, but the quotas stay relative to N. When a full scan finds no
/// eligible candidate the constraints become advisory and the remaining
/// pool is appended in its original order. Deterministic given the input
/// order.
pub struct DiversityReranker {
    max_consecutive: usize,
    max_merchant_ratio: f64,
    max_category_ratio: f64,
}

impl Default for DiversityReranker {
    fn default() -> Self {
        Self {
            max_consecutive: 1,
            max_merchant_ratio: 0.25,
            max_category_ratio: 0.40,
        }
    }
}

impl DiversityReranker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(
        max_consecutive: usize,
        max_merchant_ratio: f64,
        max_category_ratio: f64,
    ) -> Self {
        Self {
            max_consecutive,
            max_merchant_ratio,
            max_category_ratio,
        }
    }

    pub fn rerank(&self, items: Vec<FeedItem>, page_size: usize) -> Vec<FeedItem> {
        let n = items.len();
        if n <= 1 {
            return items;
        }

        // Quotas follow the page actually served, not the candidate pool.
        let quota_base = n.min(page_size.max(1));
        let merchant_max = (quota_base as f64 * self.max_merchant_ratio).ceil() as usize;
        let category_max = (quota_base as f64 * self.max_category_ratio).ceil() as usize;

        let mut pool = items;
        let mut output: Vec<FeedItem> = Vec::with_capacity(n);
        let mut merchant_counts: HashMap<String, usize> = HashMap::new();
        let mut category_counts: HashMap<String, usize> = HashMap::new();

        while !pool.is_empty() {
            let pick = pool.iter().position(|item| {
                let merchant = &item.product.merchant_id;
                let category = &item.product.category_id;

                merchant_counts.get(merchant).copied().unwrap_or(0) < merchant_max
                    && category_counts.get(category).copied().unwrap_or(0) < category_max
                    && !self.extends_merchant_run(&output, merchant)
            });

            match pick {
                Some(idx) => {
                    let item = pool.remove(idx);
                    *merchant_counts
                        .entry(item.product.merchant_id.clone())
                        .or_insert(0) += 1;
                    *category_counts
                        .entry(item.product.category_id.clone())
                        .or_insert(0) += 1;
                    output.push(item);
                }
                None => {
                    // Relaxation: nothing qualifies, append the rest as-is.
                    output.append(&mut pool);
                }
            }
        }

        output
    }

    /// Would appending `merchant` create a run longer than allowed?
    fn extends_merchant_run(&self, output: &[FeedItem], merchant: &str) -> bool {
        if output.len() < self.max_consecutive {
            return false;
        }
        output
            .iter()
            .rev()
            .take(self.max_consecutive)
            .all(|item| item.product.merchant_id == merchant)
    }
}
