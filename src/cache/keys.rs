//! Cache key schema, the stable wire contract
//!
//! Every component goes through these generators; the offline workers and
//! the online ranker meet on exactly these keys.

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    /// Per-user top-K sorted set (score -> product id), TTL 24h
    /// Format: user:topk:{user_id}
    pub fn user_top_k(user_id: &str) -> String {
        format!("user:topk:{}", user_id)
    }

    /// Global popularity top-K sorted set
    pub fn global_top_k() -> &'static str {
        "global:topk"
    }

    /// Product meta hash: product id -> JSON blob
    pub fn product_meta() -> &'static str {
        "product:meta"
    }

    /// Merchant Beta posterior hash, fields `a` and `b`
    /// Format: bandit:merchant:{merchant_id}
    pub fn merchant_posterior(merchant_id: &str) -> String {
        format!("bandit:merchant:{}", merchant_id)
    }

    /// Category Beta posterior hash, fields `a` and `b`
    /// Format: bandit:category:{category_id}
    pub fn category_posterior(category_id: &str) -> String {
        format!("bandit:category:{}", category_id)
    }

    /// Session trail list, newest at head, length <= 50, TTL 24h
    /// Format: session:{session_id}:recent
    pub fn session_recent(session_id: &str) -> String {
        format!("session:{}:recent", session_id)
    }

    /// Interaction event queue: producers LPUSH, the consumer BRPOPs
    pub fn event_queue() -> &'static str {
        "events"
    }
}
