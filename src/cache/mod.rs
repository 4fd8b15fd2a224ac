//! Typed façade over the fast KV store (C1)
//!
//! Owns the key schema and the atomic operations every other component
//! relies on: sorted-set replace, hash increments, trail push-with-trim and
//! the blocking queue pop. Replacing a top-K set is a single externally
//! observable step: readers see the old set or the new one, never a
//! partial write.

mod keys;

pub use keys::CacheKey;

use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::ProductMeta;

/// Maximum entries retained in a session trail.
pub const TRAIL_MAX_LEN: usize = 50;

/// TTL values (seconds)
pub mod ttl {
    /// Per-user top-K lives one day past its last rebuild.
    pub const USER_TOP_K: u64 = 86_400;
    /// Session trails expire one day after the last write.
    pub const SESSION_TRAIL: u64 = 86_400;
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Cache operations used by the ranker, the consumer and the batch workers.
#[async_trait]
pub trait FeedCache: Send + Sync {
    /// Atomically replace a top-K sorted set (old set or new set, never a
    /// partial one). `ttl_secs` of `None` leaves the key persistent.
    async fn replace_top_k(
        &self,
        key: &str,
        entries: &[(String, f64)],
        ttl_secs: Option<u64>,
    ) -> CacheResult<()>;

    /// Highest-scored entries first.
    async fn top_k(&self, key: &str, limit: usize) -> CacheResult<Vec<(String, f64)>>;

    /// Upsert product meta blobs into the `product:meta` hash.
    async fn put_meta(&self, entries: &[(String, ProductMeta)]) -> CacheResult<()>;

    /// Multi-get product meta; position i corresponds to `ids[i]`.
    async fn meta_many(&self, ids: &[String]) -> CacheResult<Vec<Option<ProductMeta>>>;

    /// Beta posterior for a bandit key; missing key reads as (1,1).
    async fn posterior(&self, key: &str) -> CacheResult<(u64, u64)>;

    /// Increment `a` (success) or `b` (failure) by one.
    async fn record_outcome(&self, key: &str, success: bool) -> CacheResult<()>;

    /// Left-push onto a session trail, trim to `TRAIL_MAX_LEN`, refresh
    /// TTL. A push matching the current head only refreshes the TTL, so
    /// the trail never repeats its most recent id.
    async fn push_trail(&self, session_id: &str, product_id: &str) -> CacheResult<()>;

    /// Newest-first slice of a session trail.
    async fn recent_trail(&self, session_id: &str, limit: usize) -> CacheResult<Vec<String>>;

    /// Producer side of the event queue (at-least-once).
    async fn enqueue_event(&self, payload: &str) -> CacheResult<()>;

    /// Blocking pop from the event queue; `Ok(None)` when the timeout
    /// elapses with nothing to consume.
    async fn dequeue_event(&self, timeout: Duration) -> CacheResult<Option<String>>;
}

/// Redis-backed cache client.
///
/// Explicitly constructed at startup and passed by handle into each
/// component. Every call opens its own handle on the multiplexed
/// connection: the blocking queue pop must not stall unrelated cache
/// traffic behind a shared connection.
#[derive(Clone)]
pub struct RedisFeedCache {
    client: redis::Client,
}

impl RedisFeedCache {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub fn from_url(url: &str) -> CacheResult<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }

    async fn conn(&self) -> CacheResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl FeedCache for RedisFeedCache {
    async fn replace_top_k(
        &self,
        key: &str,
        entries: &[(String, f64)],
        ttl_secs: Option<u64>,
    ) -> CacheResult<()> {
        let mut conn = self.conn().await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(key);
        for (member, score) in entries {
            pipe.zadd(key, member, *score);
        }
        if let Some(ttl) = ttl_secs {
            pipe.expire(key, ttl as i64);
        }
        let _: () = pipe.query_async(&mut conn).await?;

        debug!(key = %key, count = entries.len(), "Top-K replaced");
        Ok(())
    }

    async fn top_k(&self, key: &str, limit: usize) -> CacheResult<Vec<(String, f64)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let entries: Vec<(String, f64)> = conn
            .zrevrange_withscores(key, 0, limit as isize - 1)
            .await?;
        Ok(entries)
    }

    async fn put_meta(&self, entries: &[(String, ProductMeta)]) -> CacheResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;

        let mut fields: Vec<(&str, String)> = Vec::with_capacity(entries.len());
        for (id, meta) in entries {
            fields.push((id.as_str(), serde_json::to_string(meta)?));
        }
        let _: () = conn
            .hset_multiple(CacheKey::product_meta(), &fields)
            .await?;

        debug!(count = entries.len(), "Product meta cached");
        Ok(())
    }

    async fn meta_many(&self, ids: &[String]) -> CacheResult<Vec<Option<ProductMeta>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;

        let blobs: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(CacheKey::product_meta())
            .arg(ids)
            .query_async(&mut conn)
            .await?;

        let metas = blobs
            .into_iter()
            .map(|blob| {
                blob.and_then(|json| match serde_json::from_str::<ProductMeta>(&json) {
                    Ok(meta) => Some(meta),
                    Err(e) => {
                        // Corrupted entries read as misses; the ranker
                        // re-hydrates from the store.
                        warn!(error = %e, "Discarding undecodable product meta blob");
                        None
                    }
                })
            })
            .collect();

        Ok(metas)
    }

    async fn posterior(&self, key: &str) -> CacheResult<(u64, u64)> {
        let mut conn = self.conn().await?;

        let counts: Vec<Option<u64>> = redis::cmd("HMGET")
            .arg(key)
            .arg("a")
            .arg("b")
            .query_async(&mut conn)
            .await?;

        let a = counts.first().copied().flatten().unwrap_or(1).max(1);
        let b = counts.get(1).copied().flatten().unwrap_or(1).max(1);
        Ok((a, b))
    }

    async fn record_outcome(&self, key: &str, success: bool) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        let field = if success { "a" } else { "b" };

        // Seed missing counts with the (1,1) prior so increments land on
        // top of the default posterior.
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset_nx(key, "a", 1i64);
        pipe.hset_nx(key, "b", 1i64);
        pipe.hincr(key, field, 1i64);
        let _: () = pipe.query_async(&mut conn).await?;

        Ok(())
    }

    async fn push_trail(&self, session_id: &str, product_id: &str) -> CacheResult<()> {
        let key = CacheKey::session_recent(session_id);
        let mut conn = self.conn().await?;

        // Head check and push are not one atomic unit; concurrent
        // consumers on a session are best-effort by contract.
        let head: Option<String> = conn.lindex(&key, 0).await?;
        if head.as_deref() == Some(product_id) {
            let _: () = conn.expire(&key, ttl::SESSION_TRAIL as i64).await?;
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.lpush(&key, product_id);
        pipe.ltrim(&key, 0, TRAIL_MAX_LEN as isize - 1);
        pipe.expire(&key, ttl::SESSION_TRAIL as i64);
        let _: () = pipe.query_async(&mut conn).await?;

        Ok(())
    }

    async fn recent_trail(&self, session_id: &str, limit: usize) -> CacheResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let key = CacheKey::session_recent(session_id);
        let mut conn = self.conn().await?;
        let trail: Vec<String> = conn.lrange(&key, 0, limit as isize - 1).await?;
        Ok(trail)
    }

    async fn enqueue_event(&self, payload: &str) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.lpush(CacheKey::event_queue(), payload).await?;
        Ok(())
    }

    async fn dequeue_event(&self, timeout: Duration) -> CacheResult<Option<String>> {
        let mut conn = self.conn().await?;

        let popped: Option<(String, String)> = conn
            .brpop(CacheKey::event_queue(), timeout.as_secs_f64())
            .await?;

        Ok(popped.map(|(_, payload)| payload))
    }
}
