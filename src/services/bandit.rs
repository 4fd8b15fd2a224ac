// ============================================
// Merchant Quality Bandit
// ============================================
//
// Thompson sampling over per-merchant and per-category Beta(a,b)
// posteriors. Counts live in the cache as hash fields `a`/`b` and default
// to (1,1); the event consumer records outcomes, the ranker samples.
//
// Sampling draws two Gamma variates and returns g_a / (g_a + g_b). The
// posterior counts are integers, so Gamma(k, 1) is drawn exactly as a sum
// of k exponentials while k stays small; large counts switch to a normal
// approximation whose error at that size is negligible.

use rand::Rng;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{CacheKey, FeedCache};

/// Which posterior family a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanditScope {
    Merchant,
    Category,
}

impl BanditScope {
    pub fn key(&self, id: &str) -> String {
        match self {
            BanditScope::Merchant => CacheKey::merchant_posterior(id),
            BanditScope::Category => CacheKey::category_posterior(id),
        }
    }
}

/// Shapes up to this draw the exact exponential-sum Gamma; larger counts
/// use the normal approximation.
const EXACT_GAMMA_LIMIT: u64 = 64;

/// Standard exponential via inverse transform. `1 - gen::<f64>()` maps
/// [0,1) onto (0,1], keeping ln() finite.
fn exponential<R: Rng>(rng: &mut R) -> f64 {
    let u: f64 = 1.0 - rng.gen::<f64>();
    -u.ln()
}

/// Gamma(shape, 1) draw for integer shapes.
fn gamma<R: Rng>(shape: u64, rng: &mut R) -> f64 {
    if shape <= EXACT_GAMMA_LIMIT {
        return (0..shape).map(|_| exponential(rng)).sum();
    }

    // Box-Muller normal around the Gamma mean; at this shape the skew is
    // immaterial for the ratio below.
    let k = shape as f64;
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    (k + k.sqrt() * z).max(f64::MIN_POSITIVE)
}

/// Draw a Beta(alpha, beta) sample, strictly inside (0,1).
///
/// Resamples in the degenerate case of both gamma draws collapsing to
/// zero.
pub fn sample_beta<R: Rng>(alpha: u64, beta: u64, rng: &mut R) -> f64 {
    let alpha = alpha.max(1);
    let beta = beta.max(1);

    loop {
        let g_a = gamma(alpha, rng);
        let g_b = gamma(beta, rng);

        let total = g_a + g_b;
        if total > 0.0 && total.is_finite() {
            let sample = g_a / total;
            if sample > 0.0 && sample < 1.0 {
                return sample;
            }
        }
    }
}

/// Bandit over cached Beta posteriors.
#[derive(Clone)]
pub struct Bandit {
    cache: Arc<dyn FeedCache>,
}

impl Bandit {
    pub fn new(cache: Arc<dyn FeedCache>) -> Self {
        Self { cache }
    }

    /// Thompson sample for a key. Cache failures degrade to the neutral
    /// 0.5 so a ranking request always completes.
    pub async fn sample(&self, scope: BanditScope, id: &str) -> f64 {
        let key = scope.key(id);
        match self.cache.posterior(&key).await {
            Ok((a, b)) => sample_beta(a, b, &mut rand::thread_rng()),
            Err(e) => {
                warn!(key = %key, error = %e, "Posterior read failed, sampling neutral");
                0.5
            }
        }
    }

    /// Record an outcome. Best-effort: failures are logged and dropped,
    /// the posterior self-heals with traffic.
    pub async fn record(&self, scope: BanditScope, id: &str, success: bool) {
        let key = scope.key(id);
        if let Err(e) = self.cache.record_outcome(&key, success).await {
            warn!(key = %key, success = success, error = %e, "Dropping bandit outcome");
        } else {
            debug!(key = %key, success = success, "Bandit outcome recorded");
        }
    }

    /// Posterior mean a/(a+b), for diagnostics and tests.
    pub async fn posterior_mean(&self, scope: BanditScope, id: &str) -> Option<f64> {
        let key = scope.key(id);
        match self.cache.posterior(&key).await {
            Ok((a, b)) => Some(a as f64 / (a + b) as f64),
            Err(_) => None,
        }
    }
}
