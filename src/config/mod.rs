use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub redis: RedisConfig,
    pub database: DatabaseConfig,
    pub ranker: RankerConfig,
    pub trainer: TrainerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankerConfig {
    pub default_limit: usize,
    pub max_limit: usize,
    pub candidate_cap: usize,
    pub call_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainerConfig {
    /// Latent vector dimension D. Changing it invalidates all stored factors.
    pub latent_dim: usize,
    pub rng_seed: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::ServiceError> {
        dotenv::dotenv().ok();

        let database_url = env::var("DATABASE_URL").map_err(|_| {
            crate::error::ServiceError::Config("DATABASE_URL must be set".to_string())
        })?;

        Ok(Config {
            redis: RedisConfig {
                url: env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            },
            database: DatabaseConfig {
                url: database_url,
                pool_size: env::var("DATABASE_POOL_SIZE")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .expect("DATABASE_POOL_SIZE must be a valid u32"),
            },
            ranker: RankerConfig {
                default_limit: env::var("FEED_DEFAULT_LIMIT")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .expect("FEED_DEFAULT_LIMIT must be a valid usize"),
                max_limit: env::var("FEED_MAX_LIMIT")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .expect("FEED_MAX_LIMIT must be a valid usize"),
                candidate_cap: env::var("FEED_CANDIDATE_CAP")
                    .unwrap_or_else(|_| "200".to_string())
                    .parse()
                    .expect("FEED_CANDIDATE_CAP must be a valid usize"),
                call_timeout_ms: env::var("CALL_TIMEOUT_MS")
                    .unwrap_or_else(|_| "800".to_string())
                    .parse()
                    .expect("CALL_TIMEOUT_MS must be a valid u64"),
            },
            trainer: TrainerConfig {
                latent_dim: env::var("LATENT_DIM")
                    .unwrap_or_else(|_| "32".to_string())
                    .parse()
                    .expect("LATENT_DIM must be a valid usize"),
                rng_seed: env::var("CF_RNG_SEED")
                    .unwrap_or_else(|_| "42".to_string())
                    .parse()
                    .expect("CF_RNG_SEED must be a valid u64"),
            },
        })
    }
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            default_limit: 30,
            max_limit: 100,
            candidate_cap: 200,
            call_timeout_ms: 800,
        }
    }
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            latent_dim: 32,
            rng_seed: 42,
        }
    }
}
