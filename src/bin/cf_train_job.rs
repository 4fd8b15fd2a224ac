/// One-shot collaborative-filtering training worker.
///
/// Loads the last 90 days of interactions, trains user/product latent
/// factors with SGD, persists them to the feature blob store and replaces
/// each user's cached top-K. Intended to run from cron.
///
/// Usage:
///   DATABASE_URL=postgres://... REDIS_URL=redis://... LATENT_DIM=32 cf-train-job
use feed_ranking_service::{
    cache::RedisFeedCache,
    store::{FeatureRepository, InteractionRepository},
    CfTrainer, Config,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let cache = Arc::new(RedisFeedCache::from_url(&config.redis.url)?);
    let pool = PgPoolOptions::new()
        .max_connections(config.database.pool_size)
        .connect(&config.database.url)
        .await?;

    let interactions = Arc::new(InteractionRepository::new(pool.clone()));
    let features = Arc::new(FeatureRepository::new(pool));

    let trainer = CfTrainer::new(interactions, features, cache, config.trainer.clone());
    let stats = trainer.run_once().await?;

    info!(
        rows = stats.rows_loaded,
        users = stats.users_trained,
        products = stats.products_trained,
        top_k_written = stats.top_k_written,
        duration_ms = stats.duration_ms,
        "CF training job complete"
    );

    Ok(())
}
