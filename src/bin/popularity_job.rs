/// One-shot popularity aggregation worker.
///
/// Rolls up the last 30 days of interactions into product and merchant
/// popularity, refreshes the global top-K set and warms the product meta
/// cache. Intended to run from cron.
///
/// Usage:
///   DATABASE_URL=postgres://... REDIS_URL=redis://... popularity-job
use feed_ranking_service::{
    cache::RedisFeedCache,
    store::{InteractionRepository, ProductRepository},
    Config, PopularityAggregator,
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
    let products = Arc::new(ProductRepository::new(pool));

    let aggregator = PopularityAggregator::new(interactions, products, cache);
    let stats = aggregator.run_once().await?;

    info!(
        products = stats.products_updated,
        merchants = stats.merchants_updated,
        duration_ms = stats.duration_ms,
        "Popularity job complete"
    );

    Ok(())
}
