use feed_ranking_service::{
    cache::RedisFeedCache,
    store::{InteractionRepository, ProductRepository},
    Config, EventConsumer,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    // Load config
    let config = Config::from_env().expect("Failed to load config");

    info!("Starting feed-ranking-service event consumer");

    let cache =
        Arc::new(RedisFeedCache::from_url(&config.redis.url).expect("Failed to create Redis client"));

    let pool = PgPoolOptions::new()
        .max_connections(config.database.pool_size)
        .connect(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");

    let products = Arc::new(ProductRepository::new(pool.clone()));
    let interactions = Arc::new(InteractionRepository::new(pool));

    let consumer = EventConsumer::new(cache, products, interactions);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer_task = tokio::spawn(async move {
        consumer.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining in-flight event");

    if shutdown_tx.send(true).is_err() {
        error!("Consumer already gone during shutdown");
    }
    consumer_task.await?;

    info!("feed-ranking-service stopped");
    Ok(())
}
