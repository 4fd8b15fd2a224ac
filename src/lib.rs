pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod store;

pub use config::Config;
pub use error::{ServiceError, ServiceResult};
pub use services::{Bandit, CfTrainer, EventConsumer, FeedRanker, PopularityAggregator};
