pub mod bandit;
pub mod consumer;
pub mod feed;
pub mod workers;

pub use bandit::{Bandit, BanditScope};
pub use consumer::EventConsumer;
pub use feed::{DiversityReranker, FeedRanker};
pub use workers::{CfTrainer, PopularityAggregator};
