pub mod cf_trainer;
pub mod popularity;

pub use cf_trainer::{CfTrainer, FactorModel, TrainingStats};
pub use popularity::{PopularityAggregator, PopularityStats};
