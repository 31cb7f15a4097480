pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod server;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::{CliConfig, ServeArgs};

pub use adapters::LocalStorage;
pub use app::pipelines::{TrainingPipeline, TrainingSummary};
pub use config::TomlConfig;
pub use self::core::{engine::TrainingEngine, predictor::Predictor};
pub use utils::error::{Result, RiskError};
