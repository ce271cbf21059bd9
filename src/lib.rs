pub mod config;
pub mod data_loader;
pub mod error;
pub mod impute;
pub mod metrics;
pub mod models;
pub mod trainer;
pub mod tuning;

pub use config::Config;
pub use data_loader::AadtTable;
pub use error::ImputeError;
pub use models::{FittedModel, ModelConfig, ModelKind};
