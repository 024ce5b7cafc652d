mod error;
mod price_series;
mod forecast_model;
mod storage;
mod plotter;

pub mod config;
pub mod sequence;
pub mod model_store;
pub mod insights;
pub mod commands;

pub use error::*;
pub use price_series::*;
pub use forecast_model::*;
pub use storage::*;
pub use plotter::*;
pub use config::{FitOptions, ForecastConfig, ForecastMode, TrainingOptions};
pub use model_store::{ModelMetadata, ModelStore};
pub use insights::{analyze, InsightBundle};
pub use commands::forecast::{forecast, Confidence, ForecastReport, ForecastResult};
pub use commands::train_model::{train_model, train_models, train_from_storage, try_train_model};
