use std::path::{Path, PathBuf};

use anyhow::Context;
use getset::Setters;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::sequence::DEFAULT_WINDOW_LENGTH;

/// Observations kept with a saved model so it can forecast without caller-supplied history.
pub const DEFAULT_RETAINED_HISTORY : usize = 90;

#[derive(Debug, PartialEq, Clone, Copy, Deserialize, Serialize, Setters)]
#[getset(set = "pub")]
#[serde(default)]
pub struct FitOptions {
    pub epochs : u32,
    pub batch_size : usize,
    pub validation_fraction : f64
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions { epochs : 50, batch_size : 32, validation_fraction : 0.1 }
    }
}

#[derive(Debug, PartialEq, Clone, Deserialize, Serialize, Setters)]
#[getset(set = "pub")]
#[serde(default)]
pub struct TrainingOptions {
    pub window_length : usize,
    pub fit : FitOptions,
    pub retained_history : usize
}

impl Default for TrainingOptions {
    fn default() -> Self {
        TrainingOptions { window_length : DEFAULT_WINDOW_LENGTH, fit : FitOptions::default(),
            retained_history : DEFAULT_RETAINED_HISTORY }
    }
}

/// How a multi-day horizon is produced from a one-step model.
#[derive(Debug, PartialEq, Eq, Clone, Copy, EnumString, Display, Deserialize, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ForecastMode {
    /// Predict once from the latest window and repeat that value over the whole horizon.
    Repeated,
    /// Feed every prediction back into the window to produce the next step.
    Autoregressive
}

impl Default for ForecastMode {
    fn default() -> Self {
        ForecastMode::Repeated
    }
}

#[derive(Debug, PartialEq, Clone, Deserialize, Serialize, Setters)]
#[getset(set = "pub")]
#[serde(default)]
pub struct ForecastConfig {
    pub training : TrainingOptions,
    pub learning_rate : f64,
    pub seed : Option<i64>,
    pub forecast_mode : ForecastMode,
    pub models_dir : PathBuf,
    pub data_dir : PathBuf
}

impl Default for ForecastConfig {
    fn default() -> Self {
        ForecastConfig {
            training : TrainingOptions::default(),
            learning_rate : 1e-3,
            seed : None,
            forecast_mode : ForecastMode::default(),
            models_dir : PathBuf::from("models/pretrained"),
            data_dir : PathBuf::from("data")
        }
    }
}

impl ForecastConfig {
    pub fn from_file(path : &Path) -> anyhow::Result<ForecastConfig> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Could not open config file {}", path.display()))?;
        let config = ::serde_json::from_reader(&file)
            .with_context(|| format!("Could not parse config file {}", path.display()))?;
        Ok(config)
    }
}
