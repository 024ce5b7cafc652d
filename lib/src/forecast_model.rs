use std::path::Path;

use serde::Serialize;

use crate::config::FitOptions;
use crate::error::Result;
use crate::sequence::Windows;

#[cfg(test)]
use mockall::{automock};

pub const HIDDEN_UNITS : i64 = 50;
pub const DROPOUT_RATE : f64 = 0.2;

/// Per-epoch losses reported by `ForecastModel::fit`.
#[derive(Debug, PartialEq, Clone, Default, Serialize)]
pub struct FitReport {
    pub train_loss : Vec<f64>,
    pub validation_loss : Vec<Option<f64>>
}

impl FitReport {
    pub fn final_train_loss(&self) -> Option<f64> {
        self.train_loss.last().copied()
    }
}

/// One-step-ahead sequence regressor working on scaled values.
///
/// `build` must precede both `fit` and `load`; `predict` and `save` fail with
/// `ForecastError::ModelNotTrained` until the weights were fitted or loaded.
#[cfg_attr(test, automock(type TrainingParams = ();))]
pub trait ForecastModel {
    type TrainingParams;

    fn build(&mut self, window_length : usize, n_features : usize) -> Result<()>;
    fn fit(&mut self, windows : &Windows, options : &FitOptions,
           extra_params : &Self::TrainingParams) -> Result<FitReport>;
    fn predict(&self, inputs : &[Vec<f64>]) -> Result<Vec<f64>>;
    fn window_length(&self) -> Result<usize>;

    fn save(&self, path : &Path) -> Result<()>;
    fn load(&mut self, path : &Path) -> Result<()>;
}
