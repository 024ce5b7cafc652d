use chrono::{Duration, NaiveDate};
use serde::Serialize;
use strum::Display;
use tracing::info;

use crate::commands::train_model::try_train_model;
use crate::config::{ForecastMode, TrainingOptions};
use crate::error::{ForecastError, Result};
use crate::forecast_model::*;
use crate::insights::{self, InsightBundle};
use crate::model_store::*;
use crate::price_series::*;

const HIGH_CONFIDENCE_MAX_VOLATILITY : f64 = 10.0;
pub const MAX_HORIZON_DAYS : u32 = 365;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium
}

impl Confidence {
    pub fn from_volatility(volatility : f64) -> Confidence {
        if volatility < HIGH_CONFIDENCE_MAX_VOLATILITY { Confidence::High } else { Confidence::Medium }
    }
}

#[derive(Debug, PartialEq, Clone, Copy, Serialize)]
pub struct ForecastPoint {
    pub date : NaiveDate,
    pub price : f64
}

#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct ForecastResult {
    pub commodity : String,
    pub horizon_days : u32,
    pub points : Vec<ForecastPoint>
}

#[derive(Debug, PartialEq, Clone, Serialize)]
pub struct ForecastReport {
    pub forecast : ForecastResult,
    pub insights : InsightBundle,
    pub confidence : Confidence,
    pub mode : ForecastMode
}

fn single_prediction<M : ForecastModel + ?Sized>(model : &M, window : &[f64]) -> Result<f64> {
    model.predict(&[window.to_vec()])?
        .first()
        .copied()
        .ok_or_else(|| ForecastError::Numerical(String::from("Model returned no prediction")))
}

fn project<M : ForecastModel + ?Sized>(model : &M, window : Vec<f64>, horizon_days : u32, mode : ForecastMode) -> Result<Vec<f64>> {
    match mode {
        ForecastMode::Repeated => {
            let next = single_prediction(model, &window)?;
            Ok(vec!(next; horizon_days as usize))
        },
        ForecastMode::Autoregressive => {
            let mut window = window;
            let mut predictions = Vec::with_capacity(horizon_days as usize);
            for _ in 0..horizon_days {
                let next = single_prediction(model, &window)?;
                predictions.push(next);
                window.remove(0);
                window.push(next);
            }
            Ok(predictions)
        }
    }
}

/// Forecasts `horizon_days` daily prices for `key`.
///
/// A stored model is preferred; without one, a model is trained from `history` and stored.
/// The latest window and the insights come from `history` when given, otherwise from the
/// observations saved with the model.
pub fn forecast<M : ForecastModel + ?Sized>(model : &mut M,
                store : &ModelStore,
                key : &str,
                horizon_days : u32,
                history : Option<&PriceSeries>,
                mode : ForecastMode,
                options : &TrainingOptions,
                extra_training_params : &M::TrainingParams) -> Result<ForecastReport> {
    if horizon_days == 0 || horizon_days > MAX_HORIZON_DAYS {
        return Err(ForecastError::InvalidArgument(
            format!("Forecast horizon must be between 1 and {} days, was {}", MAX_HORIZON_DAYS, horizon_days)));
    }

    let metadata = match store.load(key, model) {
        Ok(metadata) => metadata,
        Err(ForecastError::ModelNotFound(missing)) => match history {
            Some(series) => {
                info!(key = %key, "No stored model, training from {} observations", series.len());
                try_train_model(model, store, key, series, options, extra_training_params)?
            },
            None => return Err(ForecastError::ModelNotFound(missing))
        },
        Err(error) => return Err(error)
    };

    let (values, last_date) = match history {
        Some(series) => (series.values(), series.last_date().unwrap_or(metadata.last_date)),
        None => (metadata.recent_history.clone(), metadata.last_date)
    };

    let window_length = metadata.window_length;
    if values.len() < window_length {
        return Err(ForecastError::InsufficientData { required : window_length, actual : values.len() });
    }
    let window = metadata.scaler.transform_all(&values[values.len() - window_length..]);

    let scaled = project(model, window, horizon_days, mode)?;
    let prices = metadata.scaler.inverse_transform_all(&scaled);
    if let Some(bad) = prices.iter().find(|p| !p.is_finite()) {
        return Err(ForecastError::Numerical(format!("Forecast for '{}' produced non-finite price {}", key, bad)));
    }

    let points = prices.into_iter().enumerate()
        .map(|(i, price)| ForecastPoint { date : last_date + Duration::days(i as i64 + 1), price })
        .collect();

    let insights = insights::analyze(&values)?;
    let confidence = Confidence::from_volatility(insights.volatility);
    info!(key = %key, horizon_days, %mode, %confidence, "Generated forecast");

    Ok(ForecastReport {
        forecast : ForecastResult { commodity : metadata.commodity, horizon_days, points },
        insights,
        confidence,
        mode
    })
}
