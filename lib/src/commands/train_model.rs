use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::TrainingOptions;
use crate::error::{ForecastError, Result};
use crate::forecast_model::*;
use crate::model_store::*;
use crate::price_series::*;
use crate::sequence;
use crate::storage::*;

/// Prepares windows from `series`, fits a freshly built model and persists it under `key`.
pub fn try_train_model<M : ForecastModel + ?Sized>(model : &mut M,
                       store : &ModelStore,
                       key : &str,
                       series : &PriceSeries,
                       options : &TrainingOptions,
                       extra_training_params : &M::TrainingParams) -> Result<ModelMetadata> {
    let values = series.values();
    let (windows, scaler) = sequence::prepare(&values, options.window_length)?;

    model.build(options.window_length, 1)?;
    let report = model.fit(&windows, &options.fit, extra_training_params)?;
    if let Some(loss) = report.train_loss.iter().find(|l| !l.is_finite()) {
        return Err(ForecastError::Numerical(format!("Training for '{}' diverged with loss {}", key, loss)));
    }

    let last_date = series.last_date()
        .ok_or(ForecastError::InsufficientData { required : options.window_length + 1, actual : 0 })?;
    let retained = series.tail(options.retained_history.max(options.window_length));
    let metadata = ModelMetadata {
        commodity : series.key().commodity.clone(),
        window_length : options.window_length,
        n_features : 1,
        scaler,
        last_date,
        recent_history : retained.values(),
        trained_at : Utc::now(),
        model_checksum : String::new()
    };

    let saved = store.save(key, model, &metadata)?;
    info!(key = %key, windows = windows.len(), final_loss = ?report.final_train_loss(),
        "Trained model on {} observations", values.len());
    Ok(saved)
}

/// Same as `try_train_model`, but any failure is logged and reported as `false`.
pub fn train_model<M : ForecastModel + ?Sized>(model : &mut M,
                   store : &ModelStore,
                   key : &str,
                   series : &PriceSeries,
                   options : &TrainingOptions,
                   extra_training_params : &M::TrainingParams) -> bool {
    match try_train_model(model, store, key, series, options, extra_training_params) {
        Ok(_) => true,
        Err(error) => {
            warn!(key = %key, observations = series.len(), "Failed to train model: {}", error);
            false
        }
    }
}

/// Trains one model per dataset; a failing dataset does not stop the others.
pub fn train_models<M, F>(mut make_model : F,
                          store : &ModelStore,
                          datasets : &[(String, PriceSeries)],
                          options : &TrainingOptions,
                          extra_training_params : &M::TrainingParams) -> BTreeMap<String, bool>
    where M : ForecastModel, F : FnMut() -> M {
    let mut results = BTreeMap::new();
    for (key, series) in datasets {
        info!(key = %key, "Training model");
        let mut model = make_model();
        let success = train_model(&mut model, store, key, series, options, extra_training_params);
        results.insert(key.clone(), success);
    }
    results
}

/// Loads each series from `storage` and trains it under its storage name.
pub fn train_from_storage<M, F>(make_model : F,
                                storage : &mut impl Storage,
                                store : &ModelStore,
                                keys : &[SeriesKey],
                                options : &TrainingOptions,
                                extra_training_params : &M::TrainingParams) -> BTreeMap<String, bool>
    where M : ForecastModel, F : FnMut() -> M {
    let mut results = BTreeMap::new();
    let mut datasets = Vec::new();
    for key in keys {
        match storage.load_price_history(key) {
            Ok(series) => datasets.push((key.storage_name(), series)),
            Err(error) => {
                warn!(key = %key, "Failed to load price history: {:#}", error);
                results.insert(key.storage_name(), false);
            }
        }
    }

    results.extend(train_models(make_model, store, &datasets, options, extra_training_params));
    results
}
