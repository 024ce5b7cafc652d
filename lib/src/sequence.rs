use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};

pub const DEFAULT_WINDOW_LENGTH : usize = 30;

/// Min-max transform between raw prices and the [0, 1] range the model is trained on.
#[derive(Debug, PartialEq, Clone, Copy, Deserialize, Serialize)]
pub struct MinMaxScaler {
    min : f64,
    max : f64
}

impl MinMaxScaler {
    pub fn fit(values : &[f64]) -> Result<MinMaxScaler> {
        if values.is_empty() {
            return Err(ForecastError::InsufficientData { required : 1, actual : 0 });
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(ForecastError::Numerical(format!("Cannot fit scaler on non-finite value {}", bad)));
        }

        let (min, max) = find_value_range(values);
        Ok(MinMaxScaler { min, max })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    // A constant series has no range; treat it as unit range so the inverse stays exact.
    fn range(&self) -> f64 {
        let range = self.max - self.min;
        if range == 0.0 { 1.0 } else { range }
    }

    pub fn transform(&self, value : f64) -> f64 {
        (value - self.min) / self.range()
    }

    pub fn inverse_transform(&self, scaled : f64) -> f64 {
        scaled * self.range() + self.min
    }

    pub fn transform_all(&self, values : &[f64]) -> Vec<f64> {
        values.iter().map(|&v| self.transform(v)).collect()
    }

    pub fn inverse_transform_all(&self, scaled : &[f64]) -> Vec<f64> {
        scaled.iter().map(|&v| self.inverse_transform(v)).collect()
    }
}

/// Overlapping model inputs over a scaled series, each labelled with the value that follows it.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Windows {
    pub inputs : Vec<Vec<f64>>,
    pub labels : Vec<f64>
}

impl Windows {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn window_length(&self) -> usize {
        self.inputs.first().map(|w| w.len()).unwrap_or(0)
    }
}

pub fn find_value_range(values : &[f64]) -> (f64, f64) {
    let mut min_value = f64::INFINITY;
    let mut max_value = f64::NEG_INFINITY;
    for &v in values {
        min_value = min_value.min(v);
        max_value = max_value.max(v);
    }

    (min_value, max_value)
}

/// Scales `values` over their full range and cuts them into `len - window_length` windows.
pub fn prepare(values : &[f64], window_length : usize) -> Result<(Windows, MinMaxScaler)> {
    if window_length == 0 {
        return Err(ForecastError::InvalidArgument(String::from("Window length must be greater than zero")));
    }
    if values.len() <= window_length {
        return Err(ForecastError::InsufficientData { required : window_length + 1, actual : values.len() });
    }

    let scaler = MinMaxScaler::fit(values)?;
    let scaled = scaler.transform_all(values);

    let window_count = scaled.len() - window_length;
    let mut windows = Windows {
        inputs : Vec::with_capacity(window_count),
        labels : Vec::with_capacity(window_count)
    };
    for i in 0..window_count {
        let input_end = i + window_length;
        windows.inputs.push(Vec::from(&scaled[i..input_end]));
        windows.labels.push(scaled[input_end]);
    }

    Ok((windows, scaler))
}

/// Holds out the trailing `validation_fraction` of the windows, preserving chronological order.
pub fn split_chronological(windows : &Windows, validation_fraction : f64) -> Result<(Windows, Windows)> {
    if !(0.0..1.0).contains(&validation_fraction) {
        return Err(ForecastError::InvalidArgument(
            format!("Validation fraction must be in [0, 1), was {}", validation_fraction)));
    }

    let split_at = (windows.len() as f64 * (1.0 - validation_fraction)).floor() as usize;
    if split_at == 0 {
        return Err(ForecastError::InsufficientData { required : 1, actual : 0 });
    }

    let train = Windows {
        inputs : windows.inputs[..split_at].to_vec(),
        labels : windows.labels[..split_at].to_vec()
    };
    let validation = Windows {
        inputs : windows.inputs[split_at..].to_vec(),
        labels : windows.labels[split_at..].to_vec()
    };
    Ok((train, validation))
}
