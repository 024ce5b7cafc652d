use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Insufficient data: need at least {required} observations, got {actual}")]
    InsufficientData { required : usize, actual : usize },

    #[error("Insufficient history for {metric}: need at least {required} observations, got {actual}")]
    InsufficientHistory { metric : &'static str, required : usize, actual : usize },

    #[error("Model has not been trained yet")]
    ModelNotTrained,

    #[error("No trained model found for '{0}'")]
    ModelNotFound(String),

    #[error("Persistence failure for '{key}': {source}")]
    Persistence {
        key : String,
        #[source]
        source : anyhow::Error
    },

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Model and scaler artifacts for '{key}' do not match: {reason}")]
    ArtifactMismatch { key : String, reason : String },

    #[error("Invalid series: {0}")]
    InvalidSeries(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Model backend failure: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl ForecastError {
    pub(crate) fn persistence(key : &str, source : impl Into<anyhow::Error>) -> Self {
        ForecastError::Persistence { key : String::from(key), source : source.into() }
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;
