use polars::error::PolarsError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ImputeError>;

/// Error taxonomy for the imputation core. Everything except `DataLoad` and
/// `Commit` is local to one partition cycle and is caught by the batch loop.
#[derive(Debug, Error)]
pub enum ImputeError {
    #[error("data loading error: {0}")]
    DataLoad(String),

    #[error("unrecognized model kind: {0}")]
    ModelInit(String),

    #[error("model fit error: {0}")]
    Fit(String),

    #[error("prediction produced no output: {unresolved} of {requested} rows have unusable predictors")]
    Prediction { requested: usize, unresolved: usize },

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("commit rejected: {0}")]
    Commit(String),
}

impl From<PolarsError> for ImputeError {
    fn from(err: PolarsError) -> Self {
        Self::DataLoad(err.to_string())
    }
}
