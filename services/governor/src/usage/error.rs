use thiserror::Error;

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("counter store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("counter {key} does not hold a number: {value}")]
    NotANumber { key: String, value: String },
    #[error("invalid usage metric: {0}")]
    InvalidMetric(String),
}
