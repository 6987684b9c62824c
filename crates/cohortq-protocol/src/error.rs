use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid quota: {0}")]
    InvalidQuota(String),

    #[error("Invalid fair-share weight: {0}")]
    InvalidWeight(f64),

    #[error("Negative quantity: {0}")]
    NegativeQuantity(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
