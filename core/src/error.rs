use thiserror::Error;

use crate::network::address::MalformedAddressError;

#[derive(Error, Debug)]
pub enum GeoTraceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration format error: {0}")]
    ConfigFormat(#[from] serde_json::Error),

    #[error("Failed to open capture: {0}")]
    CaptureOpen(String),

    #[error("Failed to read capture: {0}")]
    CaptureRead(String),

    #[error("Failed to open geolocation database: {0}")]
    DatabaseOpen(String),

    #[error(transparent)]
    MalformedAddress(#[from] MalformedAddressError),

    #[error("Analysis worker error: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, GeoTraceError>;
