pub mod network;
pub mod config;
pub mod error;
pub mod utils;
pub mod worker;

pub use error::{GeoTraceError, Result};
pub use config::Config;
