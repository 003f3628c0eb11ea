use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::network::analysis::{OutputFormat, PipelineOptions};
use crate::network::filter::PrivateAddressFilter;
use crate::network::packet_capture::DEFAULT_BUFFER_SIZE;
use crate::{GeoTraceError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub analysis: AnalysisConfig,
    pub capture: CaptureConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub capture_path: Option<PathBuf>,
    pub geoip_database_path: Option<PathBuf>,
    pub output_format: OutputFormat,
    pub extra_private_ranges: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub buffer_size: usize,
    pub max_packets: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_packets: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Capture and database paths checked to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisInputs {
    pub capture_path: PathBuf,
    pub geoip_database_path: PathBuf,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn inputs(&self) -> Result<AnalysisInputs> {
        Ok(AnalysisInputs {
            capture_path: existing_path(self.analysis.capture_path.as_deref(), "capture file")?,
            geoip_database_path: existing_path(self.analysis.geoip_database_path.as_deref(), "GeoIP database")?,
        })
    }

    pub fn database_path(&self) -> Result<PathBuf> {
        existing_path(self.analysis.geoip_database_path.as_deref(), "GeoIP database")
    }

    pub fn private_filter(&self) -> Result<PrivateAddressFilter> {
        PrivateAddressFilter::with_extra_ranges(&self.analysis.extra_private_ranges)
    }

    pub fn pipeline_options(&self) -> Result<PipelineOptions> {
        Ok(PipelineOptions {
            format: self.analysis.output_format,
            max_packets: self.capture.max_packets,
            buffer_size: self.capture.buffer_size,
            filter: self.private_filter()?,
        })
    }
}

fn existing_path(path: Option<&Path>, what: &str) -> Result<PathBuf> {
    let path = path
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| GeoTraceError::Configuration(format!("No {} path provided", what)))?;
    if !path.exists() {
        return Err(GeoTraceError::Configuration(format!(
            "{} does not exist: {}",
            what,
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}
