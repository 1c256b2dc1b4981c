//! Runtime configuration.
//!
//! Every field has a default, so an empty or partial YAML document is valid.
//!
//! ```yaml
//! capture:
//!   frame_queue_capacity: 100
//!   read_buffer_size: 65536
//!   poll_timeout_ms: 500
//! correlation:
//!   slot_capacity: 1000
//! output:
//!   directory: "."
//!   link_file: "layer2.csv"
//!   network_file: "layer3.csv"
//!   transport_file: "layer4.csv"
//! stats:
//!   enabled: true
//!   interval_secs: 1
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::{LinkwatchError, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub capture: CaptureConfig,
    pub correlation: CorrelationConfig,
    pub output: OutputConfig,
    pub stats: StatsConfig,
}

/// Live capture settings, applied to both interfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Frames buffered between the reader thread and the consumer
    pub frame_queue_capacity: usize,
    /// Size of the reusable receive buffer in bytes
    pub read_buffer_size: usize,
    /// Upper bound on one blocking wait before the reader re-checks its stop signal
    pub poll_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { frame_queue_capacity: 100, read_buffer_size: 65536, poll_timeout_ms: 500 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorrelationConfig {
    /// Markers the physical path may queue ahead of the tunnel path
    pub slot_capacity: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self { slot_capacity: 1000 }
    }
}

/// CSV output locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub link_file: String,
    pub network_file: String,
    pub transport_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            link_file: "layer2.csv".to_string(),
            network_file: "layer3.csv".to_string(),
            transport_file: "layer4.csv".to_string(),
        }
    }
}

impl OutputConfig {
    pub fn link_path(&self) -> PathBuf {
        self.directory.join(&self.link_file)
    }

    pub fn network_path(&self) -> PathBuf {
        self.directory.join(&self.network_file)
    }

    pub fn transport_path(&self) -> PathBuf {
        self.directory.join(&self.transport_file)
    }
}

/// Periodic statistics report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatsConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { enabled: true, interval_secs: 1 }
    }
}

impl StatsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Config {
    /// Load and validate a YAML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LinkwatchError::file_error(path.to_path_buf(), e))?;

        debug!("Loaded configuration from {} ({} bytes)", path.display(), contents.len());
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        // An empty document deserializes as null rather than an empty mapping
        let config: Config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml_ng::from_str(yaml).map_err(|e| LinkwatchError::config(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall or break the pipeline.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.capture.frame_queue_capacity == 0, "capture.frame_queue_capacity"),
            (self.capture.read_buffer_size == 0, "capture.read_buffer_size"),
            (self.capture.poll_timeout_ms == 0, "capture.poll_timeout_ms"),
            (self.correlation.slot_capacity == 0, "correlation.slot_capacity"),
            (self.stats.interval_secs == 0, "stats.interval_secs"),
        ];

        if let Some((_, field)) = checks.iter().find(|(is_zero, _)| *is_zero) {
            return Err(LinkwatchError::config(format!("{field} must be greater than zero")));
        }

        let names = [
            ("output.link_file", &self.output.link_file),
            ("output.network_file", &self.output.network_file),
            ("output.transport_file", &self.output.transport_file),
        ];
        if let Some((field, _)) = names.iter().find(|(_, name)| name.trim().is_empty()) {
            return Err(LinkwatchError::config(format!("{field} must not be empty")));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_yaml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.capture.frame_queue_capacity, 100);
        assert_eq!(config.correlation.slot_capacity, 1000);
        assert_eq!(config.output.link_path(), PathBuf::from("./layer2.csv"));
        assert_eq!(config.stats.interval(), Duration::from_secs(1));
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let yaml = "correlation:\n  slot_capacity: 64\noutput:\n  directory: /var/log/linkwatch\n";
        let config = Config::from_yaml_str(yaml).unwrap();

        assert_eq!(config.correlation.slot_capacity, 64);
        assert_eq!(config.output.directory, PathBuf::from("/var/log/linkwatch"));
        assert_eq!(config.output.transport_file, "layer4.csv");
        assert_eq!(config.capture, CaptureConfig::default());
    }

    #[test]
    fn zero_values_are_rejected() {
        let err = Config::from_yaml_str("capture:\n  frame_queue_capacity: 0\n").unwrap_err();
        assert!(matches!(err, LinkwatchError::Config { .. }));
        assert!(err.to_string().contains("frame_queue_capacity"));

        let err = Config::from_yaml_str("stats:\n  interval_secs: 0\n").unwrap_err();
        assert!(err.to_string().contains("stats.interval_secs"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_yaml_str("capture:\n  snaplen: 96\n").unwrap_err();
        assert!(matches!(err, LinkwatchError::Config { .. }));
    }

    #[test]
    fn load_reports_missing_file_path() {
        let err = Config::load("/nonexistent/linkwatch.yaml").unwrap_err();
        match err {
            LinkwatchError::File { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/linkwatch.yaml"))
            }
            other => panic!("Expected File error, got {other:?}"),
        }
    }

    #[test]
    fn serializes_back_to_yaml() {
        let yaml = serde_yaml_ng::to_string(&Config::default()).unwrap();
        assert!(yaml.contains("slot_capacity: 1000"));
        assert_eq!(Config::from_yaml_str(&yaml).unwrap(), Config::default());
    }
}
