use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::shutdown::{BlockingShutdown, PollingShutdown, WorkerShutdownPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read print pipeline config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse print pipeline config: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
    },
}

/// How a finishing job waits for its worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicyKind {
    Blocking,
    Polling,
}

impl Default for ShutdownPolicyKind {
    fn default() -> Self {
        if cfg!(windows) {
            ShutdownPolicyKind::Polling
        } else {
            ShutdownPolicyKind::Blocking
        }
    }
}

/// Timing knobs of the print pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Delay before the worker re-checks for a page that is not rendered yet.
    #[serde(default = "default_page_poll_interval_ms")]
    pub page_poll_interval_ms: u64,
    /// Upper bound for flushing each job during manager shutdown.
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
    /// Upper bound for waiting on missing pages before releasing a job.
    #[serde(default = "default_render_pages_timeout_ms")]
    pub render_pages_timeout_ms: u64,
    #[serde(default = "default_shutdown_poll_interval_ms")]
    pub shutdown_poll_interval_ms: u64,
    #[serde(default)]
    pub shutdown_policy: ShutdownPolicyKind,
}

fn default_page_poll_interval_ms() -> u64 {
    500
}

fn default_flush_timeout_ms() -> u64 {
    120_000
}

fn default_render_pages_timeout_ms() -> u64 {
    60_000
}

fn default_shutdown_poll_interval_ms() -> u64 {
    100
}

const MAX_INTERVAL_MS: u64 = 10_000;
const MAX_TIMEOUT_MS: u64 = 600_000;

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            page_poll_interval_ms: default_page_poll_interval_ms(),
            flush_timeout_ms: default_flush_timeout_ms(),
            render_pages_timeout_ms: default_render_pages_timeout_ms(),
            shutdown_poll_interval_ms: default_shutdown_poll_interval_ms(),
            shutdown_policy: ShutdownPolicyKind::default(),
        }
    }
}

impl PipelineConfig {
    /// Reads the config file; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(text) => Self::from_json_str(&text),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no print pipeline config, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let mut config: Self =
            serde_json::from_str(text).map_err(|source| ConfigError::Parse { source })?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        if self.page_poll_interval_ms == 0 {
            self.page_poll_interval_ms = default_page_poll_interval_ms();
        }
        if self.flush_timeout_ms == 0 {
            self.flush_timeout_ms = default_flush_timeout_ms();
        }
        if self.render_pages_timeout_ms == 0 {
            self.render_pages_timeout_ms = default_render_pages_timeout_ms();
        }
        if self.shutdown_poll_interval_ms == 0 {
            self.shutdown_poll_interval_ms = default_shutdown_poll_interval_ms();
        }
        self.page_poll_interval_ms = self.page_poll_interval_ms.min(MAX_INTERVAL_MS);
        self.shutdown_poll_interval_ms = self.shutdown_poll_interval_ms.min(MAX_INTERVAL_MS);
        self.flush_timeout_ms = self.flush_timeout_ms.min(MAX_TIMEOUT_MS);
        self.render_pages_timeout_ms = self.render_pages_timeout_ms.min(MAX_TIMEOUT_MS);
    }

    pub fn page_poll_interval(&self) -> Duration {
        Duration::from_millis(self.page_poll_interval_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn render_pages_timeout(&self) -> Duration {
        Duration::from_millis(self.render_pages_timeout_ms)
    }

    pub fn shutdown_poll_interval(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_interval_ms)
    }

    pub fn shutdown_policy(&self) -> Arc<dyn WorkerShutdownPolicy> {
        match self.shutdown_policy {
            ShutdownPolicyKind::Blocking => Arc::new(BlockingShutdown),
            ShutdownPolicyKind::Polling => Arc::new(PollingShutdown {
                interval: self.shutdown_poll_interval(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load(dir.path().join("printing.json")).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.page_poll_interval(), Duration::from_millis(500));
        assert_eq!(config.flush_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "page_poll_interval_ms": 20, "shutdown_policy": "polling" }}"#).unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.page_poll_interval_ms, 20);
        assert_eq!(config.shutdown_policy, ShutdownPolicyKind::Polling);
        assert_eq!(config.render_pages_timeout_ms, 60_000);
        assert!(format!("{:?}", config.shutdown_policy()).contains("PollingShutdown"));
    }

    #[test]
    fn sanitize_replaces_zero_and_clamps() {
        let config = PipelineConfig::from_json_str(
            r#"{ "page_poll_interval_ms": 0, "flush_timeout_ms": 99999999 }"#,
        )
        .unwrap();
        assert_eq!(config.page_poll_interval_ms, 500);
        assert_eq!(config.flush_timeout_ms, MAX_TIMEOUT_MS);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let err = PipelineConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let err = PipelineConfig::from_json_str(r#"{ "shutdown_policy": "eventually" }"#).unwrap_err();
        assert!(err.to_string().starts_with("failed to parse print pipeline config"));
    }
}
