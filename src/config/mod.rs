//! Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub metrics: MetricsConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Allow cross-origin requests from the UI
    pub enable_cors: bool,

    pub request_timeout_secs: u64,

    /// Largest accepted plan upload
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            enable_cors: true,
            request_timeout_secs: 30,
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

/// Load engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable
    pub jmeter_bin: PathBuf,

    /// Engine install root; `<home>/bin` is the report tool's working dir
    pub jmeter_home: Option<PathBuf>,

    /// Time between the graceful termination signal and a forced kill
    pub grace_period_secs: u64,

    /// Progress report interval requested from the engine
    pub summariser_interval_secs: u64,

    /// Raw output lines kept for diagnostics
    pub output_tail_lines: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            jmeter_bin: std::env::var_os("JMETER_BIN")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("jmeter")),
            jmeter_home: std::env::var_os("JMETER_HOME").map(PathBuf::from),
            grace_period_secs: 5,
            summariser_interval_secs: 1,
            output_tail_lines: 20,
        }
    }
}

impl EngineConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Working directory for the report tool, when an install root is known
    pub fn report_working_dir(&self) -> Option<PathBuf> {
        self.jmeter_home.as_ref().map(|home| home.join("bin"))
    }
}

/// Session storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for per-session directories
    pub sessions_dir: Option<PathBuf>,
}

/// Metrics retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Snapshots kept per session for charting
    pub history_window: usize,

    /// Default cap for the limited transaction view
    pub transactions_limit: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            history_window: 90,
            transactions_limit: 50,
        }
    }
}

impl Config {
    /// Load config from the default location, or return defaults if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, or return defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing config {}", path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("jmx-control")
            .join("config.toml")
    }

    /// Root directory for session work directories
    pub fn sessions_dir(&self) -> PathBuf {
        self.storage
            .sessions_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("jmx_controller_sessions"))
    }
}
