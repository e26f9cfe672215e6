//! Configuration management
//!
//! Handles loading configuration from files and environment variables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found")]
    NotFound,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Options consulted by the safety evaluator
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SafetyConfig {
    /// Refuse to execute unsafe verdicts at HIGH
    pub block_high_risk: bool,
    /// Refuse to execute unsafe verdicts at CRITICAL
    pub block_critical: bool,
    pub allow_sudo: bool,
    pub allow_destructive: bool,
    pub allow_network: bool,
    /// Maximum command length in characters
    pub max_command_length: usize,
    pub check_file_paths: bool,
    pub warn_on_wildcards: bool,
    pub compliance_mode: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            block_high_risk: true,
            block_critical: true,
            allow_sudo: false,
            allow_destructive: false,
            allow_network: true,
            max_command_length: 1000,
            check_file_paths: true,
            warn_on_wildcards: true,
            compliance_mode: false,
        }
    }
}

/// Partial safety settings layered over a base `SafetyConfig`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafetyOverrides {
    pub block_high_risk: Option<bool>,
    pub block_critical: Option<bool>,
    pub allow_sudo: Option<bool>,
    pub allow_destructive: Option<bool>,
    pub allow_network: Option<bool>,
    pub max_command_length: Option<usize>,
    pub check_file_paths: Option<bool>,
    pub warn_on_wildcards: Option<bool>,
    pub compliance_mode: Option<bool>,
}

impl SafetyConfig {
    /// Produce a new config with every `Some` override applied
    pub fn with_overrides(&self, overrides: &SafetyOverrides) -> SafetyConfig {
        SafetyConfig {
            block_high_risk: overrides.block_high_risk.unwrap_or(self.block_high_risk),
            block_critical: overrides.block_critical.unwrap_or(self.block_critical),
            allow_sudo: overrides.allow_sudo.unwrap_or(self.allow_sudo),
            allow_destructive: overrides.allow_destructive.unwrap_or(self.allow_destructive),
            allow_network: overrides.allow_network.unwrap_or(self.allow_network),
            max_command_length: overrides
                .max_command_length
                .unwrap_or(self.max_command_length),
            check_file_paths: overrides.check_file_paths.unwrap_or(self.check_file_paths),
            warn_on_wildcards: overrides.warn_on_wildcards.unwrap_or(self.warn_on_wildcards),
            compliance_mode: overrides.compliance_mode.unwrap_or(self.compliance_mode),
        }
    }
}

/// Limits applied by the execution engine
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Default timeout in seconds
    pub timeout_secs: u64,
    /// Byte ceiling for each captured stream
    pub max_output_bytes: usize,
    /// Shell used as `<shell> -c <command>`
    pub shell: String,
    /// Resource sampling interval in milliseconds
    pub sample_interval_ms: u64,
    /// Delay between SIGTERM and SIGKILL
    pub grace_period_secs: u64,
    /// Advisory memory ceiling, logged when exceeded
    pub max_memory_mb: u64,
    /// Advisory CPU ceiling, logged when exceeded
    pub max_cpu_percent: f32,
    /// Extra environment variables for every command
    pub env: BTreeMap<String, String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            max_output_bytes: 10 * 1024 * 1024, // 10MB
            shell: "/bin/bash".to_string(),
            sample_interval_ms: 500,
            grace_period_secs: 5,
            max_memory_mb: 1024,
            max_cpu_percent: 80.0,
            env: BTreeMap::new(),
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// The configured shell, or `/bin/sh` when it does not exist
    pub fn resolved_shell(&self) -> String {
        if cfg!(unix) && !Path::new(&self.shell).exists() {
            tracing::warn!(shell = %self.shell, "configured shell not found, using /bin/sh");
            return "/bin/sh".to_string();
        }
        self.shell.clone()
    }
}

/// Application configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Directory for rollback snapshots
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,

    /// Location of the denylist document
    #[serde(default)]
    pub denylist_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file and environment variables
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables (AISH_ALLOW_SUDO, etc.)
    /// 2. Config file (~/.config/aish/config.toml)
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::load_from_file() {
            Ok(config) => config,
            Err(ConfigError::NotFound) => Self::default(),
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration with a custom config path (for testing)
    pub fn load_with_path(config_path: Option<&PathBuf>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from the config file
    fn load_from_file() -> Result<Self, ConfigError> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            return Err(ConfigError::NotFound);
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Directory holding `config.toml` and `denylist.json`
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NotFound)?;
        Ok(config_dir.join("aish"))
    }

    /// Get the config file path
    fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Denylist location, configured or default
    pub fn denylist_path(&self) -> PathBuf {
        self.denylist_path.clone().unwrap_or_else(|| {
            Self::config_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("denylist.json")
        })
    }

    /// Backup directory, configured or default
    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("aish_backups"))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        let flag = |name: &str| std::env::var(name).ok().and_then(|v| parse_bool(&v));

        if let Some(val) = flag("AISH_ALLOW_SUDO") {
            self.safety.allow_sudo = val;
        }
        if let Some(val) = flag("AISH_ALLOW_DESTRUCTIVE") {
            self.safety.allow_destructive = val;
        }
        if let Some(val) = flag("AISH_ALLOW_NETWORK") {
            self.safety.allow_network = val;
        }
        if let Some(val) = flag("AISH_COMPLIANCE_MODE") {
            self.safety.compliance_mode = val;
        }
        if let Ok(timeout) = std::env::var("AISH_TIMEOUT_SECS") {
            if let Ok(val) = timeout.parse() {
                self.execution.timeout_secs = val;
            }
        }
        if let Ok(max_bytes) = std::env::var("AISH_MAX_OUTPUT_BYTES") {
            if let Ok(val) = max_bytes.parse() {
                self.execution.max_output_bytes = val;
            }
        }
        if let Ok(shell) = std::env::var("AISH_SHELL") {
            if !shell.trim().is_empty() {
                self.execution.shell = shell;
            }
        }
        if let Ok(dir) = std::env::var("AISH_BACKUP_DIR") {
            self.backup_dir = Some(PathBuf::from(dir));
        }
        if let Ok(path) = std::env::var("AISH_DENYLIST") {
            self.denylist_path = Some(PathBuf::from(path));
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
