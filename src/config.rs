//! Configuration management for Tempo
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags (--realtime, --period-ms, etc.)
//! 2. Environment variables (TEMPO_SCHEDULER_PERIOD_MS, etc.)
//! 3. Config file (tempo.toml in the working directory or ~/.config/tempo/config.toml)
//! 4. Built-in defaults
//!
//! # Example Config File (tempo.toml)
//!
//! ```toml
//! [scheduler]
//! period_ms = 20
//! clock = "simulated"
//! max_stack_depth = 10000
//! max_passes_per_cycle = 1000
//!
//! [logging]
//! level = "info"
//! ```
//!
//! # Environment Variables
//!
//! - TEMPO_CONFIG_PATH
//! - TEMPO_SCHEDULER_PERIOD_MS
//! - TEMPO_SCHEDULER_CLOCK
//! - TEMPO_SCHEDULER_MAX_STACK_DEPTH
//! - TEMPO_SCHEDULER_MAX_PASSES_PER_CYCLE
//! - TEMPO_LOG_LEVEL

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Who moves the scheduler clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    /// The scheduler advances time itself; runs are deterministic
    #[default]
    Simulated,
    /// The host sets time from the wall clock
    Realtime,
}

impl FromStr for ClockMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simulated" => Ok(ClockMode::Simulated),
            "realtime" => Ok(ClockMode::Realtime),
            _ => Err(ConfigError::InvalidValue {
                key: "scheduler.clock".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ClockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockMode::Simulated => write!(f, "simulated"),
            ClockMode::Realtime => write!(f, "realtime"),
        }
    }
}

/// Scheduler tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Length of one cycle in milliseconds
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    #[serde(default)]
    pub clock: ClockMode,

    /// Frames per job before the run is aborted
    #[serde(default = "default_max_stack_depth")]
    pub max_stack_depth: usize,

    /// Passes over the ready set per cycle before the rest is deferred
    #[serde(default = "default_max_passes_per_cycle")]
    pub max_passes_per_cycle: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions for serde
fn default_period_ms() -> u64 {
    20
}
fn default_max_stack_depth() -> usize {
    10_000
}
fn default_max_passes_per_cycle() -> usize {
    1_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            clock: ClockMode::default(),
            max_stack_depth: default_max_stack_depth(),
            max_passes_per_cycle: default_max_passes_per_cycle(),
        }
    }
}

impl SchedulerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with full priority chain:
    /// CLI flags → env vars → config file → defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::builder().build()
    }

    /// Load configuration from a specific file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&config_str)?)
    }

    /// Create a builder for constructing config with overrides
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Render as TOML (for `tempo config`)
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_else(|e| format!("# unrenderable config: {}", e))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.period_ms == 0 {
            return Err(invalid("scheduler.period_ms", "0"));
        }
        if self.scheduler.max_stack_depth == 0 {
            return Err(invalid("scheduler.max_stack_depth", "0"));
        }
        if self.scheduler.max_passes_per_cycle == 0 {
            return Err(invalid("scheduler.max_passes_per_cycle", "0"));
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Builder for constructing Config with optional overrides
#[derive(Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    period_ms: Option<u64>,
    clock: Option<ClockMode>,
    max_stack_depth: Option<usize>,
    max_passes_per_cycle: Option<usize>,
    log_level: Option<String>,
    skip_env: bool,
}

impl ConfigBuilder {
    /// Override the config file path
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn period_ms(mut self, period_ms: Option<u64>) -> Self {
        self.period_ms = period_ms;
        self
    }

    pub fn clock(mut self, clock: Option<ClockMode>) -> Self {
        self.clock = clock;
        self
    }

    pub fn max_stack_depth(mut self, depth: Option<usize>) -> Self {
        self.max_stack_depth = depth;
        self
    }

    pub fn max_passes_per_cycle(mut self, passes: Option<usize>) -> Self {
        self.max_passes_per_cycle = passes;
        self
    }

    pub fn log_level(mut self, level: Option<String>) -> Self {
        self.log_level = level;
        self
    }

    /// Ignore TEMPO_* environment variables and .env
    pub fn skip_env(mut self, skip: bool) -> Self {
        self.skip_env = skip;
        self
    }

    /// Build the final config by applying priority chain
    pub fn build(self) -> Result<Config, ConfigError> {
        if !self.skip_env {
            // Load .env first so real environment variables override it
            let _ = dotenvy::dotenv();
        }

        // Step 1: Start with defaults
        let mut config = Config::default();

        // Step 2: Try to load from config file
        if let Some(file_config) = self.load_from_file()? {
            config = file_config;
        }

        // Step 3: Overlay environment variables
        if !self.skip_env {
            self.apply_env_vars(&mut config)?;
        }

        // Step 4: Apply CLI overrides (highest priority)
        self.apply_overrides(&mut config);

        config.validate()?;
        Ok(config)
    }

    /// Try to load config from file (searches default locations if no path specified)
    fn load_from_file(&self) -> Result<Option<Config>, ConfigError> {
        let config_path = if let Some(path) = &self.config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.clone()));
            }
            Some(path.clone())
        } else if let (false, Ok(path_str)) = (self.skip_env, env::var("TEMPO_CONFIG_PATH")) {
            let path = PathBuf::from(path_str);
            if !path.exists() {
                return Err(ConfigError::NotFound(path));
            }
            Some(path)
        } else if self.skip_env {
            None
        } else {
            find_config_file()
        };

        match config_path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading config file");
                Ok(Some(Config::from_file(&path)?))
            }
            None => Ok(None),
        }
    }

    /// Apply environment variables to config
    fn apply_env_vars(&self, config: &mut Config) -> Result<(), ConfigError> {
        if let Some(period) = env_parse("TEMPO_SCHEDULER_PERIOD_MS")? {
            config.scheduler.period_ms = period;
        }
        if let Ok(clock) = env::var("TEMPO_SCHEDULER_CLOCK") {
            config.scheduler.clock = clock.parse()?;
        }
        if let Some(depth) = env_parse("TEMPO_SCHEDULER_MAX_STACK_DEPTH")? {
            config.scheduler.max_stack_depth = depth;
        }
        if let Some(passes) = env_parse("TEMPO_SCHEDULER_MAX_PASSES_PER_CYCLE")? {
            config.scheduler.max_passes_per_cycle = passes;
        }
        if let Ok(level) = env::var("TEMPO_LOG_LEVEL") {
            config.logging.level = level;
        }
        Ok(())
    }

    /// Apply CLI overrides (highest priority)
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(period) = self.period_ms {
            config.scheduler.period_ms = period;
        }
        if let Some(clock) = self.clock {
            config.scheduler.clock = clock;
        }
        if let Some(depth) = self.max_stack_depth {
            config.scheduler.max_stack_depth = depth;
        }
        if let Some(passes) = self.max_passes_per_cycle {
            config.scheduler.max_passes_per_cycle = passes;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

/// Search for config file in default locations
fn find_config_file() -> Option<PathBuf> {
    // 1. Working directory: ./tempo.toml
    let project_config = PathBuf::from("tempo.toml");
    if project_config.exists() {
        return Some(project_config);
    }

    // 2. User config: ~/.config/tempo/config.toml
    let home = env::var_os("HOME")?;
    let user_config = PathBuf::from(home)
        .join(".config")
        .join("tempo")
        .join("config.toml");
    user_config.exists().then_some(user_config)
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
        Err(_) => Ok(None),
    }
}
