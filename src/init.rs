//! Initialization for embedders
//!
//! Loads configuration and installs the tracing subscriber once per
//! process. Call before creating a scheduler; later calls are no-ops.
//!
//! # Example
//!
//! ```rust,no_run
//! use tempo_core::init::InitBuilder;
//!
//! # fn main() -> anyhow::Result<()> {
//! InitBuilder::new().config_path("tempo.toml").realtime(true).init()?;
//! let config = tempo_core::init::get_config();
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::{ClockMode, Config};

static INIT_STATE: OnceLock<InitState> = OnceLock::new();

#[derive(Debug)]
struct InitState {
    config: Config,
}

/// Options for initializing the runtime
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Config file path (overrides default search)
    pub config_path: Option<PathBuf>,

    /// Scheduler period in milliseconds
    pub period_ms: Option<u64>,

    /// Run against the wall clock instead of simulated time
    pub realtime: Option<bool>,

    /// Log filter used when RUST_LOG is unset
    pub log_level: Option<String>,

    /// Don't install a tracing subscriber (the embedder has its own)
    pub skip_logging: bool,
}

/// Builder for constructing InitOptions
#[derive(Default)]
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn period_ms(mut self, ms: u64) -> Self {
        self.options.period_ms = Some(ms);
        self
    }

    pub fn realtime(mut self, realtime: bool) -> Self {
        self.options.realtime = Some(realtime);
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.options.log_level = Some(level.into());
        self
    }

    pub fn skip_logging(mut self, skip: bool) -> Self {
        self.options.skip_logging = skip;
        self
    }

    pub fn init(self) -> Result<&'static Config> {
        initialize(self.options)
    }
}

/// Load configuration and set up logging
///
/// Calling this function multiple times is safe: subsequent calls return
/// the configuration of the first one.
pub fn initialize(options: InitOptions) -> Result<&'static Config> {
    if let Some(state) = INIT_STATE.get() {
        return Ok(&state.config);
    }

    let config = load_config(&options).context("Failed to load configuration")?;

    if !options.skip_logging {
        init_tracing(&config.logging.level)?;
    }
    tracing::debug!(
        period_ms = config.scheduler.period_ms,
        clock = %config.scheduler.clock,
        "initialized"
    );

    INIT_STATE
        .set(InitState { config })
        .map_err(|_| anyhow!("Initialization already completed"))?;
    Ok(get_config())
}

/// Resolve the configuration for `options` without touching global state
pub fn load_config(options: &InitOptions) -> Result<Config> {
    let clock = options.realtime.map(|realtime| {
        if realtime {
            ClockMode::Realtime
        } else {
            ClockMode::Simulated
        }
    });
    let config = Config::builder()
        .config_path(options.config_path.clone())
        .period_ms(options.period_ms)
        .clock(clock)
        .log_level(options.log_level.clone())
        .build()?;
    Ok(config)
}

fn init_tracing(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .with_context(|| format!("Invalid log level '{}'", default_level))?;

    // Another subscriber may already be installed (tests, embedders)
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}

pub fn is_initialized() -> bool {
    INIT_STATE.get().is_some()
}

/// Configuration loaded by [`initialize`], or the defaults if it never ran
pub fn get_config() -> &'static Config {
    static DEFAULT: OnceLock<Config> = OnceLock::new();
    match INIT_STATE.get() {
        Some(state) => &state.config,
        None => DEFAULT.get_or_init(Config::default),
    }
}
