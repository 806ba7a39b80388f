// src/utils/config.rs
//! Engine configuration
//!
//! Values are layered from an optional file (TOML, YAML or JSON, picked by
//! extension) and `MULTIRESET__SECTION__KEY` environment overrides, then
//! validated once at startup. A configuration error is fatal.

use crate::instance::InstanceTimings;
use crate::scheduler::admission::ConcurrencyLimits;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "multireset";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "MULTIRESET";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dry-run mode: no scripts, no sockets, simulated worldgen and pids
    pub test_mode: bool,

    pub instances: InstancesConfig,

    pub scheduler: SchedulerConfig,

    pub automation: AutomationConfig,

    pub worldgen: WorldgenConfig,

    pub display: DisplayConfig,

    pub discovery: DiscoveryConfig,

    pub observability: ObservabilityConfig,
}

/// Which instances exist and where they live on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstancesConfig {
    /// Number of managed instances (required, fixed for the run)
    pub count: u32,

    /// Instance name prefix; instance 3 of "Speedrun" is "Speedrun3"
    pub base_name: String,

    /// Directory holding one sub-directory per instance
    pub root_dir: PathBuf,
}

impl Default for InstancesConfig {
    fn default() -> Self {
        Self {
            count: 0,
            base_name: "Instance".to_string(),
            root_dir: PathBuf::new(),
        }
    }
}

/// Control-loop policy and timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub limits: ConcurrencyLimits,

    /// Order candidates by per-state entry priority instead of instance number
    pub use_prioritization: bool,

    /// Give booted instances GEN slots before PREGEN instances
    pub prioritize_booting: bool,

    /// Boot every DEAD instance without waiting for an operator request
    pub auto_launch: bool,

    /// Pause the game once worldgen completes
    pub auto_pause: bool,

    /// Toggle fullscreen on the new primary instance
    pub fullscreen: bool,

    pub tick_interval_ms: u64,

    pub boot_delay_ms: u64,

    pub freeze_delay_ms: u64,

    pub unfreeze_delay_ms: u64,

    pub auto_reset_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            limits: ConcurrencyLimits::default(),
            use_prioritization: true,
            prioritize_booting: false,
            auto_launch: true,
            auto_pause: true,
            fullscreen: false,
            tick_interval_ms: 50,
            boot_delay_ms: 8_000,
            freeze_delay_ms: 2_000,
            unfreeze_delay_ms: 500,
            auto_reset_secs: 300,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn timings(&self) -> InstanceTimings {
        InstanceTimings {
            boot_delay: Duration::from_millis(self.boot_delay_ms),
            freeze_delay: Duration::from_millis(self.freeze_delay_ms),
            unfreeze_delay: Duration::from_millis(self.unfreeze_delay_ms),
            auto_reset: Duration::from_secs(self.auto_reset_secs),
        }
    }
}

/// Input-automation scripts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub enabled: bool,

    /// Deliver background commands without waiting for completion
    pub parallelize: bool,

    /// Directory containing one script per command
    pub script_dir: PathBuf,

    /// Program used to run scripts; scripts are executed directly when unset
    pub interpreter: Option<String>,

    /// Script file extension, appended to the command's script name
    pub script_extension: String,

    /// Suspend and resume with SIGSTOP/SIGCONT instead of scripts
    pub native_suspend: bool,

    /// Window title; `{num}` and `{name}` are substituted
    pub title_template: String,

    pub command_timeout_ms: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            parallelize: true,
            script_dir: PathBuf::from("scripts"),
            interpreter: None,
            script_extension: "sh".to_string(),
            native_suspend: true,
            title_template: "Minecraft* - Instance {num}".to_string(),
            command_timeout_ms: 10_000,
        }
    }
}

impl AutomationConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// World-generation detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldgenConfig {
    /// How many trailing log lines are inspected
    pub lines_from_bottom: usize,

    /// Substrings that must all appear on one log line
    pub markers: Vec<String>,

    /// Worldgen duration in test mode
    pub simulated_secs: f64,

    /// Where old save folders are moved on reset; disabled when unset
    pub archive_dir: Option<PathBuf>,
}

impl Default for WorldgenConfig {
    fn default() -> Self {
        Self {
            lines_from_bottom: 2,
            markers: vec![
                "Saving chunks for level 'ServerLevel".to_string(),
                "minecraft:the_end".to_string(),
            ],
            simulated_secs: 5.0,
            archive_dir: None,
        }
    }
}

/// Streaming overlay control socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub primary_prefix: String,
    pub focused_prefix: String,
    pub timeout_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 4444,
            password: None,
            primary_prefix: "active".to_string(),
            focused_prefix: "focused".to_string(),
            timeout_ms: 1_000,
        }
    }
}

impl DisplayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Process-id discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Fragment matched (case-insensitively) against process names
    pub process_name: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            process_name: "java".to_string(),
        }
    }
}

/// Logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when `RUST_LOG` is unset
    pub log_level: String,

    pub json_logs: bool,

    /// Prometheus scrape endpoint; metrics export is off when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_addr: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `path` (or `multireset.*` in the working
    /// directory when `None`) plus environment overrides, then validate it
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_source = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.instances.count == 0 {
            return Err(EngineError::Config(
                "instances.count must be set to at least 1".to_string(),
            ));
        }

        if self.instances.base_name.is_empty() {
            return Err(EngineError::Config(
                "instances.base_name cannot be empty".to_string(),
            ));
        }

        if !self.test_mode && self.instances.root_dir.as_os_str().is_empty() {
            return Err(EngineError::Config(
                "instances.root_dir is required outside test mode".to_string(),
            ));
        }

        self.scheduler
            .limits
            .validate()
            .map_err(EngineError::Config)?;

        if self.scheduler.tick_interval_ms == 0 {
            return Err(EngineError::Config(
                "scheduler.tick_interval_ms must be positive".to_string(),
            ));
        }

        if self.worldgen.lines_from_bottom == 0 {
            return Err(EngineError::Config(
                "worldgen.lines_from_bottom must be positive".to_string(),
            ));
        }

        if self.worldgen.markers.is_empty() {
            return Err(EngineError::Config(
                "worldgen.markers cannot be empty".to_string(),
            ));
        }

        if !self.worldgen.simulated_secs.is_finite() || self.worldgen.simulated_secs < 0.0 {
            return Err(EngineError::Config(
                "worldgen.simulated_secs must be a non-negative number".to_string(),
            ));
        }

        Ok(())
    }
}
