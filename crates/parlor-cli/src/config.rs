//! Configuration loading and management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use parlor_core::layout::{DEFAULT_MAX_SLOTS, DEFAULT_SLOTS_PER_SIDE, DEFAULT_TOTAL_SLOTS};
use parlor_core::{ConfigError, Layout, PulseConversion, SideSplit, SimulationConfig};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the measurement store.
    pub database_path: PathBuf,
    /// Base URL of the live relay, e.g. `http://parlor.local:3000`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_url: Option<String>,
    #[serde(default)]
    pub parlor: ParlorSettings,
    #[serde(default)]
    pub poll: PollSettings,
    #[serde(default)]
    pub push: PushSettings,
    #[serde(default)]
    pub simulation: SimulationSettings,
}

/// Physical layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParlorSettings {
    pub total_slots: u32,
    /// Stalls on each side. 0 splits the slots evenly instead.
    pub slots_per_side: u32,
    pub max_slots: u32,
}

impl Default for ParlorSettings {
    fn default() -> Self {
        Self {
            total_slots: DEFAULT_TOTAL_SLOTS,
            slots_per_side: DEFAULT_SLOTS_PER_SIDE,
            max_slots: DEFAULT_MAX_SLOTS,
        }
    }
}

impl ParlorSettings {
    pub fn layout(&self) -> Result<Layout, ConfigError> {
        let split = match self.slots_per_side {
            0 => SideSplit::Balanced,
            per_side => SideSplit::Fixed { per_side },
        };
        Layout::new(self.total_slots, self.max_slots, split)
    }
}

/// Poll-mode timing and calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_ms: u64,
    /// Upper bound on a single fetch.
    pub timeout_ms: u64,
    pub ml_per_pulse: f64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            timeout_ms: 5000,
            ml_per_pulse: PulseConversion::DEFAULT_ML_PER_PULSE,
        }
    }
}

impl PollSettings {
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn conversion(&self) -> Result<PulseConversion, ConfigError> {
        PulseConversion::new(self.ml_per_pulse)
    }
}

/// Push-mode connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushSettings {
    /// TCP address of the event stream. Stdin when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub reconnect_delay_ms: u64,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            address: None,
            reconnect_delay_ms: 2000,
        }
    }
}

impl PushSettings {
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Simulation model plus wall-clock pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Real time between ticks.
    pub interval_ms: u64,
    #[serde(flatten)]
    pub model: SimulationConfig,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            model: SimulationConfig::default(),
        }
    }
}

impl SimulationSettings {
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("measurements.db"),
            live_url: None,
            parlor: ParlorSettings::default(),
            poll: PollSettings::default(),
            push: PushSettings::default(),
            simulation: SimulationSettings::default(),
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // PARLOR_POLL__INTERVAL_MS -> poll.interval_ms
        figment = figment.merge(Env::prefixed("PARLOR_").split("__"));

        figment.extract()
    }

    /// Checks every section that feeds the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parlor.layout()?;
        self.poll.conversion()?;
        self.simulation.model.validate()?;
        for (field, value) in [
            ("poll.interval_ms", self.poll.interval_ms),
            ("poll.timeout_ms", self.poll.timeout_ms),
            ("simulation.interval_ms", self.simulation.interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::NotPositive { field, value: 0.0 });
            }
        }
        Ok(())
    }
}

/// Returns the platform-specific config directory for parlor.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("parlor"))
}

/// Returns the platform-specific data directory for parlor.
///
/// On Linux: `~/.local/share/parlor`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("parlor"))
}
