//! Configuration loading using Figment.
//!
//! Two documents are read from TOML:
//!
//! - [`AppConfig`]: how the process runs (logging, stage geometry, capture mode, storage,
//!   controller queue). Loaded from a file merged with `XYZ_TANK_` environment variables;
//!   every field has a default, so a missing file yields a usable configuration.
//! - [`ScanSettings`]: what to measure (tank, plan, hydrophone, transducer).
//!
//! # Example
//! ```no_run
//! use xyz_tank::config::AppConfig;
//!
//! let config = AppConfig::load_from("config/xyz_tank.toml")?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), xyz_tank::error::TankError>(())
//! ```
//!
//! Nested keys are separated by a double underscore in the environment, e.g.
//! `XYZ_TANK_APPLICATION__LOG_LEVEL=debug`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppResult, TankError};
use crate::geometry::{Probe, Tank, Vec3};
use crate::plan::{MeasurementPlan, DEFAULT_MAX_GRID_POINTS};

/// Top-level process configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Motor geometry
    #[serde(default)]
    pub stage: StageConfig,
    /// Capture device settings
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Where results go
    #[serde(default)]
    pub storage: StorageConfig,
    /// Command loop settings
    #[serde(default)]
    pub controller: ControllerConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Stage geometry, in meters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Global position of every motor's local zero
    #[serde(default)]
    pub origin: Vec3,
    /// Rail length per axis
    #[serde(default = "default_max_travel")]
    pub max_travel: Vec3,
    /// Largest grid a plan may expand to
    #[serde(default = "default_max_grid_points")]
    pub max_grid_points: usize,
}

/// Capture device settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Use the simulated instrument
    #[serde(default = "default_simulated")]
    pub simulated: bool,
    /// Uniform noise added to simulated magnitudes
    #[serde(default)]
    pub noise_amplitude: f64,
    /// Simulated time per capture, in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
    /// Position of the simulated field source, motor local frame
    #[serde(default = "default_source")]
    pub source: Vec3,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory relative save paths are resolved against
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Capacity of the command queue
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

// Default value functions
fn default_name() -> String {
    "xyz-tank".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_max_travel() -> Vec3 {
    [3.0; 3]
}

fn default_max_grid_points() -> usize {
    DEFAULT_MAX_GRID_POINTS
}

fn default_simulated() -> bool {
    true
}

fn default_vertical() -> bool {
    true
}

fn default_source() -> Vec3 {
    [0.1, 0.1, 0.1]
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_mailbox_capacity() -> usize {
    32
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            max_travel: default_max_travel(),
            max_grid_points: default_max_grid_points(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            simulated: default_simulated(),
            noise_amplitude: 0.0,
            latency_ms: 0,
            source: default_source(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `config/xyz_tank.toml` and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/xyz_tank.toml")
    }

    /// Load configuration from a specific file path, then validate it
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("XYZ_TANK_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(TankError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(TankError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if let Some(travel) = self
            .stage
            .max_travel
            .iter()
            .find(|t| !(t.is_finite() && **t > 0.0))
        {
            return Err(TankError::Configuration(format!(
                "Invalid max_travel {travel}. Every axis needs a positive rail length"
            )));
        }

        if self.stage.max_grid_points == 0 {
            return Err(TankError::Configuration(
                "Invalid max_grid_points 0. Must be at least 1".to_string(),
            ));
        }

        if !(self.capture.noise_amplitude.is_finite() && self.capture.noise_amplitude >= 0.0) {
            return Err(TankError::Configuration(format!(
                "Invalid noise_amplitude {}. Must be >= 0",
                self.capture.noise_amplitude
            )));
        }

        if self.controller.mailbox_capacity == 0 {
            return Err(TankError::Configuration(
                "Invalid mailbox_capacity 0. Must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve a save path: relative paths land in `storage.output_dir`.
    pub fn resolve_output(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.storage.output_dir.join(path)
        }
    }
}

/// Plan section of a settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSettings {
    /// Name of the measurement
    pub name: String,
    /// Probe mounted vertically (`true`) or horizontally
    #[serde(default = "default_vertical")]
    pub is_vertical: bool,
    /// Lowest corner of the scanned box
    pub min_position: Vec3,
    /// Highest corner of the scanned box
    pub max_position: Vec3,
    /// Distance between grid points per axis
    pub grid_spacing: Vec3,
}

/// Probe section of a settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Name of the probe
    pub name: String,
    /// Extent in the vertical mounting
    pub dimensions: Vec3,
    /// Center point in the global frame
    pub position: Vec3,
    /// Clearance around the probe (hydrophone only)
    #[serde(default)]
    pub safety_margin: f64,
}

/// A measurement description: tank, plan, and the two probes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Tank the scan happens in
    pub tank: Tank,
    /// The scanned volume
    pub plan: PlanSettings,
    /// Receiving probe carried by the stage
    pub hydrophone: ProbeSettings,
    /// Emitting probe, if one is mounted
    #[serde(default)]
    pub transducer: Option<ProbeSettings>,
}

impl ScanSettings {
    /// Load a settings file.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(TankError::Configuration(format!(
                "settings file {} not found",
                path.display()
            )));
        }
        let settings: Self = Figment::new().merge(Toml::file(path)).extract()?;
        settings.tank.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string.
    pub fn from_toml(text: &str) -> AppResult<Self> {
        let settings: Self = Figment::new().merge(Toml::string(text)).extract()?;
        settings.tank.validate()?;
        Ok(settings)
    }

    /// A short vertical scan in a 0.6 x 0.8 x 0.3 m aquarium.
    ///
    /// The tank floor sits at z = -0.2, so the stage origin must be configured to match.
    pub fn example() -> Self {
        Self {
            tank: Tank {
                name: "glass aquarium".to_string(),
                dimensions: [0.6, 0.8, 0.3],
                position: [0.01, 0.007, -0.2],
            },
            plan: PlanSettings {
                name: "short".to_string(),
                is_vertical: true,
                min_position: [0.09, 0.08, -0.12],
                max_position: [0.15, 0.10, -0.10],
                grid_spacing: [0.01, 0.01, 0.01],
            },
            hydrophone: ProbeSettings {
                name: "hydrophone".to_string(),
                dimensions: [0.1, 0.1, 0.03],
                position: [0.1, 0.1, 0.03],
                safety_margin: 0.02,
            },
            transducer: Some(ProbeSettings {
                name: "transducer".to_string(),
                dimensions: [0.05, 0.05, 0.05],
                position: [0.3, 0.7, -0.1],
                safety_margin: 0.0,
            }),
        }
    }

    /// Encode as a TOML settings document.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TankError::Configuration(format!("cannot encode settings: {e}")))
    }

    /// The plan described by these settings.
    pub fn measurement_plan(&self) -> AppResult<MeasurementPlan> {
        MeasurementPlan::new(
            self.plan.name.clone(),
            self.tank.clone(),
            self.plan.is_vertical,
            self.plan.min_position,
            self.plan.max_position,
            self.plan.grid_spacing,
        )
    }

    /// The hydrophone the safety check runs against.
    pub fn hydrophone(&self) -> Probe {
        let h = &self.hydrophone;
        Probe::hydrophone(h.name.clone(), h.dimensions, h.position, h.safety_margin)
    }

    /// The transducer, if one is described.
    pub fn transducer(&self) -> Option<Probe> {
        self.transducer
            .as_ref()
            .map(|t| Probe::transducer(t.name.clone(), t.dimensions, t.position))
    }
}
