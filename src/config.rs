//! Configuration management for the load balancer
//!
//! Loads the YAML configuration, fills in defaults for omitted sections and
//! validates the result once at startup.

mod defaults;

use crate::balancer::{ChargingMode, parse_target_time};
use crate::error::{BalancerError, Result};
use crate::host::SensorAccessor;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "EVLB_CONFIG";

/// Files tried in order when no explicit path is given
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "ev_load_balancer.yaml",
    "/data/ev_load_balancer.yaml",
    "/etc/ev-load-balancer/config.yaml",
];

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sensor entity references
    pub sensors: SensorsConfig,

    /// Output entity references
    pub controls: ControlsConfig,

    /// Car state-of-charge goal, required when car-aware charging is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub car: Option<CarConfig>,

    pub options: OptionsConfig,

    /// Power and current limits
    pub limits: LimitsConfig,

    /// Cycle cadence and protocol timeouts
    pub timing: TimingConfig,

    /// Charger specific state labels and tolerances
    pub charger: ChargerConfig,

    pub logging: LoggingConfig,

    /// HTTP server binding configuration
    pub web: WebConfig,
}

/// Sensor entity references
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    /// Net household power (W, negative when exporting)
    pub house_power: String,
    /// Charger active power (W)
    pub active_power: String,
    /// Current the charger is configured to draw (A)
    pub current_input: String,
    /// Phases the charger is configured to use
    pub phases_input: String,
    /// Charger connection/mode-3 state
    pub connection_state: String,
    /// Solar production (W)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pv_power: Option<String>,
}

/// Output entity references
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    /// Numeric output setting the charging current (A)
    pub current_output: String,
    /// Select-like output setting the phase count by label
    pub phases_output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarConfig {
    /// Battery level sensor (%)
    pub battery_percentage: String,
    pub battery_capacity_wh: f64,
    /// Battery level (%) that should be reached by `target_time`
    pub soc_threshold: f64,
    /// Local time of day, `HH:MM`
    pub target_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsConfig {
    pub car_aware: bool,
    pub pv_prioritized: bool,
    /// Mode the balancer starts in
    pub initial_mode: ChargingMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Grid import budget for Eco mode (W)
    pub max_power_limit: f64,
    /// Budget used when the car goal would otherwise be missed (W)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_limit_extended: Option<f64>,
    pub min_current: f64,
    pub max_current: f64,
    pub nominal_voltage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_interval_ms: u64,
    /// Bound on every confirmation wait
    pub confirm_timeout_ms: u64,
    /// Contactor settle pause around a phase switch
    pub settle_ms: u64,
    pub phase_switch_cooldown_secs: u64,
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargerConfig {
    pub phase_one_label: String,
    pub phase_three_label: String,
    /// Connection state that marks a charger fault
    pub error_state: String,
    /// Smallest current change (A) worth commanding
    pub update_difference_threshold: f64,
    /// Numeric slack when confirming a commanded value
    pub confirm_tolerance: f64,
}

impl ChargerConfig {
    /// Option the phase output expects for `phases`
    pub fn phase_label(&self, phases: u8) -> &str {
        if phases >= 3 {
            &self.phase_three_label
        } else {
            &self.phase_one_label
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Log file path or directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

fn require_entity(field: &str, entity_id: &str) -> Result<()> {
    if entity_id.trim().is_empty() {
        return Err(BalancerError::validation(
            field,
            "Entity reference cannot be empty",
        ));
    }
    Ok(())
}

fn require_positive(field: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(BalancerError::validation(field, "Must be positive"));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from `path`, then `EVLB_CONFIG`, then the default locations,
    /// falling back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(path);
        }
        for path in &DEFAULT_CONFIG_PATHS {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Entity references that must exist in the host, with their field names
    pub fn referenced_entities(&self) -> Vec<(&'static str, &str)> {
        let mut entities = vec![
            ("sensors.house_power", self.sensors.house_power.as_str()),
            ("sensors.active_power", self.sensors.active_power.as_str()),
            ("sensors.current_input", self.sensors.current_input.as_str()),
            ("sensors.phases_input", self.sensors.phases_input.as_str()),
            ("sensors.connection_state", self.sensors.connection_state.as_str()),
            ("controls.current_output", self.controls.current_output.as_str()),
            ("controls.phases_output", self.controls.phases_output.as_str()),
        ];
        if self.options.car_aware
            && let Some(car) = &self.car
        {
            entities.push(("car.battery_percentage", car.battery_percentage.as_str()));
        }
        if self.options.pv_prioritized
            && let Some(pv) = &self.sensors.pv_power
        {
            entities.push(("sensors.pv_power", pv.as_str()));
        }
        entities
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (field, entity_id) in self.referenced_entities() {
            require_entity(field, entity_id)?;
        }

        if self.options.car_aware {
            let car = self.car.as_ref().ok_or_else(|| {
                BalancerError::validation("car", "Car sensors are required when car_aware is enabled")
            })?;
            require_positive("car.battery_capacity_wh", car.battery_capacity_wh)?;
            if !(0.0..=100.0).contains(&car.soc_threshold) {
                return Err(BalancerError::validation(
                    "car.soc_threshold",
                    "Must be between 0 and 100",
                ));
            }
            parse_target_time(&car.target_time)?;
        }

        if self.options.pv_prioritized && self.sensors.pv_power.is_none() {
            return Err(BalancerError::validation(
                "sensors.pv_power",
                "PV power sensor is required when pv_prioritized is enabled",
            ));
        }

        require_positive("limits.nominal_voltage", self.limits.nominal_voltage)?;
        require_positive("limits.min_current", self.limits.min_current)?;
        if self.limits.max_current.is_nan() || self.limits.max_current < self.limits.min_current {
            return Err(BalancerError::validation(
                "limits.max_current",
                "Must not be below limits.min_current",
            ));
        }
        if !self.limits.max_power_limit.is_finite() || self.limits.max_power_limit < 0.0 {
            return Err(BalancerError::validation(
                "limits.max_power_limit",
                "Must be zero or positive",
            ));
        }

        if self.timing.poll_interval_ms == 0 {
            return Err(BalancerError::validation(
                "timing.poll_interval_ms",
                "Must be greater than 0",
            ));
        }
        if self.timing.confirm_timeout_ms == 0 {
            return Err(BalancerError::validation(
                "timing.confirm_timeout_ms",
                "Must be greater than 0",
            ));
        }

        if self.charger.phase_one_label == self.charger.phase_three_label {
            return Err(BalancerError::validation(
                "charger.phase_three_label",
                "Phase labels must differ",
            ));
        }

        if self.web.enabled && self.web.port == 0 {
            return Err(BalancerError::validation(
                "web.port",
                "Port must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Check that every referenced entity exists in the host
    pub async fn validate_entities<H: SensorAccessor + ?Sized>(&self, host: &H) -> Result<()> {
        for (field, entity_id) in self.referenced_entities() {
            if host.read(entity_id).await.is_none() {
                return Err(BalancerError::validation(
                    field,
                    format!("Entity {} not found", entity_id),
                ));
            }
        }
        Ok(())
    }
}
