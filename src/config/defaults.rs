use super::*;

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            house_power: "sensor.house_power".to_string(),
            active_power: "sensor.charger_active_power".to_string(),
            current_input: "sensor.charger_max_current".to_string(),
            phases_input: "sensor.charger_phases".to_string(),
            connection_state: "sensor.charger_connection_state".to_string(),
            pv_power: None,
        }
    }
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            current_output: "number.charger_max_current".to_string(),
            phases_output: "select.charger_phases".to_string(),
        }
    }
}

impl Default for CarConfig {
    fn default() -> Self {
        Self {
            battery_percentage: "sensor.car_battery_percentage".to_string(),
            battery_capacity_wh: 75_000.0,
            soc_threshold: 80.0,
            target_time: "07:00".to_string(),
        }
    }
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            car_aware: false,
            pv_prioritized: false,
            initial_mode: ChargingMode::Off,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_power_limit: 1500.0,
            power_limit_extended: None,
            min_current: 6.0,
            max_current: 16.0,
            nominal_voltage: 230.0,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            confirm_timeout_ms: 5_000,
            settle_ms: 2_000,
            phase_switch_cooldown_secs: 300,
        }
    }
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            phase_one_label: "1 Phase".to_string(),
            phase_three_label: "3 Phases".to_string(),
            error_state: "Error".to_string(),
            update_difference_threshold: 0.1,
            confirm_tolerance: 0.05,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/ev-load-balancer.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8088,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sensors: SensorsConfig::default(),
            controls: ControlsConfig::default(),
            car: None,
            options: OptionsConfig::default(),
            limits: LimitsConfig::default(),
            timing: TimingConfig::default(),
            charger: ChargerConfig::default(),
            logging: LoggingConfig::default(),
            web: WebConfig::default(),
        }
    }
}
