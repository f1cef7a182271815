#![allow(dead_code)]

use ev_load_balancer::config::Config;
use ev_load_balancer::host::EntityValue;
use ev_load_balancer::store::EntityStore;
use ev_load_balancer::{ChargingMode, Coordinator};
use std::sync::Arc;

/// Default config with timings short enough for tests
pub fn fast_config(mode: ChargingMode) -> Config {
    let mut config = Config::default();
    config.options.initial_mode = mode;
    config.timing.poll_interval_ms = 20;
    config.timing.confirm_timeout_ms = 100;
    config.timing.settle_ms = 0;
    config.web.enabled = false;
    config
}

/// Charger idle on one phase, house drawing `house_power`
pub fn idle_store(config: &Config, house_power: f64) -> EntityStore {
    EntityStore::with_states([
        (config.sensors.house_power.clone(), EntityValue::Number(house_power)),
        (config.sensors.active_power.clone(), EntityValue::Number(0.0)),
        (config.sensors.current_input.clone(), EntityValue::Number(0.0)),
        (config.sensors.phases_input.clone(), EntityValue::from("1 Phase")),
        (config.sensors.connection_state.clone(), EntityValue::from("Connected")),
        (config.controls.current_output.clone(), EntityValue::Number(0.0)),
        (config.controls.phases_output.clone(), EntityValue::from("1 Phase")),
    ])
}

pub fn coordinator(config: Config, store: &EntityStore) -> Arc<Coordinator> {
    Arc::new(Coordinator::new(config, Arc::new(store.clone())))
}
