use ev_load_balancer::balancer::{CarGoal, SensorSnapshot};
use ev_load_balancer::clock::ManualClock;
use ev_load_balancer::config::Config;
use ev_load_balancer::{ChargingMode, LoadBalancer};
use std::sync::Arc;
use std::time::Duration;

fn snapshot(house_power: f64, phases: u8) -> SensorSnapshot {
    SensorSnapshot {
        house_power,
        active_power: 0.0,
        current_input: 0.0,
        phases_input: phases,
        connection_state: "Connected".to_string(),
        pv_power: None,
        battery_percentage: None,
        target_time: None,
    }
}

fn balancer(mode: ChargingMode) -> (LoadBalancer, ManualClock) {
    let clock = ManualClock::new();
    let mut config = Config::default();
    config.options.initial_mode = mode;
    (LoadBalancer::from_config(&config, Arc::new(clock.clone())), clock)
}

#[test]
fn eco_budget_below_minimum_current_stops_charging() {
    let (lb, _) = balancer(ChargingMode::Eco);
    let targets = lb.compute_targets(&snapshot(500.0, 1), None);
    assert_eq!(targets.available_power, 1000.0);
    assert_eq!(targets.phase_selection, 1);
    assert_eq!(targets.current_limit, 0.0);
}

#[test]
fn eco_export_allows_three_phase_charging() {
    let (lb, _) = balancer(ChargingMode::Eco);
    let targets = lb.compute_targets(&snapshot(-3000.0, 1), None);
    assert_eq!(targets.available_power, 4500.0);
    assert_eq!(targets.phase_selection, 3);
    assert!((targets.current_limit - 4500.0 / 690.0).abs() < 1e-9);
}

#[test]
fn fast_mode_uses_full_three_phase_capacity() {
    let (lb, _) = balancer(ChargingMode::Fast);
    let targets = lb.compute_targets(&snapshot(4000.0, 1), None);
    assert_eq!(targets.available_power, 11040.0);
    assert_eq!(targets.phase_selection, 3);
    assert_eq!(targets.current_limit, 16.0);
}

#[test]
fn off_mode_requests_nothing() {
    let (lb, _) = balancer(ChargingMode::Off);
    let targets = lb.compute_targets(&snapshot(-5000.0, 3), None);
    assert_eq!(targets.available_power, 0.0);
    assert_eq!(targets.phase_selection, 1);
    assert_eq!(targets.current_limit, 0.0);
}

#[test]
fn minimal_modes_charge_at_minimum_current() {
    let (mut lb, _) = balancer(ChargingMode::MinimalOnePhase);
    let targets = lb.compute_targets(&snapshot(3000.0, 1), None);
    assert_eq!((targets.phase_selection, targets.current_limit), (1, 6.0));

    lb.set_mode(ChargingMode::MinimalThreePhase);
    let targets = lb.compute_targets(&snapshot(3000.0, 1), None);
    assert_eq!((targets.phase_selection, targets.current_limit), (3, 6.0));
}

#[test]
fn cooldown_holds_phase_increase_until_it_expires() {
    let (mut lb, clock) = balancer(ChargingMode::Fast);
    lb.start_phase_switching_cooldown();

    let targets = lb.compute_targets(&snapshot(0.0, 1), None);
    assert_eq!(targets.phase_selection, 1);
    assert_eq!(targets.current_limit, 16.0);

    clock.advance(Duration::from_secs(299));
    assert!(lb.is_phase_switching_active());
    clock.advance(Duration::from_secs(1));
    assert!(!lb.is_phase_switching_active());
    assert_eq!(lb.compute_targets(&snapshot(0.0, 1), None).phase_selection, 3);
}

#[test]
fn cooldown_never_blocks_a_phase_decrease() {
    let (mut lb, _) = balancer(ChargingMode::MinimalOnePhase);
    lb.start_phase_switching_cooldown();
    assert_eq!(lb.compute_targets(&snapshot(0.0, 3), None).phase_selection, 1);
}

#[test]
fn car_behind_schedule_gets_extended_limit() {
    let clock = ManualClock::new();
    let mut config = Config::default();
    config.options.initial_mode = ChargingMode::Eco;
    config.options.car_aware = true;
    config.limits.power_limit_extended = Some(3000.0);
    let lb = LoadBalancer::from_config(&config, Arc::new(clock));

    let goal = CarGoal {
        battery_percentage: 20.0,
        soc_threshold: 80.0,
        battery_capacity_wh: 75_000.0,
        hours_until_target: 2.0,
    };
    let targets = lb.compute_targets(&snapshot(500.0, 1), Some(&goal));
    assert_eq!(targets.available_power, 3000.0);
    assert!((targets.current_limit - 3000.0 / 230.0).abs() < 1e-9);

    let on_track = CarGoal {
        battery_percentage: 79.5,
        ..goal
    };
    let targets = lb.compute_targets(&snapshot(-10_000.0, 1), Some(&on_track));
    assert_eq!(targets.available_power, 11_500.0);
}

#[test]
fn error_state_forces_off_once_per_entry() {
    let (mut lb, _) = balancer(ChargingMode::Fast);
    lb.handle_error_state("Error");
    assert_eq!(lb.mode(), ChargingMode::Off);

    lb.set_mode(ChargingMode::Eco);
    lb.handle_error_state("Error");
    assert_eq!(lb.mode(), ChargingMode::Eco);
    assert_eq!(lb.error_transitions(), 1);

    lb.handle_error_state("Connected");
    assert!(!lb.in_error_state());
    lb.handle_error_state("Error");
    assert_eq!(lb.mode(), ChargingMode::Off);
    assert_eq!(lb.error_transitions(), 2);
}
