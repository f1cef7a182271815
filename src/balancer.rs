//! Load balancing decision engine
//!
//! [`LoadBalancer`] turns one cycle's sensor readings into a target phase count
//! and charging current. It performs no I/O; the coordinator feeds it readings
//! and applies its decisions.

mod car;
mod latch;
mod mode;
mod readings;

pub use car::{CarGoal, estimated_battery_percentage, hours_until, parse_target_time};
pub use latch::{Edge, EdgeLatch};
pub use mode::ChargingMode;
pub use readings::{SensorReadings, SensorSnapshot, parse_phases};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::logging::{StructuredLogger, get_logger};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Efficiency is only measured above this charger power (W)
pub const EFFICIENCY_MIN_POWER_W: f64 = 1000.0;

/// Result of one decision pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Targets {
    pub efficiency: f64,
    pub available_power: f64,
    pub phase_selection: u8,
    pub current_limit: f64,
}

/// Clamp a raw current to `[0, max_current]`, collapsing anything below
/// `min_current` to exactly zero.
pub fn clamp_current(raw: f64, min_current: f64, max_current: f64) -> f64 {
    if raw.is_nan() || raw < min_current {
        0.0
    } else if raw > max_current {
        max_current
    } else {
        raw
    }
}

fn phase_count(phases: u8) -> f64 {
    f64::from(phases.max(1))
}

pub struct LoadBalancer {
    mode: ChargingMode,
    power_limit: f64,
    power_limit_extended: f64,
    car_aware: bool,
    pv_prioritized: bool,
    nominal_voltage: f64,
    min_current: f64,
    max_current: f64,
    phase_switch_delay: Duration,
    phase_switching_ends: Option<Instant>,
    error_latch: EdgeLatch,
    error_state: String,
    clock: Arc<dyn Clock>,
    logger: StructuredLogger,
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("mode", &self.mode)
            .field("power_limit", &self.power_limit)
            .field("power_limit_extended", &self.power_limit_extended)
            .field("car_aware", &self.car_aware)
            .field("pv_prioritized", &self.pv_prioritized)
            .field("nominal_voltage", &self.nominal_voltage)
            .field("phase_switching_ends", &self.phase_switching_ends)
            .field("in_error_state", &self.error_latch.is_active())
            .finish()
    }
}

impl LoadBalancer {
    /// Balancer with default limits, starting in `Off`
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let defaults = Config::default();
        Self {
            mode: ChargingMode::Off,
            power_limit: 0.0,
            power_limit_extended: 0.0,
            car_aware: false,
            pv_prioritized: false,
            nominal_voltage: defaults.limits.nominal_voltage,
            min_current: defaults.limits.min_current,
            max_current: defaults.limits.max_current,
            phase_switch_delay: Duration::from_secs(defaults.timing.phase_switch_cooldown_secs),
            phase_switching_ends: None,
            error_latch: EdgeLatch::new(),
            error_state: defaults.charger.error_state,
            clock,
            logger: get_logger("balancer"),
        }
    }

    /// Balancer configured from the `limits`, `options`, `timing` and
    /// `charger` sections
    pub fn from_config(config: &Config, clock: Arc<dyn Clock>) -> Self {
        let mut balancer = Self::with_clock(clock);
        balancer.set_power_limits(
            config.limits.max_power_limit,
            config.limits.power_limit_extended,
        );
        balancer.set_current_range(config.limits.min_current, config.limits.max_current);
        balancer.set_nominal_voltage(config.limits.nominal_voltage);
        balancer.set_car_aware(config.options.car_aware);
        balancer.set_pv_prioritized(config.options.pv_prioritized);
        balancer.set_mode(config.options.initial_mode);
        balancer.phase_switch_delay = Duration::from_secs(config.timing.phase_switch_cooldown_secs);
        balancer.error_state = config.charger.error_state.clone();
        balancer
    }

    pub fn mode(&self) -> ChargingMode {
        self.mode
    }

    pub fn nominal_voltage(&self) -> f64 {
        self.nominal_voltage
    }

    pub fn min_current(&self) -> f64 {
        self.min_current
    }

    pub fn max_current(&self) -> f64 {
        self.max_current
    }

    pub fn power_limit(&self) -> f64 {
        self.power_limit
    }

    pub fn power_limit_extended(&self) -> f64 {
        self.power_limit_extended
    }

    pub fn car_aware(&self) -> bool {
        self.car_aware
    }

    pub fn pv_prioritized(&self) -> bool {
        self.pv_prioritized
    }

    pub fn set_mode(&mut self, mode: ChargingMode) {
        if mode != self.mode {
            self.logger
                .info(&format!("Charging mode changed: {} -> {}", self.mode, mode));
        }
        self.mode = mode;
    }

    pub fn set_car_aware(&mut self, enabled: bool) {
        self.car_aware = enabled;
    }

    pub fn set_pv_prioritized(&mut self, enabled: bool) {
        self.pv_prioritized = enabled;
    }

    /// Set the normal grid budget and, when given, the extended one
    pub fn set_power_limits(&mut self, normal: f64, extended: Option<f64>) {
        self.power_limit = normal;
        if let Some(extended) = extended {
            self.power_limit_extended = extended;
        }
    }

    pub fn set_current_range(&mut self, min_current: f64, max_current: f64) {
        self.min_current = min_current;
        self.max_current = max_current;
    }

    pub fn set_nominal_voltage(&mut self, volts: f64) {
        self.nominal_voltage = volts;
    }

    /// `power / (current * V * phases)` once the charger draws more than
    /// [`EFFICIENCY_MIN_POWER_W`], otherwise 1.0
    pub fn calculate_efficiency(&self, current: f64, power: f64, phases: u8) -> f64 {
        if current > 0.0 && power > EFFICIENCY_MIN_POWER_W {
            return power / (current * self.nominal_voltage * phase_count(phases));
        }
        1.0
    }

    /// Whether the readings are complete enough to decide on
    pub fn validate_sensors(&self, readings: &SensorReadings) -> bool {
        let required = [
            &readings.house_power,
            &readings.active_power,
            &readings.current_input,
            &readings.phases_input,
        ];
        if !required.iter().all(|v| v.is_available()) {
            return false;
        }
        if self.car_aware {
            return readings
                .battery_percentage
                .as_ref()
                .is_some_and(|v| v.is_available());
        }
        true
    }

    /// Track the charger connection state. Entering the error state forces
    /// the mode to `Off`, once per transition.
    pub fn handle_error_state(&mut self, connection_state: &str) -> Edge {
        let active = connection_state == self.error_state;
        let mode = &mut self.mode;
        let logger = &self.logger;
        let edge = self.error_latch.observe(active, || {
            logger.error(&format!(
                "Charger entered error state; mode forced from {} to {}",
                mode,
                ChargingMode::Off
            ));
            *mode = ChargingMode::Off;
        });
        if edge == Edge::Falling {
            self.logger.info("Charger left error state");
        }
        edge
    }

    pub fn in_error_state(&self) -> bool {
        self.error_latch.is_active()
    }

    /// Number of times the error state forced the mode to `Off`
    pub fn error_transitions(&self) -> u64 {
        self.error_latch.rising_edges()
    }

    /// Power budget for this cycle (W, never negative)
    pub fn calculate_available_power(
        &self,
        household_power: f64,
        pv_power: Option<f64>,
        efficiency: f64,
        min_current: f64,
    ) -> f64 {
        let efficiency = if efficiency.is_finite() && efficiency > 0.0 {
            efficiency
        } else {
            1.0
        };
        let v = self.nominal_voltage;
        match self.mode {
            ChargingMode::Off => 0.0,
            ChargingMode::Solar => {
                if household_power > 0.0 {
                    return 0.0;
                }
                ((-household_power + v) / efficiency).max(0.0)
            }
            ChargingMode::Eco => {
                let export_threshold = -(v * min_current);
                match pv_power {
                    Some(pv)
                        if self.pv_prioritized
                            && household_power < export_threshold
                            && pv != 0.0 =>
                    {
                        (pv / efficiency).max(0.0)
                    }
                    _ => ((self.power_limit - household_power) / efficiency).max(0.0),
                }
            }
            ChargingMode::MinimalOnePhase => v * min_current,
            ChargingMode::MinimalThreePhase => v * min_current * 3.0,
            ChargingMode::Fast => v * self.max_current * 3.0,
        }
    }

    /// Three phases when the budget covers the minimum current on all three,
    /// otherwise one. Upward switches wait for the cooldown to end.
    pub fn calculate_phase_selection(
        &self,
        available_power: f64,
        min_current: f64,
        current_phases: u8,
    ) -> u8 {
        let desired = if available_power >= self.nominal_voltage * min_current * 3.0 {
            3
        } else {
            1
        };
        if desired > current_phases && self.is_phase_switching_active() {
            self.logger.debug(&format!(
                "Phase increase {} -> {} suppressed by cooldown",
                current_phases, desired
            ));
            return current_phases;
        }
        desired
    }

    pub fn calculate_current_limit(
        &self,
        available_power: f64,
        phases: u8,
        min_current: f64,
        max_current: f64,
    ) -> f64 {
        let raw = available_power / (self.nominal_voltage * phase_count(phases));
        clamp_current(raw, min_current, max_current)
    }

    pub fn calculate_estimated_battery_percentage(
        &self,
        current_percentage: f64,
        capacity_wh: f64,
        charging_power_w: f64,
        hours_until_target: f64,
    ) -> f64 {
        estimated_battery_percentage(
            current_percentage,
            capacity_wh,
            charging_power_w,
            hours_until_target,
        )
    }

    /// Lift `limit` to the extended limit when the projected battery level at
    /// the target time falls short of `soc_threshold`
    pub fn adjust_for_car_aware(
        &self,
        limit: f64,
        battery_percentage: f64,
        soc_threshold: f64,
        capacity_wh: f64,
        charging_power_w: f64,
        hours_until_target: f64,
    ) -> f64 {
        if !self.car_aware || self.power_limit_extended <= 0.0 {
            return limit;
        }
        let estimated = self.calculate_estimated_battery_percentage(
            battery_percentage,
            capacity_wh,
            charging_power_w,
            hours_until_target,
        );
        if estimated < soc_threshold {
            self.logger.debug(&format!(
                "Projected {:.1}% below {:.1}%; using extended limit {:.0} W",
                estimated, soc_threshold, self.power_limit_extended
            ));
            return self.power_limit_extended;
        }
        limit
    }

    /// Start (or push forward) the window in which phase increases are held
    pub fn start_phase_switching_cooldown(&mut self) {
        let candidate = self.clock.now() + self.phase_switch_delay;
        let ends = match self.phase_switching_ends {
            Some(existing) if existing > candidate => existing,
            _ => candidate,
        };
        self.phase_switching_ends = Some(ends);
        self.logger.debug(&format!(
            "Phase switching cooldown active for {:?}",
            ends.saturating_duration_since(self.clock.now())
        ));
    }

    pub fn is_phase_switching_active(&self) -> bool {
        self.phase_switching_ends
            .is_some_and(|ends| self.clock.now() < ends)
    }

    /// Time left in the cooldown window, if one is running
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let ends = self.phase_switching_ends?;
        let left = ends.saturating_duration_since(self.clock.now());
        (!left.is_zero()).then_some(left)
    }

    /// Run the full calculation chain for one validated snapshot
    pub fn compute_targets(&self, snapshot: &SensorSnapshot, goal: Option<&CarGoal>) -> Targets {
        let efficiency = self.calculate_efficiency(
            snapshot.current_input,
            snapshot.active_power,
            snapshot.phases_input,
        );
        let mut available_power = self.calculate_available_power(
            snapshot.house_power,
            snapshot.pv_power,
            efficiency,
            self.min_current,
        );
        if let Some(goal) = goal {
            available_power = self.adjust_for_car_aware(
                available_power,
                goal.battery_percentage,
                goal.soc_threshold,
                goal.battery_capacity_wh,
                available_power,
                goal.hours_until_target,
            );
        }
        let phase_selection =
            self.calculate_phase_selection(available_power, self.min_current, snapshot.phases_input);
        let current_limit = self.calculate_current_limit(
            available_power,
            phase_selection,
            self.min_current,
            self.max_current,
        );
        Targets {
            efficiency,
            available_power,
            phase_selection,
            current_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::host::EntityValue;

    fn balancer(mode: ChargingMode) -> (LoadBalancer, ManualClock) {
        let clock = ManualClock::new();
        let mut lb = LoadBalancer::with_clock(Arc::new(clock.clone()));
        lb.set_power_limits(1500.0, None);
        lb.set_mode(mode);
        (lb, clock)
    }

    #[test]
    fn efficiency_defaults_to_one_at_low_power() {
        let (lb, _) = balancer(ChargingMode::Eco);
        for (current, power) in [(0.0, 5000.0), (-1.0, 5000.0), (10.0, 1000.0), (10.0, 0.0)] {
            assert_eq!(lb.calculate_efficiency(current, power, 1), 1.0);
        }
        let eff = lb.calculate_efficiency(10.0, 2070.0, 1);
        assert!((eff - 0.9).abs() < 1e-9);
        let eff = lb.calculate_efficiency(10.0, 6210.0, 3);
        assert!((eff - 0.9).abs() < 1e-9);
    }

    #[test]
    fn off_mode_never_has_power() {
        let (lb, _) = balancer(ChargingMode::Off);
        for house in [-10_000.0, -500.0, 0.0, 800.0] {
            assert_eq!(lb.calculate_available_power(house, Some(4000.0), 0.9, 6.0), 0.0);
        }
    }

    #[test]
    fn eco_uses_grid_budget() {
        let (lb, _) = balancer(ChargingMode::Eco);
        assert_eq!(lb.calculate_available_power(500.0, None, 1.0, 6.0), 1000.0);
        assert_eq!(lb.calculate_available_power(2000.0, None, 1.0, 6.0), 0.0);
        let limit = lb.calculate_current_limit(1000.0, 1, 6.0, 16.0);
        assert_eq!(limit, 0.0);
    }

    #[test]
    fn eco_prefers_pv_only_when_exporting_enough() {
        let (mut lb, _) = balancer(ChargingMode::Eco);
        lb.set_pv_prioritized(true);
        // Exporting 2000 W, more than 230 * 6
        assert_eq!(lb.calculate_available_power(-2000.0, Some(3000.0), 1.0, 6.0), 3000.0);
        // Exporting too little: grid budget
        assert_eq!(lb.calculate_available_power(-1000.0, Some(3000.0), 1.0, 6.0), 2500.0);
        // Missing or zero PV: grid budget
        assert_eq!(lb.calculate_available_power(-2000.0, None, 1.0, 6.0), 3500.0);
        assert_eq!(lb.calculate_available_power(-2000.0, Some(0.0), 1.0, 6.0), 3500.0);
        // Negative PV floors at zero
        assert_eq!(lb.calculate_available_power(-2000.0, Some(-50.0), 1.0, 6.0), 0.0);
    }

    #[test]
    fn solar_uses_export_plus_headroom() {
        let (lb, _) = balancer(ChargingMode::Solar);
        assert_eq!(lb.calculate_available_power(100.0, Some(5000.0), 1.0, 6.0), 0.0);
        assert_eq!(lb.calculate_available_power(-1000.0, None, 1.0, 6.0), 1230.0);
        assert_eq!(lb.calculate_available_power(0.0, None, 0.5, 6.0), 460.0);
    }

    #[test]
    fn fixed_modes_ignore_live_power() {
        let (mut lb, _) = balancer(ChargingMode::Fast);
        assert_eq!(lb.calculate_available_power(9000.0, Some(1.0), 0.7, 6.0), 11_040.0);
        lb.set_mode(ChargingMode::MinimalOnePhase);
        assert_eq!(lb.calculate_available_power(9000.0, None, 0.7, 6.0), 1380.0);
        lb.set_mode(ChargingMode::MinimalThreePhase);
        assert_eq!(lb.calculate_available_power(9000.0, None, 0.7, 6.0), 4140.0);
    }

    #[test]
    fn bad_efficiency_is_treated_as_ideal() {
        let (lb, _) = balancer(ChargingMode::Eco);
        assert_eq!(lb.calculate_available_power(500.0, None, 0.0, 6.0), 1000.0);
        assert_eq!(lb.calculate_available_power(500.0, None, f64::NAN, 6.0), 1000.0);
    }

    #[test]
    fn phase_selection_threshold() {
        let (lb, _) = balancer(ChargingMode::Eco);
        assert_eq!(lb.calculate_phase_selection(4140.0, 6.0, 1), 3);
        assert_eq!(lb.calculate_phase_selection(4139.9, 6.0, 3), 1);
    }

    #[test]
    fn cooldown_suppresses_only_increases() {
        let (mut lb, clock) = balancer(ChargingMode::Fast);
        lb.start_phase_switching_cooldown();
        assert!(lb.is_phase_switching_active());
        for power in [0.0, 4140.0, 11_040.0, 1e9] {
            assert!(lb.calculate_phase_selection(power, 6.0, 1) <= 1);
        }
        assert_eq!(lb.calculate_phase_selection(1000.0, 6.0, 3), 1);

        clock.advance(Duration::from_secs(300));
        assert!(!lb.is_phase_switching_active());
        assert_eq!(lb.calculate_phase_selection(11_040.0, 6.0, 1), 3);
    }

    #[test]
    fn cooldown_deadline_never_moves_backwards() {
        let (mut lb, clock) = balancer(ChargingMode::Eco);
        lb.start_phase_switching_cooldown();
        clock.advance(Duration::from_secs(100));
        lb.phase_switch_delay = Duration::from_secs(10);
        lb.start_phase_switching_cooldown();
        assert_eq!(lb.cooldown_remaining(), Some(Duration::from_secs(200)));

        clock.advance(Duration::from_secs(150));
        lb.phase_switch_delay = Duration::from_secs(300);
        lb.start_phase_switching_cooldown();
        assert_eq!(lb.cooldown_remaining(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn current_limit_clamps() {
        let (lb, _) = balancer(ChargingMode::Eco);
        assert_eq!(lb.calculate_current_limit(1380.0, 1, 6.0, 16.0), 6.0);
        assert_eq!(lb.calculate_current_limit(11_040.0, 1, 6.0, 16.0), 16.0);
        assert_eq!(lb.calculate_current_limit(2300.0, 1, 6.0, 16.0), 10.0);
        assert_eq!(lb.calculate_current_limit(2300.0, 0, 6.0, 16.0), 10.0);
    }

    #[test]
    fn clamping_is_idempotent() {
        for raw in [-3.0, 0.0, 4.35, 6.0, 9.99, 16.0, 40.0, f64::INFINITY, f64::NAN] {
            let once = clamp_current(raw, 6.0, 16.0);
            assert_eq!(clamp_current(once, 6.0, 16.0), once);
            assert!((0.0..=16.0).contains(&once));
            assert!(once == 0.0 || once >= 6.0);
        }
    }

    #[test]
    fn error_state_forces_off_once_per_transition() {
        let (mut lb, _) = balancer(ChargingMode::Eco);
        assert_eq!(lb.handle_error_state("Normal"), Edge::Steady);
        assert_eq!(lb.handle_error_state("Error"), Edge::Rising);
        assert_eq!(lb.mode(), ChargingMode::Off);
        assert_eq!(lb.error_transitions(), 1);

        lb.set_mode(ChargingMode::Fast);
        assert_eq!(lb.handle_error_state("Error"), Edge::Steady);
        assert_eq!(lb.mode(), ChargingMode::Fast);
        assert_eq!(lb.error_transitions(), 1);

        assert_eq!(lb.handle_error_state("Charging"), Edge::Falling);
        assert!(!lb.in_error_state());
    }

    #[test]
    fn car_aware_adjustment() {
        let (mut lb, _) = balancer(ChargingMode::Eco);
        lb.set_power_limits(1500.0, Some(3000.0));
        // Disabled: unchanged
        assert_eq!(lb.adjust_for_car_aware(1200.0, 10.0, 80.0, 50_000.0, 0.0, 1.0), 1200.0);

        lb.set_car_aware(true);
        // 40% projected against 80%
        assert_eq!(lb.adjust_for_car_aware(1200.0, 40.0, 80.0, 50_000.0, 0.0, 3.0), 3000.0);
        // Goal met: unchanged
        assert_eq!(lb.adjust_for_car_aware(1200.0, 70.0, 80.0, 50_000.0, 2500.0, 4.0), 1200.0);

        lb.set_power_limits(1500.0, Some(0.0));
        assert_eq!(lb.adjust_for_car_aware(1200.0, 40.0, 80.0, 50_000.0, 0.0, 3.0), 1200.0);
    }

    #[test]
    fn power_limits_keep_extended_when_omitted() {
        let (mut lb, _) = balancer(ChargingMode::Eco);
        lb.set_power_limits(1500.0, Some(3000.0));
        lb.set_power_limits(2000.0, None);
        assert_eq!(lb.power_limit(), 2000.0);
        assert_eq!(lb.power_limit_extended(), 3000.0);
    }

    #[test]
    fn sensor_validation() {
        let (mut lb, _) = balancer(ChargingMode::Eco);
        let mut readings = SensorReadings::sample();
        assert!(lb.validate_sensors(&readings));

        lb.set_car_aware(true);
        assert!(!lb.validate_sensors(&readings));
        readings.battery_percentage = Some(EntityValue::Number(55.0));
        assert!(lb.validate_sensors(&readings));

        readings.active_power = EntityValue::Unavailable;
        assert!(!lb.validate_sensors(&readings));
    }

    #[test]
    fn compute_targets_chains_calculations() {
        let (lb, _) = balancer(ChargingMode::Eco);
        let snapshot = SensorSnapshot {
            house_power: -3000.0,
            active_power: 0.0,
            current_input: 0.0,
            phases_input: 1,
            connection_state: "Connected".into(),
            pv_power: None,
            battery_percentage: None,
            target_time: None,
        };
        let targets = lb.compute_targets(&snapshot, None);
        assert_eq!(targets.efficiency, 1.0);
        assert_eq!(targets.available_power, 4500.0);
        assert_eq!(targets.phase_selection, 3);
        assert!((targets.current_limit - 4500.0 / 690.0).abs() < 1e-9);
    }
}
