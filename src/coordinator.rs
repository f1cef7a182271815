//! Actuation coordinator
//!
//! Owns the polling cycle: reads sensors through the host, asks the
//! [`LoadBalancer`] for targets, drives the actuation protocol when the
//! targets differ from what the charger reports, and publishes a
//! [`ChargerSnapshot`] to observers.
//!
//! At most one cycle runs at a time. A tick that finds a cycle in flight is
//! dropped, and operator actions issued meanwhile are rejected as busy.

mod actuation;
mod confirm;
mod runtime;
mod snapshot;

pub use actuation::ActuationPlan;
pub use confirm::wait_for_value;
pub use snapshot::{ChargerSnapshot, CycleOutcome};

use crate::balancer::{
    CarGoal, ChargingMode, LoadBalancer, SensorReadings, SensorSnapshot, Targets, hours_until,
    parse_target_time,
};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{BalancerError, Result};
use crate::host::{EntityHost, EntityValue};
use crate::logging::{StructuredLogger, get_logger};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::watch;

#[derive(Debug, Default)]
struct CycleStats {
    total: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

pub struct Coordinator {
    config: Config,
    pub(crate) host: Arc<dyn EntityHost>,
    balancer: Mutex<LoadBalancer>,
    /// Held for the whole of a cycle or operator action
    pub(crate) cycle_lock: tokio::sync::Mutex<()>,
    snapshot_tx: watch::Sender<Arc<ChargerSnapshot>>,
    shutdown_tx: watch::Sender<bool>,
    stats: CycleStats,
    pub(crate) logger: StructuredLogger,
}

impl Coordinator {
    pub fn new(config: Config, host: Arc<dyn EntityHost>) -> Self {
        Self::with_clock(config, host, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Config, host: Arc<dyn EntityHost>, clock: Arc<dyn Clock>) -> Self {
        let balancer = LoadBalancer::from_config(&config, clock);
        let initial = ChargerSnapshot::initial(balancer.mode(), config.timing.poll_interval_ms);
        let (snapshot_tx, _) = watch::channel(Arc::new(initial));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            host,
            balancer: Mutex::new(balancer),
            cycle_lock: tokio::sync::Mutex::new(()),
            snapshot_tx,
            shutdown_tx,
            stats: CycleStats::default(),
            logger: get_logger("coordinator"),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn balancer(&self) -> MutexGuard<'_, LoadBalancer> {
        self.balancer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the decision engine
    pub fn with_balancer<R>(&self, f: impl FnOnce(&mut LoadBalancer) -> R) -> R {
        f(&mut self.balancer())
    }

    pub fn mode(&self) -> ChargingMode {
        self.balancer().mode()
    }

    pub fn is_phase_switching_active(&self) -> bool {
        self.balancer().is_phase_switching_active()
    }

    /// Whether a cycle or operator action currently owns the outputs
    pub fn is_busy(&self) -> bool {
        self.cycle_lock.try_lock().is_err()
    }

    /// Most recently published snapshot
    pub fn latest(&self) -> Arc<ChargerSnapshot> {
        self.snapshot_tx.borrow().clone()
    }

    /// Receiver that observes every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<Arc<ChargerSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    fn publish(&self, snapshot: ChargerSnapshot) -> Arc<ChargerSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.snapshot_tx.send_replace(Arc::clone(&snapshot));
        snapshot
    }

    fn build_snapshot(
        &self,
        readings: Option<SensorReadings>,
        targets: Option<&Targets>,
        outcome: CycleOutcome,
        started: Instant,
    ) -> ChargerSnapshot {
        let (mode, in_error_state, phase_switching_active, cooldown) = {
            let lb = self.balancer();
            (
                lb.mode(),
                lb.in_error_state(),
                lb.is_phase_switching_active(),
                lb.cooldown_remaining(),
            )
        };
        let mut snapshot = ChargerSnapshot::initial(mode, self.config.timing.poll_interval_ms);
        snapshot.readings = readings;
        snapshot.in_error_state = in_error_state;
        snapshot.phase_switching_active = phase_switching_active;
        snapshot.cooldown_remaining_secs = cooldown.map(|d| d.as_secs());
        snapshot.outcome = outcome;
        snapshot.poll_duration_ms = Some(started.elapsed().as_millis() as u64);
        self.fill_stats(&mut snapshot);
        match targets {
            Some(targets) => snapshot.with_targets(targets),
            None => snapshot,
        }
    }

    fn fill_stats(&self, snapshot: &mut ChargerSnapshot) {
        snapshot.total_cycles = self.stats.total.load(Ordering::Relaxed);
        snapshot.skipped_cycles = self.stats.skipped.load(Ordering::Relaxed);
        snapshot.failed_cycles = self.stats.failed.load(Ordering::Relaxed);
    }

    /// Run one control cycle.
    ///
    /// Returns the published snapshot, or the last one unchanged when another
    /// cycle is still in flight. Errors leave the previous data in place; only
    /// the outcome and counters of the published snapshot are updated.
    pub async fn poll_cycle(&self) -> Result<Arc<ChargerSnapshot>> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            self.logger
                .debug("Previous cycle still in progress; skipping this tick");
            return Ok(self.latest());
        };

        let started = Instant::now();
        let cycle = self.stats.total.fetch_add(1, Ordering::Relaxed) + 1;
        let logger = self.logger.with_field("cycle", cycle);
        logger.trace("Starting cycle");

        match self.run_cycle(started).await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                // Recoverable failures clear by re-polling on the next tick
                if e.is_recoverable() {
                    logger.warn(&format!("Cycle failed: {}", e));
                } else {
                    logger.error(&format!("Cycle failed: {}", e));
                }
                let mut retained = (*self.latest()).clone();
                retained.outcome = CycleOutcome::Failed;
                retained.last_error = Some(e.to_string());
                retained.poll_duration_ms = Some(started.elapsed().as_millis() as u64);
                self.fill_stats(&mut retained);
                self.publish(retained);
                Err(e)
            }
        }
    }

    async fn run_cycle(&self, started: Instant) -> Result<Arc<ChargerSnapshot>> {
        let readings = self.collect_readings().await?;

        if !self.balancer().validate_sensors(&readings) {
            self.logger
                .warn("Required sensors unavailable; holding current outputs");
            let snapshot =
                self.build_snapshot(Some(readings), None, CycleOutcome::SensorsUnavailable, started);
            return Ok(self.publish(snapshot));
        }

        let mut sensors = readings.to_snapshot(&self.config.charger)?;

        let in_error = {
            let mut lb = self.balancer();
            lb.handle_error_state(&sensors.connection_state);
            lb.in_error_state()
        };
        if in_error {
            let snapshot =
                self.build_snapshot(Some(readings), None, CycleOutcome::ChargerError, started);
            return Ok(self.publish(snapshot));
        }

        let goal = self.car_goal(&mut sensors);
        let targets = self.balancer().compute_targets(&sensors, goal.as_ref());
        self.logger.debug(&format!(
            "mode={} house={:.0}W eff={:.3} available={:.0}W phases {}->{} current {:.2}->{:.2}A",
            self.mode(),
            sensors.house_power,
            targets.efficiency,
            targets.available_power,
            sensors.phases_input,
            targets.phase_selection,
            sensors.current_input,
            targets.current_limit
        ));

        let current_changed = (targets.current_limit - sensors.current_input).abs()
            > self.config.charger.update_difference_threshold;
        let phases_changed = targets.phase_selection != sensors.phases_input;

        let outcome = if current_changed || phases_changed {
            let plan = ActuationPlan {
                target_current: targets.current_limit,
                target_phases: targets.phase_selection,
                observed_phases: sensors.phases_input,
            };
            self.actuate(&plan).await?;
            CycleOutcome::Applied
        } else {
            CycleOutcome::Unchanged
        };

        let snapshot = self.build_snapshot(Some(readings), Some(&targets), outcome, started);
        Ok(self.publish(snapshot))
    }

    async fn read_required(&self, name: &str, entity_id: &str) -> Result<EntityValue> {
        self.host.read(entity_id).await.ok_or_else(|| {
            BalancerError::sensor(format!("Required sensor {} ({}) not available", name, entity_id))
        })
    }

    async fn collect_readings(&self) -> Result<SensorReadings> {
        let sensors = &self.config.sensors;
        let pv_power = match (&sensors.pv_power, self.config.options.pv_prioritized) {
            (Some(entity_id), true) => self.host.read(entity_id).await,
            _ => None,
        };
        let battery_percentage = match &self.config.car {
            Some(car) if self.config.options.car_aware => {
                self.host.read(&car.battery_percentage).await
            }
            _ => None,
        };
        Ok(SensorReadings {
            house_power: self.read_required("house_power", &sensors.house_power).await?,
            active_power: self.read_required("active_power", &sensors.active_power).await?,
            current_input: self.read_required("current_input", &sensors.current_input).await?,
            phases_input: self.read_required("phases_input", &sensors.phases_input).await?,
            connection_state: self
                .read_required("connection_state", &sensors.connection_state)
                .await?,
            pv_power,
            battery_percentage,
        })
    }

    /// Car goal for this cycle, when car-aware charging applies
    fn car_goal(&self, sensors: &mut SensorSnapshot) -> Option<CarGoal> {
        if !self.config.options.car_aware || self.mode() == ChargingMode::Off {
            return None;
        }
        let car = self.config.car.as_ref()?;
        let target = match parse_target_time(&car.target_time) {
            Ok(t) => t,
            Err(e) => {
                self.logger
                    .warn(&format!("Skipping car-aware adjustment: {}", e));
                return None;
            }
        };
        sensors.target_time = Some(target);
        let Some(battery_percentage) = sensors.battery_percentage else {
            self.logger.warn(
                "Skipping car-aware adjustment: battery percentage is not numeric",
            );
            return None;
        };
        let now = chrono::Local::now().naive_local();
        Some(CarGoal {
            battery_percentage,
            soc_threshold: car.soc_threshold,
            battery_capacity_wh: car.battery_capacity_wh,
            hours_until_target: hours_until(target, now),
        })
    }

    /// Ask the run loop to stop after the cycle in flight
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}
