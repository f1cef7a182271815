//! Operator actions
//!
//! Changing the charging mode and setting current and phases directly. Inputs
//! are validated before anything touches the outputs.

use crate::balancer::{ChargingMode, parse_phases};
use crate::coordinator::{ActuationPlan, Coordinator};
use crate::error::{BalancerError, Result};
use serde::{Deserialize, Serialize};

/// Phase counts the charger can be switched to
pub const ALLOWED_PHASES: [u8; 2] = [1, 3];

/// Current range an operator may request, further narrowed by the
/// configured limits
pub const OPERATOR_CURRENT_RANGE: (f64, f64) = (6.0, 16.0);

/// Direct request for a charging current and phase count
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChargingRequest {
    pub current: f64,
    pub phases: u8,
}

impl ChargingRequest {
    pub fn validate(&self, min_current: f64, max_current: f64) -> Result<()> {
        let (floor, ceiling) = OPERATOR_CURRENT_RANGE;
        let min_current = min_current.max(floor);
        let max_current = max_current.min(ceiling);
        if !self.current.is_finite() || self.current < min_current || self.current > max_current {
            return Err(BalancerError::validation(
                "current",
                format!("must be within {}..={} A", min_current, max_current),
            ));
        }
        if !ALLOWED_PHASES.contains(&self.phases) {
            return Err(BalancerError::validation("phases", "must be 1 or 3"));
        }
        Ok(())
    }
}

/// Parse an operator supplied mode label
pub fn parse_mode(raw: &str) -> Result<ChargingMode> {
    raw.parse()
}

impl Coordinator {
    /// Switch the charging mode. Takes effect on the next cycle.
    pub fn set_mode(&self, mode: ChargingMode) {
        self.with_balancer(|lb| lb.set_mode(mode));
    }

    pub fn set_mode_label(&self, raw: &str) -> Result<ChargingMode> {
        let mode = parse_mode(raw)?;
        self.set_mode(mode);
        Ok(mode)
    }

    /// Apply a current and phase count right away, through the same
    /// de-energize and confirm sequence the control cycle uses.
    ///
    /// Fails with `Busy` while a cycle is in flight. The next cycle re-decides
    /// from the configured mode.
    pub async fn set_charging(&self, request: ChargingRequest) -> Result<()> {
        let limits = &self.config().limits;
        request.validate(limits.min_current, limits.max_current)?;

        let Ok(_guard) = self.cycle_lock.try_lock() else {
            return Err(BalancerError::busy(
                "A control cycle is in progress; try again shortly",
            ));
        };

        let entity_id = &self.config().sensors.phases_input;
        let observed = self.host.read(entity_id).await.ok_or_else(|| {
            BalancerError::sensor(format!("Phase input {} not available", entity_id))
        })?;
        let observed_phases = parse_phases(&observed, &self.config().charger)?;

        let plan = ActuationPlan {
            target_current: request.current,
            target_phases: request.phases,
            observed_phases,
        };
        self.logger.info(&format!(
            "Operator request: {:.1} A on {} phase(s)",
            request.current, request.phases
        ));
        self.actuate(&plan).await
    }
}
