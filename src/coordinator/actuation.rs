use super::Coordinator;
use super::confirm::wait_for_value;
use crate::error::{BalancerError, Result};
use crate::host::EntityValue;
use serde::Serialize;

/// Outputs to reach in one actuation sequence
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActuationPlan {
    pub target_current: f64,
    pub target_phases: u8,
    /// Phase count the charger reported when the plan was made
    pub observed_phases: u8,
}

impl ActuationPlan {
    pub fn switches_phases(&self) -> bool {
        self.target_phases != self.observed_phases
    }
}

impl Coordinator {
    /// Apply `plan` to the outputs.
    ///
    /// A phase change always de-energizes first: current to 0 and confirmed,
    /// settle, phase label and confirmed, settle. The cooldown starts as soon
    /// as the new phase count is confirmed. The target current is commanded
    /// last. The first step that fails ends the sequence and outputs stay
    /// where they are.
    pub(crate) async fn actuate(&self, plan: &ActuationPlan) -> Result<()> {
        let controls = &self.config.controls;
        let settle = self.config.timing.settle();

        if plan.switches_phases() {
            self.logger.info(&format!(
                "Phase switch initiated: {} -> {}. Stopping charging for safety.",
                plan.observed_phases, plan.target_phases
            ));
            self.command_and_confirm("de-energize", &controls.current_output, EntityValue::Number(0.0))
                .await?;
            self.logger
                .debug("Charging stopped, proceeding with phase change");
            tokio::time::sleep(settle).await;

            let label = self.config.charger.phase_label(plan.target_phases).to_string();
            self.command_and_confirm("phase switch", &controls.phases_output, EntityValue::Text(label))
                .await?;
            self.balancer().start_phase_switching_cooldown();
            tokio::time::sleep(settle).await;
            self.logger.info(&format!(
                "Phase switch to {} completed, restarting charging",
                plan.target_phases
            ));
        }

        self.command_and_confirm(
            "current",
            &controls.current_output,
            EntityValue::Number(plan.target_current),
        )
        .await?;
        self.logger.info(&format!(
            "Charger set to {:.2} A on {} phase(s)",
            plan.target_current, plan.target_phases
        ));
        Ok(())
    }

    async fn command_and_confirm(&self, step: &str, entity_id: &str, value: EntityValue) -> Result<()> {
        self.host
            .set_value(entity_id, value.clone())
            .await
            .map_err(|e| {
                BalancerError::actuation(format!("{} command to {} failed: {}", step, entity_id, e))
            })?;

        let timeout = self.config.timing.confirm_timeout();
        let confirmed = wait_for_value(
            self.host.as_ref(),
            entity_id,
            &value,
            timeout,
            self.config.charger.confirm_tolerance,
        )
        .await;
        if !confirmed {
            return Err(BalancerError::timeout(format!(
                "{}: {} did not report {} within {:?}",
                step, entity_id, value, timeout
            )));
        }
        self.logger
            .debug(&format!("{}: {} confirmed at {}", step, entity_id, value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_detects_phase_change() {
        let plan = ActuationPlan {
            target_current: 8.0,
            target_phases: 3,
            observed_phases: 1,
        };
        assert!(plan.switches_phases());
        let plan = ActuationPlan {
            observed_phases: 3,
            ..plan
        };
        assert!(!plan.switches_phases());
    }
}
