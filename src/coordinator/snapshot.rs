use crate::balancer::{ChargingMode, SensorReadings, Targets};
use serde::{Deserialize, Serialize};

/// How the most recent cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// No cycle has finished yet
    Pending,
    /// Targets matched the outputs; nothing was commanded
    Unchanged,
    /// New targets were commanded and confirmed
    Applied,
    /// A required sensor was unavailable; outputs were left alone
    SensorsUnavailable,
    /// The charger reported its error state; outputs were left alone
    ChargerError,
    /// Collection or actuation failed; data is from the last good cycle
    Failed,
}

/// Data published to observers at the end of every cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargerSnapshot {
    pub timestamp: String,
    pub mode: ChargingMode,
    pub readings: Option<SensorReadings>,
    pub efficiency: Option<f64>,
    pub available_power: Option<f64>,
    pub phase_selection: Option<u8>,
    pub current_limit: Option<f64>,
    pub in_error_state: bool,
    pub phase_switching_active: bool,
    pub cooldown_remaining_secs: Option<u64>,
    pub outcome: CycleOutcome,
    pub last_error: Option<String>,
    pub total_cycles: u64,
    pub skipped_cycles: u64,
    pub failed_cycles: u64,
    pub poll_duration_ms: Option<u64>,
    pub poll_interval_ms: u64,
}

impl ChargerSnapshot {
    /// Snapshot published before the first cycle
    pub fn initial(mode: ChargingMode, poll_interval_ms: u64) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            mode,
            readings: None,
            efficiency: None,
            available_power: None,
            phase_selection: None,
            current_limit: None,
            in_error_state: false,
            phase_switching_active: false,
            cooldown_remaining_secs: None,
            outcome: CycleOutcome::Pending,
            last_error: None,
            total_cycles: 0,
            skipped_cycles: 0,
            failed_cycles: 0,
            poll_duration_ms: None,
            poll_interval_ms,
        }
    }

    pub fn with_targets(mut self, targets: &Targets) -> Self {
        self.efficiency = Some(targets.efficiency);
        self.available_power = Some(targets.available_power);
        self.phase_selection = Some(targets.phase_selection);
        self.current_limit = Some(targets.current_limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_outcome_and_targets() {
        let targets = Targets {
            efficiency: 1.0,
            available_power: 1000.0,
            phase_selection: 1,
            current_limit: 0.0,
        };
        let snap = ChargerSnapshot::initial(ChargingMode::Eco, 10_000).with_targets(&targets);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["mode"], "Eco");
        assert_eq!(json["outcome"], "pending");
        assert_eq!(json["available_power"], 1000.0);
        assert_eq!(json["phase_selection"], 1);
        assert!(json["readings"].is_null());
    }
}
