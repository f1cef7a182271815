use crate::error::{BalancerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the budget for charging is derived each cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChargingMode {
    #[default]
    #[serde(rename = "Off")]
    Off,
    #[serde(rename = "Minimal 1.4kW")]
    MinimalOnePhase,
    #[serde(rename = "Minimal 4kW")]
    MinimalThreePhase,
    #[serde(rename = "Eco")]
    Eco,
    #[serde(rename = "Fast")]
    Fast,
    #[serde(rename = "Solar")]
    Solar,
}

impl ChargingMode {
    pub const ALL: [ChargingMode; 6] = [
        ChargingMode::Off,
        ChargingMode::MinimalOnePhase,
        ChargingMode::MinimalThreePhase,
        ChargingMode::Eco,
        ChargingMode::Fast,
        ChargingMode::Solar,
    ];

    /// Label shown to operators and accepted by the mode service
    pub fn label(&self) -> &'static str {
        match self {
            ChargingMode::Off => "Off",
            ChargingMode::MinimalOnePhase => "Minimal 1.4kW",
            ChargingMode::MinimalThreePhase => "Minimal 4kW",
            ChargingMode::Eco => "Eco",
            ChargingMode::Fast => "Fast",
            ChargingMode::Solar => "Solar",
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            ChargingMode::Off => "Off",
            ChargingMode::MinimalOnePhase => "MinimalOnePhase",
            ChargingMode::MinimalThreePhase => "MinimalThreePhase",
            ChargingMode::Eco => "Eco",
            ChargingMode::Fast => "Fast",
            ChargingMode::Solar => "Solar",
        }
    }
}

impl fmt::Display for ChargingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ChargingMode {
    type Err = BalancerError;

    /// Accepts the operator label exactly or the variant name in any case
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        ChargingMode::ALL
            .into_iter()
            .find(|m| m.label() == s || m.variant_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let labels: Vec<&str> = ChargingMode::ALL.iter().map(|m| m.label()).collect();
                BalancerError::validation(
                    "mode",
                    format!("Unknown mode '{}', expected one of: {}", s, labels.join(", ")),
                )
            })
    }
}
