use crate::config::ChargerConfig;
use crate::error::{BalancerError, Result};
use crate::host::EntityValue;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Raw sensor states collected at the start of a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReadings {
    pub house_power: EntityValue,
    pub active_power: EntityValue,
    pub current_input: EntityValue,
    pub phases_input: EntityValue,
    pub connection_state: EntityValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pv_power: Option<EntityValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_percentage: Option<EntityValue>,
}

/// Typed view of validated readings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorSnapshot {
    /// Household power in W, negative while exporting
    pub house_power: f64,
    pub active_power: f64,
    pub current_input: f64,
    pub phases_input: u8,
    pub connection_state: String,
    pub pv_power: Option<f64>,
    pub battery_percentage: Option<f64>,
    pub target_time: Option<NaiveTime>,
}

fn numeric(name: &str, value: &EntityValue) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        BalancerError::sensor(format!("{} is not numeric: '{}'", name, value))
    })
}

fn optional_numeric(value: Option<&EntityValue>) -> Option<f64> {
    value.and_then(EntityValue::as_f64)
}

/// Phase count from a phase state reported as a label or a number
pub fn parse_phases(value: &EntityValue, labels: &ChargerConfig) -> Result<u8> {
    match value {
        EntityValue::Number(n) if (*n - 3.0).abs() < f64::EPSILON => Ok(3),
        EntityValue::Number(n) if (*n - 1.0).abs() < f64::EPSILON => Ok(1),
        EntityValue::Text(t) if t == &labels.phase_three_label => Ok(3),
        EntityValue::Text(t) if t == &labels.phase_one_label => Ok(1),
        other => Err(BalancerError::sensor(format!(
            "phases_input has unexpected state '{}'",
            other
        ))),
    }
}

impl SensorReadings {
    /// Convert to typed values. Fails when a numeric sensor reports text or
    /// the phase state is not recognised.
    pub fn to_snapshot(&self, charger: &ChargerConfig) -> Result<SensorSnapshot> {
        Ok(SensorSnapshot {
            house_power: numeric("house_power", &self.house_power)?,
            active_power: numeric("active_power", &self.active_power)?,
            current_input: numeric("current_input", &self.current_input)?,
            phases_input: parse_phases(&self.phases_input, charger)?,
            connection_state: self.connection_state.to_string(),
            pv_power: optional_numeric(self.pv_power.as_ref()),
            battery_percentage: optional_numeric(self.battery_percentage.as_ref()),
            target_time: None,
        })
    }

    #[cfg(test)]
    pub(crate) fn sample() -> Self {
        Self {
            house_power: EntityValue::Number(500.0),
            active_power: EntityValue::Number(0.0),
            current_input: EntityValue::Number(0.0),
            phases_input: EntityValue::Text("1 Phase".into()),
            connection_state: EntityValue::Text("Connected".into()),
            pv_power: None,
            battery_percentage: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_numbers_and_labels() {
        let charger = ChargerConfig::default();
        let mut readings = SensorReadings::sample();
        readings.pv_power = Some(EntityValue::Text("offline".into()));
        readings.battery_percentage = Some(EntityValue::Number(61.0));
        let snap = readings.to_snapshot(&charger).unwrap();
        assert_eq!(snap.house_power, 500.0);
        assert_eq!(snap.phases_input, 1);
        assert_eq!(snap.connection_state, "Connected");
        assert_eq!(snap.pv_power, None);
        assert_eq!(snap.battery_percentage, Some(61.0));
    }

    #[test]
    fn phases_accept_labels_or_numbers() {
        let charger = ChargerConfig::default();
        assert_eq!(parse_phases(&"3 Phases".into(), &charger).unwrap(), 3);
        assert_eq!(parse_phases(&EntityValue::Number(3.0), &charger).unwrap(), 3);
        assert_eq!(parse_phases(&EntityValue::Number(1.0), &charger).unwrap(), 1);
        assert!(parse_phases(&EntityValue::Number(2.0), &charger).is_err());
        assert!(parse_phases(&"two".into(), &charger).is_err());
    }

    #[test]
    fn text_in_numeric_sensor_is_a_sensor_error() {
        let mut readings = SensorReadings::sample();
        readings.current_input = EntityValue::Text("n/a".into());
        let err = readings.to_snapshot(&ChargerConfig::default()).unwrap_err();
        assert!(matches!(err, BalancerError::Sensor { .. }));
    }
}
