use rand::Rng;
use serde::{Deserialize, Serialize};

/// Raw reading in the shape the field firmware publishes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicePayload {
    pub temp: f64,
    pub hum: f64,
    pub soil: f64,
}

/// Pump state report sent back after a command is applied
#[derive(Debug, Clone, Serialize)]
pub struct PumpState {
    pub state: &'static str,
    pub enable: bool,
}

impl PumpState {
    pub fn new(enable: bool) -> Self {
        Self {
            state: "PUMP",
            enable,
        }
    }
}

/// Command relayed from a dashboard
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceCommand {
    Pump(bool),
    ToggleAuto(bool),
    SetThreshold(serde_json::Value),
}

/// Slowly drifting soil with occasional out-of-range spikes.
pub struct Field {
    pub soil: f64,
    pub pump_on: bool,
}

impl Field {
    pub fn new(soil: f64) -> Self {
        Self {
            soil,
            pump_on: false,
        }
    }

    pub fn sample(&mut self, rng: &mut impl Rng) -> DevicePayload {
        // Soil dries out on its own and recovers while the pump runs
        if self.pump_on {
            self.soil = (self.soil + rng.gen_range(1.0..3.0)).min(95.0);
        } else {
            self.soil = (self.soil - rng.gen_range(0.2..1.0)).max(5.0);
        }

        let temp = if rng.gen_bool(0.05) {
            rng.gen_range(35.0..45.0) // 5% heat spikes
        } else {
            rng.gen_range(18.0..32.0)
        };

        let hum = if rng.gen_bool(0.05) {
            rng.gen_range(5.0..20.0) // 5% dry air
        } else {
            rng.gen_range(40.0..80.0)
        };

        DevicePayload {
            temp,
            hum,
            soil: self.soil,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soil_rises_while_pumping() {
        let mut rng = rand::thread_rng();
        let mut field = Field::new(30.0);
        field.pump_on = true;

        let before = field.soil;
        let sample = field.sample(&mut rng);
        assert!(sample.soil > before);
    }

    #[test]
    fn test_soil_dries_without_pump() {
        let mut rng = rand::thread_rng();
        let mut field = Field::new(30.0);

        let sample = field.sample(&mut rng);
        assert!(sample.soil < 30.0);
        assert!(sample.soil >= 5.0);
    }

    #[test]
    fn test_pump_state_wire_format() {
        let json = serde_json::to_string(&PumpState::new(true)).unwrap();
        assert_eq!(json, r#"{"state":"PUMP","enable":true}"#);
    }

    #[test]
    fn test_dashboard_command_parsed() {
        let command: DeviceCommand =
            serde_json::from_str(r#"{"action": "PUMP", "value": false}"#).unwrap();
        assert_eq!(command, DeviceCommand::Pump(false));

        let command: DeviceCommand =
            serde_json::from_str(r#"{"action": "TOGGLE_AUTO", "value": true}"#).unwrap();
        assert_eq!(command, DeviceCommand::ToggleAuto(true));
    }
}
