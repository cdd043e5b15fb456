use crate::model::{DeviceStateUpdate, SensorReading};
use serde::Deserialize;
use serde_json::Value;

/// Topics the bridge listens on.
#[derive(Debug, Clone)]
pub struct Topics {
    /// Raw `{temp, hum, soil}` payloads straight from the device firmware.
    pub sensor: String,
    /// Generic `{sensorData}` / `{enable}` updates.
    pub data: String,
}

/// Raw payload as published by the field device.
#[derive(Debug, Deserialize)]
struct DevicePayload {
    temp: f64,
    hum: f64,
    soil: f64,
}

impl From<DevicePayload> for SensorReading {
    fn from(p: DevicePayload) -> Self {
        SensorReading {
            temperature: p.temp,
            humidity: p.hum,
            moisture: p.soil,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SensorUpdate {
    sensor_data: SensorReading,
}

/// Shapes accepted on the generic data topic, tried in declaration order.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DataMessage {
    Sensor(SensorUpdate),
    DeviceState(DeviceStateUpdate),
}

/// An inbound message after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Reading(SensorReading),
    DeviceState(DeviceStateUpdate),
}

/// Parses and normalizes a payload received on `topic`.
///
/// Malformed JSON is an error. A well-formed payload on an unknown topic or
/// with an unknown shape yields `Ok(None)`.
pub fn normalize(
    topics: &Topics,
    topic: &str,
    payload: &[u8],
) -> Result<Option<InboundMessage>, serde_json::Error> {
    let value: Value = serde_json::from_slice(payload)?;

    let message = if topic == topics.sensor {
        serde_json::from_value::<DevicePayload>(value)
            .ok()
            .map(|p| InboundMessage::Reading(p.into()))
    } else if topic == topics.data {
        serde_json::from_value::<DataMessage>(value)
            .ok()
            .map(|m| match m {
                DataMessage::Sensor(u) => InboundMessage::Reading(u.sensor_data),
                DataMessage::DeviceState(s) => InboundMessage::DeviceState(s),
            })
    } else {
        None
    };

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceComponent;

    fn topics() -> Topics {
        Topics {
            sensor: "devices/farm-01/sensors".to_string(),
            data: "devices/farm-01/data".to_string(),
        }
    }

    #[test]
    fn test_device_payload_normalized() {
        let msg = normalize(
            &topics(),
            "devices/farm-01/sensors",
            br#"{"temp": 28.5, "hum": 61, "soil": 37.2}"#,
        )
        .unwrap();

        assert_eq!(
            msg,
            Some(InboundMessage::Reading(SensorReading {
                temperature: 28.5,
                humidity: 61.0,
                moisture: 37.2,
            }))
        );
    }

    #[test]
    fn test_sensor_update_normalized() {
        let msg = normalize(
            &topics(),
            "devices/farm-01/data",
            br#"{"sensorData": {"temperature": 20, "humidity": 50, "moisture": 45}}"#,
        )
        .unwrap();

        assert!(matches!(msg, Some(InboundMessage::Reading(r)) if r.moisture == 45.0));
    }

    #[test]
    fn test_device_state_normalized() {
        let msg = normalize(
            &topics(),
            "devices/farm-01/data",
            br#"{"state": "PUMP", "enable": true}"#,
        )
        .unwrap();

        assert_eq!(
            msg,
            Some(InboundMessage::DeviceState(DeviceStateUpdate {
                state: Some(DeviceComponent::Pump),
                enable: true,
            }))
        );
    }

    #[test]
    fn test_unknown_component_still_reports_state() {
        let msg = normalize(
            &topics(),
            "devices/farm-01/data",
            br#"{"state": "VALVE", "enable": true}"#,
        )
        .unwrap();

        assert_eq!(
            msg,
            Some(InboundMessage::DeviceState(DeviceStateUpdate {
                state: None,
                enable: true,
            }))
        );
    }

    #[test]
    fn test_sensor_update_wins_over_device_state() {
        let msg = normalize(
            &topics(),
            "devices/farm-01/data",
            br#"{"enable": false, "sensorData": {"temperature": 1, "humidity": 2, "moisture": 3}}"#,
        )
        .unwrap();

        assert!(matches!(msg, Some(InboundMessage::Reading(_))));
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(normalize(&topics(), "devices/farm-01/data", b"{not json").is_err());
    }

    #[test]
    fn test_unknown_shape_dropped() {
        let msg = normalize(&topics(), "devices/farm-01/data", br#"{"battery": 90}"#).unwrap();
        assert_eq!(msg, None);

        // generic shape on the raw topic is not accepted
        let msg = normalize(
            &topics(),
            "devices/farm-01/sensors",
            br#"{"sensorData": {"temperature": 20, "humidity": 50, "moisture": 45}}"#,
        )
        .unwrap();
        assert_eq!(msg, None);
    }

    #[test]
    fn test_unknown_topic_dropped() {
        let msg = normalize(&topics(), "other/topic", br#"{"temp": 1, "hum": 2, "soil": 3}"#)
            .unwrap();
        assert_eq!(msg, None);
    }
}
