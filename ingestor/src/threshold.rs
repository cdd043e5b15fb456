use crate::model::{Range, SafeThresholds, SensorReading};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Axis {
    Temperature,
    Humidity,
    Moisture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Bound {
    High,
    Low,
}

/// A reading outside its safe range on one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub axis: Axis,
    pub bound: Bound,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let axis = match self.axis {
            Axis::Temperature => "Temperature",
            Axis::Humidity => "Humidity",
            Axis::Moisture => "Moisture",
        };
        let bound = match self.bound {
            Bound::High => "High",
            Bound::Low => "Low",
        };
        write!(f, "{} {}", axis, bound)
    }
}

/// Compares a reading against safe ranges. Warnings come back in
/// temperature, humidity, moisture order; empty means all in range.
pub fn evaluate(reading: &SensorReading, thresholds: &SafeThresholds) -> Vec<Warning> {
    [
        (Axis::Temperature, reading.temperature, thresholds.temperature),
        (Axis::Humidity, reading.humidity, thresholds.humidity),
        (Axis::Moisture, reading.moisture, thresholds.moisture),
    ]
    .into_iter()
    .filter_map(|(axis, value, range)| check(value, range).map(|bound| Warning { axis, bound }))
    .collect()
}

fn check(value: f64, range: Range) -> Option<Bound> {
    if value > range.upper {
        Some(Bound::High)
    } else if value < range.lower {
        Some(Bound::Low)
    } else {
        None
    }
}
