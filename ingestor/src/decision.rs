use crate::model::{PumpDecision, TelemetryRecord};
use thiserror::Error;

/// Number of most recent records the pump decision averages over.
pub const WINDOW_SIZE: usize = 5;

/// Mean soil moisture at or below which the pump is switched on.
pub const MOISTURE_ON_THRESHOLD: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("pump decision needs exactly {WINDOW_SIZE} valid moisture samples, got {valid}")]
pub struct InsufficientData {
    pub valid: usize,
}

/// Decides the pump state from a window of exactly `WINDOW_SIZE` records.
///
/// Non-finite moisture samples are excluded. The mean is only taken over a
/// full window of valid samples; a window of any other length, or one with
/// invalid samples, is `InsufficientData`.
pub fn decide(window: &[TelemetryRecord]) -> Result<PumpDecision, InsufficientData> {
    let values: Vec<f64> = window
        .iter()
        .map(|r| r.data.moisture)
        .filter(|m| m.is_finite())
        .collect();

    if window.len() != WINDOW_SIZE || values.len() != WINDOW_SIZE {
        return Err(InsufficientData {
            valid: values.len(),
        });
    }

    let avg = values.iter().sum::<f64>() / WINDOW_SIZE as f64;
    if avg <= MOISTURE_ON_THRESHOLD {
        Ok(PumpDecision::On)
    } else {
        Ok(PumpDecision::Off)
    }
}

/// Mean over the valid samples in `window`, `None` if there are none.
pub fn mean_moisture(window: &[TelemetryRecord]) -> Option<f64> {
    let values: Vec<f64> = window
        .iter()
        .map(|r| r.data.moisture)
        .filter(|m| m.is_finite())
        .collect();

    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
