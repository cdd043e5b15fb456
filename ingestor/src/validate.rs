use crate::errors::{Error, Result};
use crate::model::{PlantProfile, Range};

/// Validates a plant profile before it is stored
pub fn validate_profile(profile: &PlantProfile) -> Result<()> {
    if profile.plant_type.trim().is_empty() {
        return Err(Error::Validation("Plant type cannot be empty".to_string()));
    }

    let t = &profile.safe_thresholds;
    validate_range("Temperature", &t.temperature)?;
    validate_range("Humidity", &t.humidity)?;
    validate_range("Moisture", &t.moisture)?;

    Ok(())
}

fn validate_range(axis: &str, range: &Range) -> Result<()> {
    if !range.upper.is_finite() || !range.lower.is_finite() {
        return Err(Error::Validation(format!(
            "{} bounds must be finite numbers",
            axis
        )));
    }

    if range.upper < range.lower {
        return Err(Error::Validation(format!(
            "{} upper bound {} is below lower bound {}",
            axis, range.upper, range.lower
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SafeThresholds;

    fn profile(temperature: Range) -> PlantProfile {
        PlantProfile {
            plant_type: "tomato".to_string(),
            safe_thresholds: SafeThresholds {
                temperature,
                humidity: Range {
                    upper: 80.0,
                    lower: 20.0,
                },
                moisture: Range {
                    upper: 80.0,
                    lower: 20.0,
                },
            },
        }
    }

    #[test]
    fn test_valid_profile() {
        let p = profile(Range {
            upper: 30.0,
            lower: 10.0,
        });

        assert!(validate_profile(&p).is_ok());
    }

    #[test]
    fn test_equal_bounds_allowed() {
        let p = profile(Range {
            upper: 20.0,
            lower: 20.0,
        });

        assert!(validate_profile(&p).is_ok());
    }

    #[test]
    fn test_inverted_bounds() {
        let p = profile(Range {
            upper: 10.0,
            lower: 30.0,
        });

        assert!(validate_profile(&p).is_err());
    }

    #[test]
    fn test_non_finite_bound() {
        let p = profile(Range {
            upper: f64::INFINITY,
            lower: 10.0,
        });

        assert!(validate_profile(&p).is_err());
    }

    #[test]
    fn test_empty_plant_type() {
        let mut p = profile(Range {
            upper: 30.0,
            lower: 10.0,
        });
        p.plant_type = "  ".to_string();

        assert!(validate_profile(&p).is_err());
    }
}
