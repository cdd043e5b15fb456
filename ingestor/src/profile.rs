use crate::model::PlantProfile;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Source of the plant profile thresholds are checked against.
#[async_trait]
pub trait ProfileProvider: Send + Sync {
    /// A consistent snapshot of the active profile, if one is selected.
    async fn active_profile(&self) -> Option<PlantProfile>;
}

/// Process-wide active profile, swapped by the admin API.
#[derive(Clone, Default)]
pub struct ActiveProfile {
    inner: Arc<RwLock<Option<PlantProfile>>>,
}

impl ActiveProfile {
    pub fn new(initial: Option<PlantProfile>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    /// Replaces the active profile as a whole.
    pub async fn set(&self, profile: Option<PlantProfile>) {
        *self.inner.write().await = profile;
    }
}

#[async_trait]
impl ProfileProvider for ActiveProfile {
    async fn active_profile(&self) -> Option<PlantProfile> {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Range, SafeThresholds};

    fn profile(plant_type: &str) -> PlantProfile {
        let range = Range {
            upper: 80.0,
            lower: 20.0,
        };
        PlantProfile {
            plant_type: plant_type.to_string(),
            safe_thresholds: SafeThresholds {
                temperature: range,
                humidity: range,
                moisture: range,
            },
        }
    }

    #[test]
    fn test_set_is_visible_to_clones() {
        tokio_test::block_on(async {
            let active = ActiveProfile::default();
            let reader = active.clone();
            assert!(reader.active_profile().await.is_none());

            active.set(Some(profile("lettuce"))).await;
            assert_eq!(
                reader.active_profile().await.map(|p| p.plant_type),
                Some("lettuce".to_string())
            );

            active.set(None).await;
            assert!(reader.active_profile().await.is_none());
        });
    }
}
