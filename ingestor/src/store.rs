use crate::errors::{Error, Result};
use crate::model::TelemetryRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Append-only log of telemetry records keyed by timestamp.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Appends a record. Fails with `Error::DuplicateTimestamp` if a record
    /// with the same timestamp already exists; the existing one is kept.
    async fn save(&self, record: &TelemetryRecord) -> Result<()>;

    /// Up to `n` records, newest first.
    async fn find_most_recent(&self, n: usize) -> Result<Vec<TelemetryRecord>>;
}

/// In-process store for exercising the pipeline without Postgres.
#[derive(Default)]
pub struct MemoryTelemetryStore {
    records: RwLock<BTreeMap<DateTime<Utc>, TelemetryRecord>>,
}

impl MemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl TelemetryStore for MemoryTelemetryStore {
    async fn save(&self, record: &TelemetryRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.timestamp) {
            return Err(Error::DuplicateTimestamp(record.timestamp));
        }
        records.insert(record.timestamp, record.clone());
        Ok(())
    }

    async fn find_most_recent(&self, n: usize) -> Result<Vec<TelemetryRecord>> {
        let records = self.records.read().await;
        Ok(records.values().rev().take(n).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SensorReading;
    use chrono::Duration;

    fn reading(moisture: f64) -> SensorReading {
        SensorReading {
            temperature: 22.0,
            humidity: 55.0,
            moisture,
        }
    }

    #[test]
    fn test_duplicate_timestamp_keeps_first() {
        tokio_test::block_on(async {
            let store = MemoryTelemetryStore::new();
            let at = Utc::now();

            let first = TelemetryRecord::new(reading(30.0), at);
            let second = TelemetryRecord::new(reading(70.0), at);

            assert!(store.save(&first).await.is_ok());
            assert!(matches!(
                store.save(&second).await,
                Err(Error::DuplicateTimestamp(ts)) if ts == first.timestamp
            ));

            let stored = store.find_most_recent(10).await.unwrap();
            assert_eq!(stored, vec![first]);
        });
    }

    #[test]
    fn test_most_recent_is_newest_first() {
        tokio_test::block_on(async {
            let store = MemoryTelemetryStore::new();
            let base = Utc::now();

            // inserted out of order
            for offset in [3, 1, 4, 0, 2, 5] {
                let record =
                    TelemetryRecord::new(reading(offset as f64), base + Duration::seconds(offset));
                store.save(&record).await.unwrap();
            }

            let recent = store.find_most_recent(3).await.unwrap();
            let moisture: Vec<f64> = recent.iter().map(|r| r.data.moisture).collect();
            assert_eq!(moisture, vec![5.0, 4.0, 3.0]);
            assert_eq!(store.len().await, 6);
        });
    }

    #[test]
    fn test_most_recent_on_empty_store() {
        tokio_test::block_on(async {
            let store = MemoryTelemetryStore::new();
            assert!(store.find_most_recent(5).await.unwrap().is_empty());
        });
    }
}
