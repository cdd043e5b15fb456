use crate::config::ForecastSettings;
use crate::decision::{mean_moisture, WINDOW_SIZE};
use crate::errors::Result;
use crate::mqtt::CommandPublisher;
use crate::store::TelemetryStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

const WEATHER_API_URL: &str = "https://api.open-meteo.com/v1/forecast";

/// Soil moisture reported when there is no usable history.
const DEFAULT_SOIL: f64 = 50.0;

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    current: CurrentWeather,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature_2m: f64,
    relative_humidity_2m: f64,
}

/// Payload published to the device on the forecast topic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Forecast {
    pub temp: f64,
    pub hum: f64,
    pub soil: f64,
}

impl Forecast {
    fn new(temp: f64, hum: f64, soil: f64) -> Self {
        Self {
            temp: round1(temp),
            hum: round1(hum),
            soil: round1(soil),
        }
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

pub struct ForecastPublisher {
    client: reqwest::Client,
    settings: ForecastSettings,
    topic: String,
    store: Arc<dyn TelemetryStore>,
    publisher: Arc<dyn CommandPublisher>,
}

impl ForecastPublisher {
    pub fn new(
        settings: ForecastSettings,
        topic: String,
        store: Arc<dyn TelemetryStore>,
        publisher: Arc<dyn CommandPublisher>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            settings,
            topic,
            store,
            publisher,
        })
    }

    /// Publishes a forecast immediately and then on every interval tick.
    pub async fn run(self) {
        info!(
            "Weather forecast scheduler started (every {} seconds)",
            self.settings.interval_secs
        );
        let mut ticker = interval(Duration::from_secs(self.settings.interval_secs.max(1)));

        loop {
            ticker.tick().await;
            if let Err(e) = self.publish_once().await {
                warn!("Weather forecast update failed: {}", e);
            }
        }
    }

    async fn publish_once(&self) -> Result<()> {
        let weather: WeatherResponse = self
            .client
            .get(WEATHER_API_URL)
            .query(&[
                ("latitude", self.settings.latitude.to_string()),
                ("longitude", self.settings.longitude.to_string()),
                (
                    "current",
                    "temperature_2m,relative_humidity_2m".to_string(),
                ),
                ("temperature_unit", "celsius".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let soil = self.recent_soil_moisture().await;
        let forecast = Forecast::new(
            weather.current.temperature_2m,
            weather.current.relative_humidity_2m,
            soil,
        );

        self.publisher
            .publish(&self.topic, serde_json::to_vec(&forecast)?)
            .await?;
        debug!(
            "Published forecast T:{} H:{} S:{} to {}",
            forecast.temp, forecast.hum, forecast.soil, self.topic
        );
        Ok(())
    }

    async fn recent_soil_moisture(&self) -> f64 {
        match self.store.find_most_recent(WINDOW_SIZE).await {
            Ok(records) => mean_moisture(&records).unwrap_or(DEFAULT_SOIL),
            Err(e) => {
                warn!("Failed to read soil moisture history: {}", e);
                DEFAULT_SOIL
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SensorReading, TelemetryRecord};
    use crate::store::MemoryTelemetryStore;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};

    struct NullPublisher;

    #[async_trait]
    impl CommandPublisher for NullPublisher {
        async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<()> {
            Ok(())
        }
    }

    fn publisher(store: Arc<MemoryTelemetryStore>) -> ForecastPublisher {
        ForecastPublisher::new(
            ForecastSettings {
                enabled: true,
                interval_secs: 16,
                latitude: 10.8231,
                longitude: 106.6297,
            },
            "devices/farm-01/forecast".to_string(),
            store,
            Arc::new(NullPublisher),
        )
        .unwrap()
    }

    #[test]
    fn test_forecast_rounds_to_one_decimal() {
        let forecast = Forecast::new(31.26, 74.04, 42.449);
        assert_eq!(
            serde_json::to_value(forecast).unwrap(),
            serde_json::json!({"temp": 31.3, "hum": 74.0, "soil": 42.4})
        );
    }

    #[test]
    fn test_soil_defaults_without_history() {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryTelemetryStore::new());
            assert_eq!(publisher(store).recent_soil_moisture().await, DEFAULT_SOIL);
        });
    }

    #[test]
    fn test_soil_averages_recent_records() {
        tokio_test::block_on(async {
            let store = Arc::new(MemoryTelemetryStore::new());
            let now = Utc::now();
            for (i, moisture) in [30.0, 40.0].into_iter().enumerate() {
                let record = TelemetryRecord::new(
                    SensorReading {
                        temperature: 25.0,
                        humidity: 60.0,
                        moisture,
                    },
                    now + ChronoDuration::seconds(i as i64),
                );
                store.save(&record).await.unwrap();
            }

            assert_eq!(publisher(store).recent_soil_moisture().await, 35.0);
        });
    }
}
