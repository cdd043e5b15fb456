use crate::errors::Result;
use crate::metrics::{DASHBOARD_COMMANDS_TOTAL, WS_SESSIONS};
use crate::model::{DeviceCommand, DeviceStateUpdate, SensorReading, TelemetryRecord};
use crate::mqtt::CommandPublisher;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

/// Readings a newly connected dashboard receives up front.
pub const RECENT_READINGS: usize = 20;

/// Event pushed to dashboard sessions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DashboardEvent {
    #[serde(rename_all = "camelCase")]
    SensorUpdate { sensor_data: SensorReading },
    DeviceState(DeviceStateUpdate),
}

/// Sent once to every new session before live events.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(rename = "type")]
    kind: &'static str,
    pub readings: Vec<SensorReading>,
    pub device_state: Option<DeviceStateUpdate>,
}

/// Fan-out of live updates to dashboard sessions.
pub trait BroadcastChannel: Send + Sync {
    fn broadcast_reading(&self, reading: &SensorReading);
    fn broadcast_device_state(&self, update: &DeviceStateUpdate);
}

#[derive(Default)]
struct LastValues {
    readings: VecDeque<SensorReading>,
    device_state: Option<DeviceStateUpdate>,
}

/// Broadcast hub with a last-value cache for late joiners.
#[derive(Clone)]
pub struct Hub {
    tx: broadcast::Sender<DashboardEvent>,
    last: Arc<Mutex<LastValues>>,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            last: Arc::new(Mutex::new(LastValues::default())),
        }
    }

    /// Seeds the recent-readings cache from `records`, newest first.
    pub fn seed(&self, records: &[TelemetryRecord]) {
        if let Ok(mut last) = self.last.lock() {
            last.readings = records
                .iter()
                .take(RECENT_READINGS)
                .rev()
                .map(|r| r.data)
                .collect();
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Snapshot {
        let (readings, device_state) = match self.last.lock() {
            Ok(last) => (last.readings.iter().copied().collect(), last.device_state),
            Err(_) => (Vec::new(), None),
        };
        Snapshot {
            kind: "snapshot",
            readings,
            device_state,
        }
    }

    fn send(&self, event: DashboardEvent) {
        // Err only means no session is connected right now.
        if let Err(e) = self.tx.send(event) {
            debug!("No dashboard sessions to receive update: {}", e);
        }
    }
}

impl BroadcastChannel for Hub {
    fn broadcast_reading(&self, reading: &SensorReading) {
        if let Ok(mut last) = self.last.lock() {
            last.readings.push_back(*reading);
            while last.readings.len() > RECENT_READINGS {
                last.readings.pop_front();
            }
        }
        self.send(DashboardEvent::SensorUpdate {
            sensor_data: *reading,
        });
    }

    fn broadcast_device_state(&self, update: &DeviceStateUpdate) {
        if let Ok(mut last) = self.last.lock() {
            last.device_state = Some(*update);
        }
        self.send(DashboardEvent::DeviceState(*update));
    }
}

/// Forwards dashboard commands to the device command topic.
#[derive(Clone)]
pub struct CommandRelay {
    publisher: Arc<dyn CommandPublisher>,
    topic: String,
}

impl CommandRelay {
    pub fn new(publisher: Arc<dyn CommandPublisher>, topic: String) -> Self {
        Self { publisher, topic }
    }

    /// Parses one dashboard frame and publishes it to the device.
    pub async fn relay(&self, frame: &str) -> Result<DeviceCommand> {
        let command: DeviceCommand = serde_json::from_str(frame)?;
        self.publisher
            .publish(&self.topic, serde_json::to_vec(&command)?)
            .await?;
        info!("Relayed dashboard command {:?} to {}", command, self.topic);
        Ok(command)
    }
}

#[derive(Clone)]
struct DashboardState {
    hub: Hub,
    relay: CommandRelay,
}

pub fn create_router(hub: Hub, relay: CommandRelay) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(DashboardState { hub, relay })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<DashboardState>) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, state.hub, state.relay))
}

async fn run_session(mut socket: WebSocket, hub: Hub, relay: CommandRelay) {
    let mut rx = hub.subscribe();
    WS_SESSIONS.inc();
    info!("Dashboard session connected");

    if let Ok(text) = serde_json::to_string(&hub.snapshot()) {
        if socket.send(Message::Text(text)).await.is_err() {
            WS_SESSIONS.dec();
            return;
        }
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Failed to encode dashboard event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Dashboard session lagged, skipped {} updates", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => match relay.relay(&text).await {
                        Ok(_) => DASHBOARD_COMMANDS_TOTAL.with_label_values(&["relayed"]).inc(),
                        Err(e) => {
                            warn!("Rejected dashboard command: {}", e);
                            DASHBOARD_COMMANDS_TOTAL.with_label_values(&["rejected"]).inc();
                        }
                    },
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    WS_SESSIONS.dec();
    info!("Dashboard session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::model::DeviceComponent;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl CommandPublisher for RecordingPublisher {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
            self.sent.lock().unwrap().push((topic.to_string(), payload));
            Ok(())
        }
    }

    const COMMAND_TOPIC: &str = "devices/farm-01/commands";

    fn reading(moisture: f64) -> SensorReading {
        SensorReading {
            temperature: 24.0,
            humidity: 58.0,
            moisture,
        }
    }

    #[test]
    fn test_reading_reaches_subscriber() {
        let hub = Hub::new(16);
        let mut rx = hub.subscribe();

        hub.broadcast_reading(&reading(42.0));

        assert_eq!(
            rx.try_recv().unwrap(),
            DashboardEvent::SensorUpdate {
                sensor_data: reading(42.0)
            }
        );
    }

    #[test]
    fn test_broadcast_without_sessions_is_harmless() {
        let hub = Hub::new(16);
        hub.broadcast_reading(&reading(42.0));
        hub.broadcast_device_state(&DeviceStateUpdate {
            state: None,
            enable: true,
        });

        let snapshot = hub.snapshot();
        assert_eq!(snapshot.readings.len(), 1);
        assert_eq!(snapshot.device_state.map(|s| s.enable), Some(true));
    }

    #[test]
    fn test_recent_readings_are_capped() {
        let hub = Hub::new(16);
        for i in 0..(RECENT_READINGS + 5) {
            hub.broadcast_reading(&reading(i as f64));
        }

        let snapshot = hub.snapshot();
        assert_eq!(snapshot.readings.len(), RECENT_READINGS);
        assert_eq!(snapshot.readings[0].moisture, 5.0);
    }

    #[test]
    fn test_seed_orders_oldest_first() {
        let hub = Hub::new(16);
        let now = Utc::now();
        let records: Vec<TelemetryRecord> = (0..3)
            .map(|i| TelemetryRecord::new(reading(i as f64), now - Duration::seconds(i)))
            .collect();

        hub.seed(&records);

        let moisture: Vec<f64> = hub.snapshot().readings.iter().map(|r| r.moisture).collect();
        assert_eq!(moisture, vec![2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_event_wire_format() {
        let event = DashboardEvent::DeviceState(DeviceStateUpdate {
            state: Some(DeviceComponent::Pump),
            enable: false,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "deviceState", "state": "PUMP", "enable": false})
        );

        let event = DashboardEvent::SensorUpdate {
            sensor_data: reading(30.0),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "sensorUpdate");
        assert_eq!(json["sensorData"]["moisture"], 30.0);
    }

    #[test]
    fn test_dashboard_command_relayed_to_device() {
        let publisher = Arc::new(RecordingPublisher::default());
        let relay = CommandRelay::new(publisher.clone(), COMMAND_TOPIC.to_string());

        let command = tokio_test::block_on(relay.relay(r#"{"action": "PUMP", "value": true}"#))
            .unwrap();
        assert_eq!(command, DeviceCommand::Pump(true));

        let sent = publisher.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, COMMAND_TOPIC);
        let payload: serde_json::Value = serde_json::from_slice(&sent[0].1).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({"action": "PUMP", "value": true})
        );
    }

    #[test]
    fn test_threshold_command_carries_values() {
        let publisher = Arc::new(RecordingPublisher::default());
        let relay = CommandRelay::new(publisher.clone(), COMMAND_TOPIC.to_string());

        let frame = r#"{"action": "SET_THRESHOLD", "value": {"temperature": 30, "humidity": 70, "moisture": 35}}"#;
        let command = tokio_test::block_on(relay.relay(frame)).unwrap();

        assert!(matches!(command, DeviceCommand::SetThreshold(r) if r.moisture == 35.0));
        assert_eq!(publisher.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_command_not_published() {
        let publisher = Arc::new(RecordingPublisher::default());
        let relay = CommandRelay::new(publisher.clone(), COMMAND_TOPIC.to_string());

        for frame in [r#"{"action": "REBOOT", "value": true}"#, "ping", r#"{"action": "PUMP"}"#] {
            let result = tokio_test::block_on(relay.relay(frame));
            assert!(matches!(result, Err(Error::Json(_))), "{} accepted", frame);
        }
        assert!(publisher.sent.lock().unwrap().is_empty());
    }
}
