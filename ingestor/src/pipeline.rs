//! Per-message orchestration of the telemetry bridge.
//!
//! Each inbound message is normalized, then a sensor reading is persisted,
//! fed to the pump decision, checked against the active plant profile and
//! broadcast to dashboards. Persistence completes before the decision reads
//! the store. Alerts go out on a spawned task so a slow or failing mail/SMS
//! provider never holds up the next message.

use crate::broadcast::BroadcastChannel;
use crate::decision::{decide, WINDOW_SIZE};
use crate::errors::Error;
use crate::inbound::{normalize, InboundMessage, Topics};
use crate::metrics::{
    DUPLICATE_TIMESTAMPS_TOTAL, INGEST_LATENCY_SECONDS, MALFORMED_MESSAGES_TOTAL,
    PUMP_COMMANDS_TOTAL, RECORDS_SAVED_TOTAL, UNRECOGNIZED_MESSAGES_TOTAL, WARNINGS_TOTAL,
};
use crate::model::{PumpDecision, SensorReading, TelemetryRecord};
use crate::mqtt::{CommandPublisher, RawMessage};
use crate::notify::{NotificationDispatcher, RecipientDirectory};
use crate::profile::ProfileProvider;
use crate::store::TelemetryStore;
use crate::threshold::{evaluate, Warning};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Collaborators the pipeline drives.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn TelemetryStore>,
    pub profiles: Arc<dyn ProfileProvider>,
    pub recipients: Arc<dyn RecipientDirectory>,
    pub notifier: Arc<dyn NotificationDispatcher>,
    pub broadcast: Arc<dyn BroadcastChannel>,
    pub publisher: Arc<dyn CommandPublisher>,
}

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Malformed,
    Unrecognized,
    DeviceState,
    Reading {
        saved: bool,
        decision: Option<PumpDecision>,
        warnings: Vec<Warning>,
    },
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct Pipeline {
    topics: Topics,
    pump_topic: String,
    services: Services,
    clock: Clock,
}

impl Pipeline {
    pub fn new(topics: Topics, pump_topic: String, services: Services) -> Self {
        Self {
            topics,
            pump_topic,
            services,
            clock: Box::new(Utc::now),
        }
    }

    /// Replaces the source of record timestamps.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    /// Consumes messages in arrival order until every sender is gone, then
    /// returns once the queue is drained.
    pub async fn run(self, mut rx: mpsc::Receiver<RawMessage>) {
        info!("Pipeline started");

        while let Some(message) = rx.recv().await {
            self.handle_message(&message.topic, &message.payload).await;
        }

        info!("Channel closed, pipeline drained");
    }

    /// Processes one message. Never fails; problems are logged and reflected
    /// in the returned outcome.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> Outcome {
        let message = match normalize(&self.topics, topic, payload) {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("Dropping unrecognized message on {}", topic);
                UNRECOGNIZED_MESSAGES_TOTAL.inc();
                return Outcome::Unrecognized;
            }
            Err(e) => {
                warn!("Dropping malformed message on {}: {}", topic, e);
                MALFORMED_MESSAGES_TOTAL.inc();
                return Outcome::Malformed;
            }
        };

        match message {
            InboundMessage::Reading(reading) => self.handle_reading(reading).await,
            InboundMessage::DeviceState(update) => {
                debug!("Device state update: enable={}", update.enable);
                self.services.broadcast.broadcast_device_state(&update);
                Outcome::DeviceState
            }
        }
    }

    async fn handle_reading(&self, reading: SensorReading) -> Outcome {
        debug!(
            "Reading T:{}C H:{}% M:{}%",
            reading.temperature, reading.humidity, reading.moisture
        );
        let start = Instant::now();

        let record = TelemetryRecord::new(reading, (self.clock)());
        let saved = match self.services.store.save(&record).await {
            Ok(()) => {
                RECORDS_SAVED_TOTAL.inc();
                true
            }
            Err(Error::DuplicateTimestamp(ts)) => {
                warn!("Record at {} already stored, reading dropped", ts);
                DUPLICATE_TIMESTAMPS_TOTAL.inc();
                false
            }
            Err(e) => {
                error!("Failed to persist reading: {}", e);
                false
            }
        };

        let decision = self.decide_and_publish().await;
        INGEST_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());

        let warnings = self.check_thresholds(&reading).await;
        if !warnings.is_empty() {
            self.spawn_alert(warnings.clone(), reading);
        }

        self.services.broadcast.broadcast_reading(&reading);

        Outcome::Reading {
            saved,
            decision,
            warnings,
        }
    }

    async fn decide_and_publish(&self) -> Option<PumpDecision> {
        let window = match self.services.store.find_most_recent(WINDOW_SIZE).await {
            Ok(window) => window,
            Err(e) => {
                error!("Failed to load recent records for pump decision: {}", e);
                return None;
            }
        };

        if window.len() < WINDOW_SIZE {
            debug!(
                "Only {} records stored, need {} for a pump decision",
                window.len(),
                WINDOW_SIZE
            );
            return None;
        }

        let decision = match decide(&window) {
            Ok(decision) => decision,
            Err(e) => {
                info!("Skipping pump decision: {}", e);
                return None;
            }
        };

        let command = decision.as_command();
        match self
            .services
            .publisher
            .publish(&self.pump_topic, command.as_bytes().to_vec())
            .await
        {
            Ok(()) => {
                PUMP_COMMANDS_TOTAL.with_label_values(&[command]).inc();
                info!("Published pump command {} to {}", command, self.pump_topic);
            }
            Err(e) => error!("Failed to publish pump command {}: {}", command, e),
        }

        Some(decision)
    }

    async fn check_thresholds(&self, reading: &SensorReading) -> Vec<Warning> {
        let Some(profile) = self.services.profiles.active_profile().await else {
            debug!("No active plant profile, skipping threshold check");
            return Vec::new();
        };

        let warnings = evaluate(reading, &profile.safe_thresholds);
        if !warnings.is_empty() {
            WARNINGS_TOTAL.inc_by(warnings.len() as f64);
            warn!(
                "Reading outside safe range for {}: {:?}",
                profile.plant_type,
                warnings.iter().map(ToString::to_string).collect::<Vec<_>>()
            );
        }
        warnings
    }

    fn spawn_alert(&self, warnings: Vec<Warning>, reading: SensorReading) {
        let recipients = self.services.recipients.clone();
        let notifier = self.services.notifier.clone();

        tokio::spawn(async move {
            let recipients = match recipients.recipients().await {
                Ok(recipients) => recipients,
                Err(e) => {
                    error!("Failed to load alert recipients: {}", e);
                    return;
                }
            };
            if recipients.is_empty() {
                debug!("No alert recipients registered");
                return;
            }
            notifier.notify(&recipients, &warnings, &reading).await;
        });
    }
}
