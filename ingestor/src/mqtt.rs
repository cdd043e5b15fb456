use crate::config::MqttSettings;
use crate::errors::{Error, Result};
use crate::metrics::{CHANNEL_FULL_TOTAL, MESSAGES_TOTAL};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, Transport};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A publish as received from the broker, before any parsing.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Outbound side of the transport.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}

#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CommandPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(Error::Mqtt)
    }
}

pub fn connect(settings: &MqttSettings, client_id: String) -> (AsyncClient, EventLoop) {
    info!(
        "Connecting to MQTT broker at {}:{}",
        settings.broker, settings.port
    );

    let mut mqtt_options = MqttOptions::new(client_id, settings.broker.clone(), settings.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);
    if let Some(username) = &settings.username {
        mqtt_options.set_credentials(
            username.clone(),
            settings.password.clone().unwrap_or_default(),
        );
    }
    if settings.tls {
        mqtt_options.set_transport(Transport::tls_with_default_config());
    }

    AsyncClient::new(mqtt_options, 1000)
}

/// Drives the MQTT event loop, forwarding every publish on `topics` to `tx`
/// in arrival order. Subscriptions are re-issued on every (re)connect.
pub async fn run_mqtt(
    client: AsyncClient,
    mut eventloop: EventLoop,
    topics: Vec<String>,
    tx: mpsc::Sender<RawMessage>,
) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to MQTT broker");
                for topic in &topics {
                    client
                        .subscribe(topic.as_str(), QoS::AtMostOnce)
                        .await
                        .map_err(Error::Mqtt)?;
                    info!("Subscribed to {}", topic);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                MESSAGES_TOTAL.inc();

                debug!(
                    "Received message on topic {}, size: {} bytes",
                    publish.topic,
                    publish.payload.len()
                );

                let message = RawMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                forward(message, &tx).await?;
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Hands a message to the pipeline, waiting for room if the channel is full.
async fn forward(message: RawMessage, tx: &mpsc::Sender<RawMessage>) -> Result<()> {
    match tx.try_send(message) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(message)) => {
            CHANNEL_FULL_TOTAL.inc();
            warn!("Pipeline channel full, waiting");
            tx.send(message).await.map_err(|_| Error::ChannelSend)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            error!("Channel closed, cannot forward message");
            Err(Error::ChannelSend)
        }
    }
}
