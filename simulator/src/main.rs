mod telemetry;

use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry::{DeviceCommand, Field, PumpState};
use tracing::{debug, error, info, warn};

/// Simulated field device for the smart-farm bridge
#[derive(Debug, Parser)]
#[command(name = "smartfarm-simulator", version)]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    #[arg(long, env = "DEVICE_ID", default_value = "farm-01")]
    device_id: String,

    /// Milliseconds between sensor readings
    #[arg(long, env = "INTERVAL_MS", default_value_t = 2000)]
    interval_ms: u64,

    /// Soil moisture the simulated field starts at
    #[arg(long, env = "INITIAL_SOIL", default_value_t = 45.0)]
    initial_soil: f64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    let sensor_topic = format!("devices/{}/sensors", args.device_id);
    let data_topic = format!("devices/{}/data", args.device_id);
    let pump_topic = format!("devices/{}/pump", args.device_id);
    let command_topic = format!("devices/{}/commands", args.device_id);

    info!("Starting smart-farm device simulator");
    info!(
        "Broker: {}:{}, device: {}, interval: {}ms",
        args.broker, args.port, args.device_id, args.interval_ms
    );

    let client_id = format!("farm-sim-{}", uuid::Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(&client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);
    let pump_on = Arc::new(AtomicBool::new(false));

    // Eventloop handler: applies pump commands and reports state changes
    let command_client = client.clone();
    let command_pump = pump_on.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    for topic in [&pump_topic, &command_topic] {
                        if let Err(e) = command_client
                            .subscribe(topic.as_str(), QoS::AtMostOnce)
                            .await
                        {
                            error!("Failed to subscribe to {}: {}", topic, e);
                        } else {
                            info!("Listening for commands on {}", topic);
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let enable = if publish.topic == pump_topic {
                        match publish.payload.as_ref() {
                            b"YES" => true,
                            b"NO" => false,
                            other => {
                                warn!("Unknown pump command {:?}", String::from_utf8_lossy(other));
                                continue;
                            }
                        }
                    } else if publish.topic == command_topic {
                        match serde_json::from_slice::<DeviceCommand>(&publish.payload) {
                            Ok(DeviceCommand::Pump(enable)) => enable,
                            Ok(other) => {
                                info!("Ignoring dashboard command {:?}", other);
                                continue;
                            }
                            Err(e) => {
                                warn!("Unreadable dashboard command: {}", e);
                                continue;
                            }
                        }
                    } else {
                        continue;
                    };

                    if command_pump.swap(enable, Ordering::SeqCst) != enable {
                        info!("Pump switched {}", if enable { "on" } else { "off" });
                        let report = match serde_json::to_string(&PumpState::new(enable)) {
                            Ok(report) => report,
                            Err(e) => {
                                error!("Failed to serialize pump state: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = command_client
                            .publish(data_topic.as_str(), QoS::AtMostOnce, false, report)
                            .await
                        {
                            warn!("Failed to report pump state: {}", e);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT eventloop error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    let mut rng = rand::thread_rng();
    let mut field = Field::new(args.initial_soil);
    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut counter = 0u64;

    loop {
        ticker.tick().await;
        field.pump_on = pump_on.load(Ordering::SeqCst);

        let sample = field.sample(&mut rng);
        let payload = match serde_json::to_string(&sample) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to serialize reading: {}", e);
                continue;
            }
        };

        match client
            .publish(sensor_topic.as_str(), QoS::AtMostOnce, false, payload)
            .await
        {
            Ok(_) => {
                counter += 1;
                debug!(
                    "Published T:{:.1} H:{:.1} S:{:.1}",
                    sample.temp, sample.hum, sample.soil
                );
            }
            Err(e) => {
                warn!("Failed to publish: {}", e);
            }
        }

        // Log progress periodically
        if counter > 0 && counter % 100 == 0 {
            info!("Published {} readings", counter);
        }
    }
}
