use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Raw payload shape published by the field device.
#[derive(Debug, Clone, Serialize)]
struct DevicePayload {
    temp: f64,
    hum: f64,
    soil: f64,
}

impl DevicePayload {
    fn random() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            temp: rng.gen_range(15.0..35.0),
            hum: rng.gen_range(30.0..80.0),
            soil: rng.gen_range(20.0..70.0),
        }
    }
}

/// Needs a broker on localhost:1883 and a running ingestor.
#[tokio::test]
#[ignore]
async fn test_sustained_sensor_stream() {
    println!("\nStarting load test: 50 msg/s for 10 seconds");

    let topic = std::env::var("SENSOR_TOPIC")
        .unwrap_or_else(|_| "devices/farm-01/sensors".to_string());
    let test_duration_secs = 10;
    let target_rate = 50;
    let total_messages = test_duration_secs * target_rate;

    let mut mqtt_options = MqttOptions::new("farm-load-test", "localhost", 1883);
    mqtt_options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 1000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                eprintln!("MQTT error: {}", e);
                break;
            }
        }
    });

    sleep(Duration::from_millis(500)).await;

    let start = Instant::now();
    let mut sent_count = 0;
    let mut error_count = 0;
    let delay = Duration::from_micros(1_000_000 / target_rate as u64);

    for _ in 0..total_messages {
        let payload = serde_json::to_string(&DevicePayload::random()).unwrap();

        match client
            .publish(topic.as_str(), QoS::AtMostOnce, false, payload)
            .await
        {
            Ok(_) => sent_count += 1,
            Err(e) => {
                error_count += 1;
                if error_count < 10 {
                    eprintln!("Send error: {}", e);
                }
            }
        }

        sleep(delay).await;
    }

    let duration = start.elapsed();

    println!("  Total Sent:     {}", sent_count);
    println!("  Errors:         {}", error_count);
    println!("  Duration:       {:.2}s", duration.as_secs_f64());
    println!(
        "  Actual Rate:    {:.2} msg/s",
        sent_count as f64 / duration.as_secs_f64()
    );

    assert!(
        error_count == 0,
        "Too many errors: {} (expected 0)",
        error_count
    );
    assert_eq!(sent_count, total_messages);
}
