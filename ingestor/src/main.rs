use anyhow::Context;
use axum::{routing::get, Router};
use smartfarm_ingestor::broadcast::{self, CommandRelay, Hub};
use smartfarm_ingestor::config::Config;
use smartfarm_ingestor::db::{self, PgRecipientDirectory, PgTelemetryStore};
use smartfarm_ingestor::forecast::ForecastPublisher;
use smartfarm_ingestor::metrics;
use smartfarm_ingestor::mqtt::{self, MqttPublisher};
use smartfarm_ingestor::notify::{MailTransport, MailgunMailer, Notifier, SmsTransport, TextBeeSms};
use smartfarm_ingestor::pipeline::{Pipeline, Services};
use smartfarm_ingestor::profile::{ActiveProfile, ProfileProvider};
use smartfarm_ingestor::rest;
use smartfarm_ingestor::store::TelemetryStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    info!("Starting smart-farm ingestor");
    info!("MQTT broker: {}:{}", config.mqtt.broker, config.mqtt.port);
    info!("HTTP server: {}", config.http_addr);
    info!(
        "Database: {}",
        config.database_url.split('@').last().unwrap_or("***")
    );

    metrics::init_metrics().context("Failed to register metrics")?;

    let pool = db::make_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let active = ActiveProfile::new(db::load_active_profile(&pool).await?);
    match active.active_profile().await {
        Some(profile) => info!("Active plant profile: {}", profile.plant_type),
        None => warn!("No active plant profile, threshold checks disabled"),
    }

    let store = Arc::new(PgTelemetryStore::new(pool.clone()));
    let hub = Hub::new(256);
    hub.seed(&store.find_most_recent(broadcast::RECENT_READINGS).await?);

    let mail = match &config.mailgun {
        Some(m) => Some(Arc::new(MailgunMailer::new(
            m.api_key.clone(),
            m.domain.clone(),
            m.sender.clone(),
        )?) as Arc<dyn MailTransport>),
        None => {
            warn!("Mailgun not configured, email alerts disabled");
            None
        }
    };
    let sms = match &config.textbee {
        Some(t) => Some(
            Arc::new(TextBeeSms::new(t.api_key.clone(), t.device_id.clone())?)
                as Arc<dyn SmsTransport>,
        ),
        None => {
            warn!("TextBee not configured, SMS alerts disabled");
            None
        }
    };

    let client_id = format!("farm-ingestor-{}", uuid::Uuid::new_v4());
    let (client, eventloop) = mqtt::connect(&config.mqtt, client_id);
    let publisher = Arc::new(MqttPublisher::new(client.clone()));

    let services = Services {
        store: store.clone(),
        profiles: Arc::new(active.clone()),
        recipients: Arc::new(PgRecipientDirectory::new(pool.clone())),
        notifier: Arc::new(Notifier::new(mail, sms)),
        broadcast: Arc::new(hub.clone()),
        publisher: publisher.clone(),
    };

    info!("Channel capacity: {}", config.channel_capacity);
    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let subscriptions = vec![config.topics.sensor.clone(), config.topics.data.clone()];
    let mut mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt::run_mqtt(client, eventloop, subscriptions, tx).await {
            error!("MQTT task failed: {}", e);
        }
    });

    let pipeline = Pipeline::new(config.topics.clone(), config.pump_topic.clone(), services);
    let mut pipeline_handle = tokio::spawn(pipeline.run(rx));

    let forecast_handle = if config.forecast.enabled {
        let forecaster = ForecastPublisher::new(
            config.forecast.clone(),
            config.forecast_topic.clone(),
            store.clone(),
            publisher.clone(),
        )?;
        Some(tokio::spawn(forecaster.run()))
    } else {
        None
    };

    // Build HTTP app with REST API, dashboard socket and metrics endpoint
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(pool, active))
        .merge(broadcast::create_router(
            hub,
            CommandRelay::new(publisher, config.command_topic.clone()),
        ));

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.http_addr))?;

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = &mut mqtt_handle => {
            error!("MQTT task terminated");
        }
        _ = &mut pipeline_handle => {
            error!("Pipeline task terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
    if let Some(handle) = forecast_handle {
        handle.abort();
    }

    // Stopping the MQTT task drops the sender; the pipeline then finishes
    // whatever is already queued.
    if !mqtt_handle.is_finished() {
        mqtt_handle.abort();
        let _ = mqtt_handle.await;
    }
    if !pipeline_handle.is_finished() {
        if let Err(e) = pipeline_handle.await {
            error!("Pipeline task failed during drain: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
