use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farm_messages_total",
        "Total messages received from MQTT"
    ))
    .unwrap();
    pub static ref MALFORMED_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farm_malformed_messages_total",
        "Total messages dropped because the payload was not valid JSON"
    ))
    .unwrap();
    pub static ref UNRECOGNIZED_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farm_unrecognized_messages_total",
        "Total messages dropped because the topic or shape was unknown"
    ))
    .unwrap();
    pub static ref RECORDS_SAVED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farm_records_saved_total",
        "Total sensor records persisted"
    ))
    .unwrap();
    pub static ref DUPLICATE_TIMESTAMPS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farm_duplicate_timestamps_total",
        "Total sensor records lost to a timestamp collision"
    ))
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farm_db_failures_total",
        "Total database insert failures"
    ))
    .unwrap();
    pub static ref PUMP_COMMANDS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("farm_pump_commands_total", "Pump commands published"),
        &["command"]
    )
    .unwrap();
    pub static ref WARNINGS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farm_warnings_total",
        "Total threshold warnings raised"
    ))
    .unwrap();
    pub static ref NOTIFY_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("farm_notify_failures_total", "Failed alert deliveries"),
        &["channel"]
    )
    .unwrap();
    pub static ref CHANNEL_FULL_TOTAL: Counter = Counter::with_opts(Opts::new(
        "farm_channel_full_total",
        "Total number of times the pipeline channel was full (backpressure events)"
    ))
    .unwrap();
    pub static ref DASHBOARD_COMMANDS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "farm_dashboard_commands_total",
            "Dashboard commands by result (relayed or rejected)"
        ),
        &["result"]
    )
    .unwrap();
    pub static ref WS_SESSIONS: Gauge = Gauge::with_opts(Opts::new(
        "farm_ws_sessions",
        "Connected dashboard sessions"
    ))
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "farm_ingest_latency_seconds",
            "Time taken to persist and evaluate one reading"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MALFORMED_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UNRECOGNIZED_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECORDS_SAVED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DUPLICATE_TIMESTAMPS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PUMP_COMMANDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WARNINGS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(NOTIFY_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CHANNEL_FULL_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DASHBOARD_COMMANDS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(WS_SESSIONS.clone()))?;
    REGISTRY.register(Box::new(INGEST_LATENCY_SECONDS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
