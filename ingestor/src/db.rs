use crate::errors::{Error, Result};
use crate::metrics::DB_FAILURES_TOTAL;
use crate::model::{PlantProfile, Range, Recipient, SafeThresholds, SensorReading, TelemetryRecord};
use crate::notify::RecipientDirectory;
use crate::store::TelemetryStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{error, info, warn};

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RecordRow {
    ts: DateTime<Utc>,
    temperature: f64,
    humidity: f64,
    moisture: f64,
}

impl From<RecordRow> for TelemetryRecord {
    fn from(row: RecordRow) -> Self {
        TelemetryRecord {
            data: SensorReading {
                temperature: row.temperature,
                humidity: row.humidity,
                moisture: row.moisture,
            },
            timestamp: row.ts,
        }
    }
}

/// Telemetry store backed by the `sensor_records` table.
#[derive(Debug, Clone)]
pub struct PgTelemetryStore {
    pool: PgPool,
}

impl PgTelemetryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(&self, record: &TelemetryRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO sensor_records (ts, temperature, humidity, moisture) VALUES ($1, $2, $3, $4)",
        )
        .bind(record.timestamp)
        .bind(record.data.temperature)
        .bind(record.data.humidity)
        .bind(record.data.moisture)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            let duplicate = matches!(
                &e,
                sqlx::Error::Database(db_err) if db_err.is_unique_violation()
            );
            if duplicate {
                Error::DuplicateTimestamp(record.timestamp)
            } else {
                Error::Database(e)
            }
        })?;

        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for PgTelemetryStore {
    async fn save(&self, record: &TelemetryRecord) -> Result<()> {
        let mut attempts = 0;
        let max_attempts = 5;

        loop {
            attempts += 1;
            match self.insert(record).await {
                Ok(()) => return Ok(()),
                Err(Error::Database(db_err))
                    if attempts < max_attempts && is_transient_error(&db_err) =>
                {
                    let wait_ms = 100 * 2_u64.pow(attempts - 1).min(32);
                    warn!(
                        "Database insert failed (attempt {}/{}), retrying in {}ms: {}",
                        attempts, max_attempts, wait_ms, db_err
                    );
                    DB_FAILURES_TOTAL.inc();
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                }
                Err(e @ Error::DuplicateTimestamp(_)) => return Err(e),
                Err(e) => {
                    error!(
                        "Database insert failed permanently after {} attempts: {}",
                        attempts, e
                    );
                    DB_FAILURES_TOTAL.inc();
                    return Err(e);
                }
            }
        }
    }

    async fn find_most_recent(&self, n: usize) -> Result<Vec<TelemetryRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            "SELECT ts, temperature, humidity, moisture FROM sensor_records ORDER BY ts DESC LIMIT $1",
        )
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TelemetryRecord::from).collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    plant_type: String,
    temperature_upper: f64,
    temperature_lower: f64,
    humidity_upper: f64,
    humidity_lower: f64,
    moisture_upper: f64,
    moisture_lower: f64,
}

impl From<ProfileRow> for PlantProfile {
    fn from(row: ProfileRow) -> Self {
        PlantProfile {
            plant_type: row.plant_type,
            safe_thresholds: SafeThresholds {
                temperature: Range {
                    upper: row.temperature_upper,
                    lower: row.temperature_lower,
                },
                humidity: Range {
                    upper: row.humidity_upper,
                    lower: row.humidity_lower,
                },
                moisture: Range {
                    upper: row.moisture_upper,
                    lower: row.moisture_lower,
                },
            },
        }
    }
}

const PROFILE_COLUMNS: &str = "plant_type, temperature_upper, temperature_lower, \
     humidity_upper, humidity_lower, moisture_upper, moisture_lower";

pub async fn list_profiles(pool: &PgPool) -> Result<Vec<PlantProfile>> {
    let query = format!(
        "SELECT {} FROM plant_profiles ORDER BY plant_type",
        PROFILE_COLUMNS
    );
    let rows = sqlx::query_as::<_, ProfileRow>(&query)
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(PlantProfile::from).collect())
}

pub async fn load_active_profile(pool: &PgPool) -> Result<Option<PlantProfile>> {
    let query = format!(
        "SELECT {} FROM plant_profiles WHERE active",
        PROFILE_COLUMNS
    );
    let row = sqlx::query_as::<_, ProfileRow>(&query)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(PlantProfile::from))
}

pub async fn upsert_profile(pool: &PgPool, profile: &PlantProfile) -> Result<()> {
    let t = &profile.safe_thresholds;
    sqlx::query(
        r#"
        INSERT INTO plant_profiles
            (plant_type, temperature_upper, temperature_lower,
             humidity_upper, humidity_lower, moisture_upper, moisture_lower)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (plant_type) DO UPDATE SET
            temperature_upper = EXCLUDED.temperature_upper,
            temperature_lower = EXCLUDED.temperature_lower,
            humidity_upper = EXCLUDED.humidity_upper,
            humidity_lower = EXCLUDED.humidity_lower,
            moisture_upper = EXCLUDED.moisture_upper,
            moisture_lower = EXCLUDED.moisture_lower
        "#,
    )
    .bind(&profile.plant_type)
    .bind(t.temperature.upper)
    .bind(t.temperature.lower)
    .bind(t.humidity.upper)
    .bind(t.humidity.lower)
    .bind(t.moisture.upper)
    .bind(t.moisture.lower)
    .execute(pool)
    .await?;

    Ok(())
}

/// Marks `plant_type` as the single active profile. Returns `None` and leaves
/// the current selection untouched if no such profile exists.
pub async fn activate_profile(pool: &PgPool, plant_type: &str) -> Result<Option<PlantProfile>> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE plant_profiles SET active = FALSE WHERE active")
        .execute(&mut *tx)
        .await?;

    let query = format!(
        "UPDATE plant_profiles SET active = TRUE WHERE plant_type = $1 RETURNING {}",
        PROFILE_COLUMNS
    );
    let row = sqlx::query_as::<_, ProfileRow>(&query)
        .bind(plant_type)
        .fetch_optional(&mut *tx)
        .await?;

    match row {
        Some(row) => {
            tx.commit().await?;
            Ok(Some(row.into()))
        }
        None => {
            tx.rollback().await?;
            Ok(None)
        }
    }
}

/// Alert recipients from the `users` table.
#[derive(Debug, Clone)]
pub struct PgRecipientDirectory {
    pool: PgPool,
}

impl PgRecipientDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientDirectory for PgRecipientDirectory {
    async fn recipients(&self) -> Result<Vec<Recipient>> {
        let users = sqlx::query_as::<_, Recipient>(
            "SELECT username, email, phone_number FROM users ORDER BY username",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }
}

fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            // Check if it's a connection-related error
            db_err.code().is_some_and(|code| {
                code == "08000" || // connection_exception
                code == "08003" || // connection_does_not_exist
                code == "08006" || // connection_failure
                code == "57P03" || // cannot_connect_now
                code == "53300" // too_many_connections
            })
        }
        _ => false,
    }
}
