use crate::db::{self, RecordRow};
use crate::errors::Error;
use crate::model::{PlantProfile, TelemetryRecord, TelemetryResponse};
use crate::profile::{ActiveProfile, ProfileProvider};
use crate::validate::validate_profile;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{error, info};

#[derive(Clone)]
struct AppState {
    pool: PgPool,
    active: ActiveProfile,
}

#[derive(Debug, Deserialize)]
pub struct TelemetryQuery {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateRequest {
    plant_type: String,
}

pub fn create_router(pool: PgPool, active: ActiveProfile) -> Router {
    let state = AppState { pool, active };

    Router::new()
        .route("/api/v1/telemetry", get(get_telemetry))
        .route("/api/v1/profiles", get(list_profiles).put(put_profile))
        .route(
            "/api/v1/profiles/active",
            get(get_active_profile).put(put_active_profile),
        )
        .with_state(state)
}

async fn get_telemetry(
    State(state): State<AppState>,
    Query(params): Query<TelemetryQuery>,
) -> Result<Json<TelemetryResponse>, AppError> {
    let limit = params.limit.unwrap_or(100).min(1000);
    let offset = params.offset.unwrap_or(0);

    // Build query with filters
    let mut conditions = Vec::new();

    if params.start.is_some() {
        conditions.push(format!("ts >= ${}", conditions.len() + 1));
    }
    if params.end.is_some() {
        conditions.push(format!("ts <= ${}", conditions.len() + 1));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let query = format!(
        "SELECT ts, temperature, humidity, moisture
         FROM sensor_records
         {}
         ORDER BY ts DESC
         LIMIT {} OFFSET {}",
        where_clause, limit, offset
    );

    let mut query_builder = sqlx::query_as::<_, RecordRow>(&query);
    if let Some(start) = &params.start {
        query_builder = query_builder.bind(start);
    }
    if let Some(end) = &params.end {
        query_builder = query_builder.bind(end);
    }

    let rows = query_builder.fetch_all(&state.pool).await.map_err(|e| {
        error!("Database error: {}", e);
        AppError::from(e)
    })?;

    let data: Vec<TelemetryRecord> = rows.into_iter().map(TelemetryRecord::from).collect();
    Ok(Json(TelemetryResponse {
        total: data.len(),
        data,
        limit,
        offset,
    }))
}

async fn list_profiles(State(state): State<AppState>) -> Result<Json<Vec<PlantProfile>>, AppError> {
    Ok(Json(db::list_profiles(&state.pool).await?))
}

async fn put_profile(
    State(state): State<AppState>,
    Json(profile): Json<PlantProfile>,
) -> Result<Json<PlantProfile>, AppError> {
    validate_profile(&profile)?;
    db::upsert_profile(&state.pool, &profile).await?;

    // keep thresholds of the active profile current
    if let Some(active) = state.active.active_profile().await {
        if active.plant_type == profile.plant_type {
            state.active.set(Some(profile.clone())).await;
        }
    }

    info!("Stored plant profile {}", profile.plant_type);
    Ok(Json(profile))
}

async fn get_active_profile(State(state): State<AppState>) -> Result<Json<PlantProfile>, AppError> {
    state
        .active
        .active_profile()
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found("No active plant profile"))
}

async fn put_active_profile(
    State(state): State<AppState>,
    Json(request): Json<ActivateRequest>,
) -> Result<Json<PlantProfile>, AppError> {
    let profile = db::activate_profile(&state.pool, &request.plant_type)
        .await?
        .ok_or_else(|| {
            AppError::not_found(format!("Unknown plant profile {}", request.plant_type))
        })?;

    state.active.set(Some(profile.clone())).await;
    info!("Active plant profile is now {}", profile.plant_type);
    Ok(Json(profile))
}

struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl AppError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: anyhow::anyhow!(message.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("API error: {}", self.error);
        }
        (self.status, self.error.to_string()).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            error: err.into(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Error::Database(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_is_bad_request() {
        let err = AppError::from(Error::Validation("bad bounds".to_string()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_database_error_is_server_error() {
        let err = AppError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_not_found() {
        let response = AppError::not_found("No active plant profile").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
