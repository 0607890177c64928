//! HTTP routes and handlers for the DeviceHub daemon API.

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use dh_core::AggregationError;

use super::databases::DatabaseError;
use super::state::AppState;
use crate::aggregator::ReportParams;
use crate::cache::CacheStats;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health and status
        .route("/health", get(health))
        .route("/status", get(status))
        // Reports
        .route("/:db/aggregations/:resource/:method", get(aggregation))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
    duration_ms: u64,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T, duration_ms: u64) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            duration_ms,
        })
    }
}

/// Error rendered as the DeviceHub error envelope:
/// `{"_error": {"message", "code", "type"}, "_issues": {<type>: message}, "_status": "ERR"}`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    type_name: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, type_name: &'static str, message: impl ToString) -> Self {
        Self {
            status,
            type_name,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut issues = serde_json::Map::new();
        issues.insert(self.type_name.to_string(), self.message.clone().into());

        let body = serde_json::json!({
            "_error": {
                "message": self.message,
                "code": self.status.as_u16(),
                "type": self.type_name,
            },
            "_issues": issues,
            "_status": "ERR",
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<AggregationError> for ApiError {
    fn from(err: AggregationError) -> Self {
        let status = match &err {
            AggregationError::InvalidDimension { .. }
            | AggregationError::MissingParameter(_)
            | AggregationError::MalformedAggregationResult(_) => StatusCode::BAD_REQUEST,
            AggregationError::UnknownMethod(_) => StatusCode::NOT_FOUND,
            AggregationError::Engine(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            warn!("Report failed: {}", err);
        }
        Self::new(status, err.type_name(), &err)
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match &err {
            DatabaseError::InvalidName(_) | DatabaseError::NotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "DatabaseNotFound", &err)
            }
            DatabaseError::Open { .. } => {
                warn!("{}", err);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError", &err)
            }
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "InvalidQuery", rejection.body_text())
    }
}

// =============================================================================
// Health & Status
// =============================================================================

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "dh-daemon"
    }))
}

#[derive(Serialize)]
struct DatabaseStatus {
    name: String,
    collections: Vec<String>,
    cache: CacheStats,
}

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    uptime_seconds: f64,
    data_dir: String,
    cache_ttl_secs: u64,
    active_databases: usize,
    databases: Vec<DatabaseStatus>,
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let start = Instant::now();

    let databases: Vec<DatabaseStatus> = state
        .databases
        .list_databases()
        .await
        .iter()
        .map(|db| DatabaseStatus {
            name: db.name().to_string(),
            collections: db.store().collection_names(),
            cache: db.aggregator().cache().stats(),
        })
        .collect();

    let data = StatusResponse {
        status: "running".to_string(),
        uptime_seconds: state.uptime_seconds(),
        data_dir: state.databases.data_dir().display().to_string(),
        cache_ttl_secs: state.databases.cache_ttl().as_secs(),
        active_databases: databases.len(),
        databases,
    };

    ApiResponse::ok(data, start.elapsed().as_millis() as u64)
}

// =============================================================================
// Aggregations
// =============================================================================

async fn aggregation(
    State(state): State<Arc<AppState>>,
    Path((db, resource, method)): Path<(String, String, String)>,
    params: Result<Query<ReportParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params?;
    let db = state.databases.get(&db).await?;
    let report = db.aggregator().run(&resource, &method, &params).await?;
    Ok(Json(report).into_response())
}
