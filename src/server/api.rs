//! Record Server HTTP API

use axum::{
    extract::{ConnectInfo, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{PricingRecordResponse, RecordServer, RecordVersion};
use crate::error::OracleError;

/// Create the API router with all endpoints
pub fn create_router(server: Arc<RecordServer>) -> Router {
    Router::new()
        .route("/", get(get_pricing_record))
        .route("/pr", get(get_pricing_record))
        .route("/health", get(get_health))
        .with_state(server)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct PricingRecordQuery {
    version: Option<String>,
}

impl IntoResponse for OracleError {
    fn into_response(self) -> Response {
        let status = match &self {
            OracleError::NoRecord | OracleError::StaleRecord { .. } => StatusCode::NOT_FOUND,
            OracleError::UnsupportedVersion(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Failed to serve pricing record");
        }
        (status, self.to_string()).into_response()
    }
}

/// GET /pr?version=N - Latest signed pricing record
async fn get_pricing_record(
    State(server): State<Arc<RecordServer>>,
    remote: Option<ConnectInfo<SocketAddr>>,
    Query(query): Query<PricingRecordQuery>,
) -> Response {
    let remote = remote
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let version = match query.version.as_deref().map(str::trim) {
        None | Some("") => server.default_version(),
        Some(raw) => match raw.parse::<u32>() {
            Ok(n) => match RecordVersion::try_from(n) {
                Ok(version) => version,
                Err(e) => return e.into_response(),
            },
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    format!("invalid record version {:?}", raw),
                )
                    .into_response()
            }
        },
    };

    tracing::info!(remote = %remote, version = version.number(), "Pricing record requested");

    match server.serve(version).await {
        Ok(view) => Json(PricingRecordResponse { pr: view }).into_response(),
        Err(e) => {
            tracing::warn!(remote = %remote, error = %e, "Pricing record withheld");
            e.into_response()
        }
    }
}

/// GET /health - Liveness plus age of the latest record
async fn get_health(State(server): State<Arc<RecordServer>>) -> impl IntoResponse {
    let now = Utc::now().timestamp();
    match server.fresh_record(now).await {
        Ok(record) => Json(json!({
            "status": "ok",
            "latest_id": record.id,
            "age_secs": now - record.timestamp,
        })),
        Err(e) => Json(json!({
            "status": "degraded",
            "reason": e.to_string(),
        })),
    }
}
