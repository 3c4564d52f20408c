use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Error;
use crate::index::Coordinator;
use crate::stats::CoordinatorReport;

#[derive(Deserialize)]
pub struct RangeParams {
    #[serde(default)]
    pub depth: u32,
    /// 参考时间（RFC 3339），缺省为当前时间
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct RangeResponse {
    pub logical_index: String,
    pub at: DateTime<Utc>,
    pub depth: u32,
    pub indices: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// 运维状态服务：只读查询
pub struct StatusServer {
    pub coordinator: Arc<Coordinator>,
}

impl StatusServer {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/status", get(status_handler))
            .route("/indices/:name", get(indices_handler))
            .with_state(self.coordinator.clone())
    }

    pub async fn run(self, port: u16) -> anyhow::Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
        tracing::info!("HTTP Status Server listening on port {}", port);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn status_handler(State(coordinator): State<Arc<Coordinator>>) -> Json<CoordinatorReport> {
    Json(coordinator.report())
}

async fn indices_handler(
    Path(name): Path<String>,
    Query(params): Query<RangeParams>,
    State(coordinator): State<Arc<Coordinator>>,
) -> Result<Json<RangeResponse>, ApiError> {
    let at = params.at.unwrap_or_else(|| coordinator.context().now());
    let idx = coordinator.get(&name).ok_or_else(|| {
        error_response(&Error::NotFound(format!("logical index {}", name)))
    })?;
    let indices = idx
        .find_indices(at, params.depth)
        .await
        .map_err(|e| error_response(&e))?;

    Ok(Json(RangeResponse {
        logical_index: idx.name().to_string(),
        at,
        depth: params.depth,
        indices,
    }))
}

fn error_response(e: &Error) -> ApiError {
    let status = match e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        Error::Config(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse { error: e.to_string() }))
}
