//! Health check endpoints

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct RootResponse {
    pub message: &'static str,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub minio: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "PDF Processor API",
        status: "running",
    })
}

/// Probe object storage; unhealthy answers 503
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.store().check_connection().await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                minio: "connected",
                version: env!("CARGO_PKG_VERSION"),
                timestamp: Utc::now(),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy",
                    minio: "disconnected",
                    version: env!("CARGO_PKG_VERSION"),
                    timestamp: Utc::now(),
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum_test::TestServer;
    use serde_json::Value;

    use crate::config::PdfMode;
    use crate::ocr::MockProvider;
    use crate::routes::{app, test_support};
    use crate::storage::memory::MemoryStore;

    #[tokio::test]
    async fn test_root_and_health() {
        let state = test_support::state(Arc::new(MemoryStore::new()), MockProvider::new(vec![]), PdfMode::Pages);
        let server = TestServer::new(app(state)).unwrap();

        let root: Value = server.get("/").await.json();
        assert_eq!(root["status"], "running");

        let response = server.get("/health").await;
        response.assert_status_ok();
        let health: Value = response.json();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["minio"], "connected");
    }
}
