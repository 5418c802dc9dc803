use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use chatmux_llm::{Gateway, MetricsSnapshot};
use http::StatusCode;

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Gate snapshot and request counters as JSON
pub async fn metrics_handler(State(gateway): State<Gateway>) -> Json<MetricsSnapshot> {
    Json(gateway.metrics())
}
