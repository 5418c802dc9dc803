use std::sync::Arc;

use axum::Json;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use secrecy::{ExposeSecret, SecretString};

/// Require `Authorization: Bearer <token>` matching the configured token
pub async fn access_token_middleware(expected: Arc<SecretString>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    if presented.is_some_and(|token| token == expected.expose_secret()) {
        return next.run(request).await;
    }

    tracing::debug!(path = %request.uri().path(), "rejected request without a valid access token");

    let body = serde_json::json!({
        "error": {
            "message": "missing or invalid access token",
            "type": "authentication_error",
            "code": 401,
        }
    });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
