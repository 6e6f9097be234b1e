use std::time::Instant;

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::info;

use crate::{store::WriteError, AppState};

/// Largest accepted state payload. Terraform states are JSON documents,
/// rarely beyond a few MiB.
const MAX_STATE_BYTES: usize = 64 * 1024 * 1024;

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Update ────────────────────────────────────────────────────────────────────

/// `POST`/`PUT /states/{*key}` — buffer the raw body and hand it to the
/// state writer. Terraform treats any 2xx as success and retries on
/// 5xx; internal failure detail is logged, never surfaced.
pub async fn update_state(
    State(state): State<AppState>,
    Path(key): Path<String>,
    request: Request,
) -> Response {
    let start = Instant::now();

    let payload = match axum::body::to_bytes(request.into_body(), MAX_STATE_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            info!(error = %e, key = %key, "failed to read request body");
            return internal_error(e);
        }
    };

    match state.writer.write(&key, &payload) {
        Ok(outcome) => {
            info!(
                key = %key,
                outcome = outcome.as_str(),
                bytes = payload.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "state written"
            );
            (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")]).into_response()
        }
        Err(e @ WriteError::InvalidKey { .. }) => {
            info!(key = %key, "rejected state key");
            (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response()
        }
        Err(e) => {
            info!(
                key = %key,
                outcome = "failure",
                elapsed_ms = start.elapsed().as_millis() as u64,
                "state write failed"
            );
            internal_error(e)
        }
    }
}

// ── Fetch ─────────────────────────────────────────────────────────────────────

/// `GET /states/{*key}` — serve the stored (decrypted) payload, or 404
/// when nothing has been written for the key yet.
pub async fn fetch_state(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    let start = Instant::now();

    match state.writer.read(&key) {
        Ok(Some(payload)) => {
            info!(
                key = %key,
                bytes = payload.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "state fetched"
            );
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                Body::from(payload),
            )
                .into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "no state for key"})),
        )
            .into_response(),
        Err(e @ WriteError::InvalidKey { .. }) => {
            info!(key = %key, "rejected state key");
            (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn internal_error<E: std::fmt::Display>(e: E) -> Response {
    tracing::error!(error = %e, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal server error"})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StateWriter;
    use axum::{routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(root: &std::path::Path) -> Router {
        let state = AppState {
            writer: StateWriter::new(root.to_path_buf(), None),
        };
        Router::new()
            .route("/health", get(health))
            .route(
                "/states/{*key}",
                get(fetch_state).post(update_state).put(update_state),
            )
            .with_state(state)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: &[u8]) -> (StatusCode, Vec<u8>) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::from(body.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(&app(dir.path()), "GET", "/health", b"").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, br#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn update_then_fetch_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let (status, _) = send(&app, "POST", "/states/app1", b"state-v1").await;
        assert_eq!(status, StatusCode::OK);

        let on_disk = dir.path().join("app1").join("terraform.tfstate");
        assert_eq!(std::fs::read(on_disk).unwrap(), b"state-v1");

        let (status, body) = send(&app, "GET", "/states/app1", b"").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"state-v1");
    }

    #[tokio::test]
    async fn second_update_replaces_first() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        send(&app, "POST", "/states/team-a/prod", b"state-v1").await;
        let (status, _) = send(&app, "PUT", "/states/team-a/prod", b"state-v2").await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "GET", "/states/team-a/prod", b"").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"state-v2");
    }

    #[tokio::test]
    async fn fetch_unknown_key_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let (status, _) = send(&app(dir.path()), "GET", "/states/nothing-here", b"").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn traversal_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let (status, _) = send(&app, "POST", "/states/..%2F..%2Fetc%2Fpasswd", b"pwned").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
