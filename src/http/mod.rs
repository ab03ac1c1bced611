//! HTTP surface: `/health`, `/ready`, `/metrics`,
//! `/sidecar/config/reload`, `/adapters`, `/adapters/{name}`.
//!
//! A plain axum `Router::new().route(...).with_state(...)` over a
//! shared `Arc<AppState>`, plus `tower_http` layers for tracing and
//! CORS.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ConfigPatch;
use crate::sidecar::Sidecar;

#[derive(Clone)]
struct AppState {
    sidecar: Arc<Sidecar>,
}

pub fn router(sidecar: Arc<Sidecar>) -> Router {
    let state = AppState { sidecar };
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/sidecar/config/reload", post(reload))
        .route("/adapters", get(list_adapters))
        .route("/adapters/:name", get(get_adapter))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.sidecar.health().await;
    let status = if snapshot.status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::OK // degraded is still a 200; callers read `status`/`issues`
    };
    (status, Json(snapshot))
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.sidecar.ready().await;
    let status = if snapshot.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(snapshot))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.sidecar.render_metrics(),
    )
}

/// Bearer-token gated; this is the only endpoint that requires auth.
/// Validates and atomically applies a config patch, returning every
/// validation error in one response.
async fn reload(State(state): State<AppState>, headers: HeaderMap, Json(patch): Json<ConfigPatch>) -> Response {
    if let Some(expected) = state.sidecar.config().health.auth_token.as_deref() {
        if !bearer_matches(&headers, expected) {
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "missing or invalid bearer token"}))).into_response();
        }
    }

    match state.sidecar.reload(patch) {
        Ok(config) => (
            StatusCode::OK,
            Json(json!({"generation": config.generation, "status": "applied"})),
        )
            .into_response(),
        Err(errors) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "config patch rejected",
                "details": errors.into_iter().map(|e| e.to_string()).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
    }
}

fn bearer_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token == expected)
        .unwrap_or(false)
}

async fn list_adapters(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({"adapters": state.sidecar.adapters().await}))
}

async fn get_adapter(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let not_found = || {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("no adapter archive named '{name}'")})),
        )
            .into_response()
    };

    let Some(path) = state.sidecar.adapter_path(&name).await else {
        return not_found();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => ([("content-type", crate::adapters::ADAPTER_CONTENT_TYPE)], bytes).into_response(),
        Err(err) => {
            tracing::error!(error = %err, path = %path.display(), "failed to read adapter archive");
            not_found()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sink::NullSink;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn build_sidecar(auth_token: Option<&str>) -> Arc<Sidecar> {
        let mut cfg = Config::default();
        cfg.health.auth_token = auth_token.map(str::to_string);
        Sidecar::new(cfg, Arc::new(NullSink))
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok_json() {
        let sidecar = build_sidecar(None);
        sidecar.start().await;
        let app = router(sidecar);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn reload_without_token_is_rejected_when_token_configured() {
        let sidecar = build_sidecar(Some("secret"));
        sidecar.start().await;
        let app = router(sidecar);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sidecar/config/reload")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn reload_with_correct_token_applies_patch() {
        let sidecar = build_sidecar(Some("secret"));
        sidecar.start().await;
        let app = router(sidecar);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sidecar/config/reload")
                    .header("content-type", "application/json")
                    .header("authorization", "Bearer secret")
                    .body(Body::from(r#"{"enabled": false}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_adapter_returns_404() {
        let sidecar = build_sidecar(None);
        sidecar.start().await;
        let app = router(sidecar);
        let response = app
            .oneshot(Request::builder().uri("/adapters/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_adapter_streams_archive_bytes_as_gzip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pytest-adapter.tar.gz"), b"fake archive bytes").unwrap();
        let mut cfg = Config::default();
        cfg.adapters.archive_dir = Some(dir.path().to_path_buf());
        let sidecar = Sidecar::new(cfg, Arc::new(NullSink));
        sidecar.start().await;
        let app = router(sidecar);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/adapters/pytest-adapter")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            crate::adapters::ADAPTER_CONTENT_TYPE,
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"fake archive bytes");
    }
}
