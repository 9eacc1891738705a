use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::proxy;
use crate::resolver::resolve_model;
use crate::translate::chat_types::{ChatCompletionRequest, ErrorResponse};

use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: RelayConfig,
    pub client: reqwest::Client,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // The method-level fallbacks keep the contract of "unknown path or
    // method gets the 404 envelope" instead of axum's bare 405.
    Router::new()
        .route(
            "/v1/chat/completions",
            post(handle_chat_completions).fallback(handle_not_found),
        )
        .route("/v1/models", get(handle_models).fallback(handle_not_found))
        .route("/health", get(handle_health).fallback(handle_not_found))
        .fallback(handle_not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Response {
    let req: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse request body");
            let err = ErrorResponse::invalid_request(format!("Invalid request body: {e}"), 400);
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    let is_streaming = req.stream.unwrap_or(false);

    tracing::info!(
        model = %req.model,
        streaming = is_streaming,
        messages = req.messages.len(),
        "request"
    );

    let resolved_model = resolve_model(&req.model, &state.config, &state.client).await;

    if is_streaming {
        handle_streaming(state, &req, &resolved_model).await
    } else {
        handle_non_streaming(state, &req, &resolved_model).await
    }
}

async fn handle_non_streaming(
    state: Arc<AppState>,
    req: &ChatCompletionRequest,
    resolved_model: &str,
) -> Response {
    match proxy::relay_non_streaming(req, resolved_model, &state.config, &state.client).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn handle_streaming(
    state: Arc<AppState>,
    req: &ChatCompletionRequest,
    resolved_model: &str,
) -> Response {
    let sse_stream =
        match proxy::relay_streaming(req, resolved_model, &state.config, &state.client).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "streaming setup failed");
                return error_response(&e);
            }
        };

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .header("connection", "keep-alive")
        .body(Body::from_stream(sse_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Errors raised before any response bytes were sent become the structured
/// envelope, mirroring the upstream status when one is available.
fn error_response(err: &RelayError) -> Response {
    let code = err.mirror_status();
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorResponse::invalid_request(err.to_string(), code);
    (status, Json(body)).into_response()
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "reasoning_display": state.config.show_reasoning,
        "thinking_mode": state.config.thinking_mode,
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let created = chrono::Utc::now().timestamp_millis();
    let models: Vec<serde_json::Value> = state
        .config
        .models
        .keys()
        .map(|name| {
            serde_json::json!({
                "id": name,
                "object": "model",
                "created": created,
                "owned_by": env!("CARGO_PKG_NAME"),
            })
        })
        .collect();

    Json(serde_json::json!({ "object": "list", "data": models }))
}

async fn handle_not_found(uri: Uri) -> Response {
    let err = ErrorResponse::not_found(uri.path());
    (StatusCode::NOT_FOUND, Json(err)).into_response()
}
