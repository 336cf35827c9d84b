use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::logging::{RequestLogger, SharedLogger};
use crate::proxy;
use crate::translate::anthropic_types::MessagesRequest;

use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub client: reqwest::Client,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // `/v1/messages`, `/messages`, `/v1/messages?beta=true`, ... all land in the fallback
    Router::new()
        .route("/health", get(handle_health).fallback(handle_fallback))
        .fallback(handle_fallback)
        .layer(cors)
        .layer(middleware::from_fn(options_no_content))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_fallback(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    if method == Method::POST && uri.path().contains("messages") {
        return handle_messages(state, body).await;
    }
    StatusCode::NOT_FOUND.into_response()
}

/// The CORS layer answers every OPTIONS request itself; keep its headers but report `204`.
async fn options_no_content(req: Request, next: Next) -> Response {
    let is_options = req.method() == Method::OPTIONS;
    let mut response = next.run(req).await;
    if is_options {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

async fn handle_messages(state: Arc<AppState>, body: Bytes) -> Response {
    let logger = state
        .logger
        .for_request(uuid::Uuid::new_v4().to_string());

    let req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            logger.error("server", format!("Failed to parse request: {e}"));
            return ProxyError::from(e).into_response();
        }
    };

    let is_streaming = req.stream.unwrap_or(false);

    logger.info(
        "server",
        format!(
            "Request: model={} streaming={} messages={}",
            req.model,
            is_streaming,
            req.messages.len()
        ),
    );

    if is_streaming {
        handle_streaming(&state, &req, logger).await
    } else {
        handle_non_streaming(&state, &req, logger).await
    }
}

async fn handle_non_streaming(
    state: &AppState,
    req: &MessagesRequest,
    logger: RequestLogger,
) -> Response {
    match proxy::proxy_non_streaming(req, &state.config, &state.client, &logger).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => {
            logger.error("server", format!("Proxy error: {e}"));
            e.into_response()
        }
    }
}

async fn handle_streaming(
    state: &AppState,
    req: &MessagesRequest,
    logger: RequestLogger,
) -> Response {
    let events =
        match proxy::proxy_streaming(req, &state.config, &state.client, &logger).await {
            Ok(s) => s,
            Err(e) => {
                logger.error("server", format!("Streaming setup error: {e}"));
                return e.into_response();
            }
        };

    let sse_events = events.filter_map(move |event| {
        let sse = match Event::default().event(event.event_name()).json_data(&event) {
            Ok(sse) => Some(Ok::<_, Infallible>(sse)),
            Err(e) => {
                logger.error("server", format!("Failed to encode {}: {e}", event.event_name()));
                None
            }
        };
        futures::future::ready(sse)
    });

    let mut response = Sse::new(sse_events)
        .keep_alive(KeepAlive::default())
        .into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
