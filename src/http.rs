use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::{self, AppState, Request};
use crate::auth::token_from_header;

type SharedState = Arc<Mutex<AppState>>;

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let bind = state.config.bind;
    let app = Router::new()
        .fallback(dispatch)
        .with_state(Arc::new(Mutex::new(state)))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(%bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

/// Maps an HTTP path onto a router path: everything lives under `/api`,
/// except the health probe which is also served at the root.
fn route_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    if trimmed == "/health" {
        return Some(path);
    }
    let rest = path.strip_prefix("/api")?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

fn detail(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    (status, Json(json!({ "detail": message.into() }))).into_response()
}

/// Query string as a map; a malformed one is a `{detail}` 400 like every other error.
fn request_query(uri: &Uri) -> Result<HashMap<String, String>, HttpResponse> {
    Query::<HashMap<String, String>>::try_from_uri(uri)
        .map(|Query(q)| q)
        .map_err(|e| detail(StatusCode::BAD_REQUEST, format!("Invalid query string - {}", e.body_text())))
}

fn render(resp: api::Response) -> HttpResponse {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status == StatusCode::NO_CONTENT {
        return status.into_response();
    }
    (status, Json(resp.body)).into_response()
}

async fn dispatch(
    State(state): State<SharedState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResponse {
    let Some(path) = route_path(uri.path()) else {
        return detail(StatusCode::NOT_FOUND, "Not found.");
    };
    let query = match request_query(&uri) {
        Ok(q) => q,
        Err(resp) => return resp,
    };
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => return detail(StatusCode::BAD_REQUEST, format!("JSON parse error - {e}")),
        }
    };
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(token_from_header);

    let req = Request {
        id: String::new(),
        method: method.as_str().to_string(),
        path: path.to_string(),
        query,
        token,
        body,
    };

    // SQLite work is synchronous; keep it off the async workers.
    let joined = tokio::task::spawn_blocking(move || {
        let mut guard = state
            .lock()
            .map_err(|_| anyhow::anyhow!("application state lock poisoned"))?;
        Ok::<_, anyhow::Error>(api::handle_request(&mut guard, req))
    })
    .await;

    match joined {
        Ok(Ok(resp)) => render(resp),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "request not served");
            detail(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
        }
        Err(e) => {
            tracing::error!(error = %e, "request handler panicked");
            detail(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
        }
    }
}
