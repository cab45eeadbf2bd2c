//! Health endpoint: liveness plus cache, backend, and provider status.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::server::AppState;

const PROBE_KEY: &str = "health:check";
const BACKEND_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime: String,
    cache: CacheHealth,
    backend: BackendHealth,
    providers: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct CacheHealth {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

#[derive(Serialize)]
struct BackendHealth {
    url: String,
    status: String,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Response {
    let mut degraded = false;

    let cache_status = match state
        .cache
        .set(PROBE_KEY, b"ok", Duration::from_secs(60))
        .await
    {
        Ok(()) => {
            let _ = state.cache.delete(PROBE_KEY).await;
            "connected".to_string()
        }
        Err(e) => {
            degraded = true;
            format!("error: {}", e)
        }
    };

    let backend_status = match state
        .health_client
        .get(&state.cfg.backend.url)
        .timeout(BACKEND_PROBE_TIMEOUT)
        .send()
        .await
    {
        Ok(_) => "reachable".to_string(),
        Err(_) => {
            degraded = true;
            "unreachable".to_string()
        }
    };

    let providers = state
        .providers
        .values()
        .map(|p| (p.id().to_string(), format!("{} ({})", p.name(), p.kind())))
        .collect();

    let uptime = Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds();

    let body = HealthResponse {
        status: if degraded { "degraded" } else { "healthy" },
        uptime: format!("{}s", uptime.max(0)),
        cache: CacheHealth {
            kind: state.cfg.cache.kind.clone(),
            status: cache_status,
        },
        backend: BackendHealth {
            url: state.cfg.backend.url.clone(),
            status: backend_status,
        },
        providers,
    };

    let status = if degraded {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status, Json(body)).into_response()
}
