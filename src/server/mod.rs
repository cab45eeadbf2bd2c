//! HTTP server assembly: shared state, routing, and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Extension, Router};
use chrono::{DateTime, Utc};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};

use crate::auth::{ProviderRegistry, Session};
use crate::cache::Cache;
use crate::config::Config;
use crate::handlers::{callback, health, logout, select};
use crate::middleware::{log_requests, require_auth, security_headers, CsrfService};
use crate::proxy::ReverseProxy;

/// Per-request handler deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// 302 Found redirect. Interactive auth flows use 302 so user-agents replay
/// the navigation as GET.
pub fn redirect_found(location: &str) -> Response {
    match axum::http::HeaderValue::from_str(location) {
        Ok(value) => (
            StatusCode::FOUND,
            [(axum::http::header::LOCATION, value)],
        )
            .into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Everything a handler needs, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub cache: Arc<dyn Cache>,
    pub providers: Arc<ProviderRegistry>,
    pub csrf: CsrfService,
    pub proxy: Arc<ReverseProxy>,
    pub health_client: reqwest::Client,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        cfg: Arc<Config>,
        cache: Arc<dyn Cache>,
        providers: Arc<ProviderRegistry>,
    ) -> anyhow::Result<Self> {
        let proxy = Arc::new(ReverseProxy::new(&cfg.backend)?);
        let csrf = CsrfService::new(Arc::clone(&cache));
        let health_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to create health client: {}", e))?;

        Ok(Self {
            cfg,
            cache,
            providers,
            csrf,
            proxy,
            health_client,
            started_at: Utc::now(),
        })
    }
}

/// Assemble the full route tree. Everything outside `/auth/**` and
/// `/health` is the authenticated reverse proxy.
pub fn router(state: AppState) -> Router {
    let protected_proxy = any(proxy_handler)
        .layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    Router::new()
        .route(
            "/auth/select",
            get(select::select_page).post(select::select_submit),
        )
        .route("/auth/select/logo", get(select::serve_logo))
        .route("/auth/oidc/:id/login", get(callback::login_redirect))
        .route("/auth/oidc/:id/callback", get(callback::oidc_callback))
        .route("/auth/saml/:id/login", get(callback::login_redirect))
        .route("/auth/saml/:id/acs", post(callback::saml_acs))
        .route("/auth/saml/:id/metadata", get(callback::saml_metadata))
        .route("/auth/logout", post(logout::logout))
        .route("/health", get(health::health))
        .fallback_service(protected_proxy)
        .layer(from_fn(security_headers))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(from_fn(log_requests))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

/// The catch-all proxy route; `require_auth` has already attached a
/// validated session.
async fn proxy_handler(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    req: Request,
) -> Response {
    let Some(provider) = state.providers.get(&session.provider_id) else {
        error!(provider_id = %session.provider_id, "session provider disappeared");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    state.proxy.forward(&session, provider.as_ref(), req).await
}

/// Bind, serve until a termination signal, then close the cache.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.cfg.server.host, state.cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", addr, e))?;

    info!(
        host = %state.cfg.server.host,
        port = state.cfg.server.port,
        base_url = %state.cfg.server.base_url,
        "starting server"
    );

    let cache = Arc::clone(&state.cache);
    let app = router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    if let Err(e) = cache.close().await {
        error!(error = %e, "error closing cache");
    }
    info!("server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("received shutdown signal");
}
