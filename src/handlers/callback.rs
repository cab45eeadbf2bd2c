//! Callback handlers: OIDC code exchange and SAML assertion consumption.
//!
//! Both delegate validation to the provider, then mint the session id,
//! persist the session, set the cookie, and send the user back to where
//! they were headed.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Form;
use axum_extra::extract::CookieJar;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::auth::{CallbackParams, SessionId, SESSION_KEY_PREFIX};
use crate::security::cookies;
use crate::server::{redirect_found, AppState};

/// GET /auth/oidc/:id/callback
pub async fn oidc_callback(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    jar: CookieJar,
) -> Response {
    let params = CallbackParams {
        query,
        form: HashMap::new(),
    };
    complete_login(&state, &provider_id, params, jar, None).await
}

/// POST /auth/saml/:id/acs
pub async fn saml_acs(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    jar: CookieJar,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    // RelayState carries the original URL through the IdP round-trip.
    let relay_state = form
        .get("RelayState")
        .filter(|v| !v.is_empty())
        .cloned();
    let params = CallbackParams {
        query: HashMap::new(),
        form,
    };
    complete_login(&state, &provider_id, params, jar, relay_state).await
}

/// GET /auth/oidc/:id/login and /auth/saml/:id/login
pub async fn login_redirect() -> Response {
    redirect_found("/auth/select")
}

/// GET /auth/saml/:id/metadata
pub async fn saml_metadata(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> Response {
    let Some(provider) = state.providers.get(&provider_id) else {
        return (StatusCode::NOT_FOUND, "Unknown provider").into_response();
    };

    match provider.sp_metadata() {
        Ok(Some(xml)) => {
            ([(header::CONTENT_TYPE, "application/xml")], xml).into_response()
        }
        Ok(None) => (StatusCode::NOT_FOUND, "Not a SAML provider").into_response(),
        Err(e) => {
            error!(provider = %provider_id, error = %e, "failed to generate metadata");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate metadata").into_response()
        }
    }
}

async fn complete_login(
    state: &AppState,
    provider_id: &str,
    params: CallbackParams,
    jar: CookieJar,
    redirect_target: Option<String>,
) -> Response {
    let Some(provider) = state.providers.get(provider_id) else {
        error!(provider_id = %provider_id, "callback for unknown provider");
        return (StatusCode::BAD_REQUEST, "Invalid provider").into_response();
    };

    let mut session = match provider.handle_callback(&params).await {
        Ok(session) => session,
        Err(e) => {
            warn!(provider = %provider_id, error = %e, "callback failed");
            return (e.status(), "Authentication failed").into_response();
        }
    };

    // The provider's session id is provisional; the one the cookie carries
    // is minted here and never reused.
    session.id = SessionId::new();

    let ttl = match (session.expires_at - Utc::now()).to_std() {
        Ok(ttl) if !ttl.is_zero() => ttl,
        _ => {
            warn!(provider = %provider_id, "callback produced an already-expired session");
            return (StatusCode::UNAUTHORIZED, "Authentication failed").into_response();
        }
    };

    let blob = match serde_json::to_vec(&session) {
        Ok(blob) => blob,
        Err(e) => {
            error!(error = %e, "failed to serialize session");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let session_hex = session.id.to_hex();
    if let Err(e) = state
        .cache
        .set(&format!("{}{}", SESSION_KEY_PREFIX, session_hex), &blob, ttl)
        .await
    {
        error!(error = %e, "failed to store session");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    info!(
        provider = %provider_id,
        session_id = %session_hex,
        "authentication successful"
    );

    let cookie = cookies::session_cookie(
        &state.cfg.server,
        session_hex,
        time::Duration::seconds(ttl.as_secs() as i64),
    );

    let target = redirect_target.unwrap_or_else(|| "/".to_string());
    (jar.add(cookie), redirect_found(&target)).into_response()
}
