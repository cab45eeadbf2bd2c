//! Session middleware.
//!
//! Turns the session cookie into a validated `Session` attached to the
//! request, refreshing OIDC tokens opportunistically. Every failure path
//! redirects to the provider-selection page; the only hard errors are cache
//! backend failures on the session read or write.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, warn};

use crate::auth::{ProviderKind, Session, SessionId, SESSION_KEY_PREFIX};
use crate::cache::CacheError;
use crate::server::{redirect_found, AppState};

/// Refresh is attempted only when the access token is inside this window of
/// its deadline (or already past it) while the session itself is alive.
const REFRESH_WINDOW: i64 = 5 * 60;

/// Wraps every proxied route; unauthenticated requests never reach the
/// backend.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(cookie) = jar.get(&state.cfg.server.cookie_name) else {
        debug!(path = %req.uri().path(), "no session cookie");
        return redirect_to_select();
    };
    let session_id = cookie.value();

    // Reject values that cannot be session ids before they become cache
    // keys.
    if SessionId::from_hex(session_id).is_none() {
        debug!("malformed session cookie");
        return redirect_to_select();
    }

    let session_key = format!("{}{}", SESSION_KEY_PREFIX, session_id);
    let blob = match state.cache.get(&session_key).await {
        Ok(blob) => blob,
        Err(CacheError::NotFound) => {
            debug!("session not found in cache");
            return redirect_to_select();
        }
        Err(e) => {
            error!(error = %e, "failed to read session from cache");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut session: Session = match serde_json::from_slice(&blob) {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "failed to deserialize session");
            return redirect_to_select();
        }
    };

    let Some(provider) = state.providers.get(&session.provider_id) else {
        error!(provider_id = %session.provider_id, "session references unknown provider");
        return redirect_to_select();
    };

    if let Err(validation_err) = provider.validate_session(&session) {
        debug!(error = %validation_err, "session validation failed");

        if !should_attempt_refresh(&session, Utc::now()) {
            return redirect_to_select();
        }

        if let Err(e) = provider.refresh_session(&mut session).await {
            warn!(error = %e, "token refresh failed");
            return redirect_to_select();
        }

        let ttl = match (session.expires_at - Utc::now()).to_std() {
            Ok(ttl) if !ttl.is_zero() => ttl,
            _ => {
                warn!("refreshed session already expired");
                return redirect_to_select();
            }
        };

        let blob = match serde_json::to_vec(&session) {
            Ok(blob) => blob,
            Err(e) => {
                error!(error = %e, "failed to serialize refreshed session");
                return redirect_to_select();
            }
        };
        if let Err(e) = state.cache.set(&session_key, &blob, ttl).await {
            error!(error = %e, "failed to store refreshed session");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }

        debug!(session_id = %session.id, "session refreshed and stored");
    }

    req.extensions_mut().insert(session);
    next.run(req).await
}

/// The refresh window covers an expired access token inside a still-valid
/// session; a passed `expires_at` is a non-recoverable re-auth.
fn should_attempt_refresh(session: &Session, now: DateTime<Utc>) -> bool {
    session.provider_kind == ProviderKind::Oidc
        && session
            .token_expiry
            .map(|expiry| expiry - now < Duration::seconds(REFRESH_WINDOW))
            .unwrap_or(false)
}

fn redirect_to_select() -> Response {
    redirect_found("/auth/select")
}
