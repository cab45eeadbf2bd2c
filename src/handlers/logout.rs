//! Logout handler.

use std::collections::HashMap;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Form;
use axum_extra::extract::CookieJar;
use tracing::{info, warn};

use crate::auth::SESSION_KEY_PREFIX;
use crate::handlers::select::reject_bad_csrf;
use crate::security::cookies;
use crate::server::{redirect_found, AppState};

/// POST /auth/logout — CSRF-validated; deletes the session and expires the
/// cookie. A failed cache delete is a warning, not a failure: the cookie is
/// cleared either way and the entry ages out on its TTL.
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if let Some(response) = reject_bad_csrf(&state, &form, &headers).await {
        return response;
    }

    if let Some(cookie) = jar.get(&state.cfg.server.cookie_name) {
        let key = format!("{}{}", SESSION_KEY_PREFIX, cookie.value());
        if let Err(e) = state.cache.delete(&key).await {
            warn!(error = %e, "failed to delete session from cache");
        }
    }

    info!("user logged out");

    let jar = jar.add(cookies::clear_session_cookie(&state.cfg.server));
    (jar, redirect_found("/auth/select")).into_response()
}
