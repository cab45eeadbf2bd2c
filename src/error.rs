//! Request-scoped authentication errors.
//!
//! Startup failures (config, provider construction) use `anyhow` and abort
//! the process; everything that can happen while serving a request is one of
//! these variants, translated to an HTTP status at the handler boundary.

use axum::http::StatusCode;

use crate::cache::CacheError;

/// Errors produced by providers, the session middleware, and the auth flow
/// handlers.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed callback or missing required parameter.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Transient flow state not found; treated as replay or expiration.
    #[error("invalid or expired authentication state")]
    InvalidState,

    /// Flow state or session references a different provider.
    #[error("provider mismatch")]
    ProviderMismatch,

    /// Signature, issuer, audience, or time-window violation.
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// The IdP rejected the authorization code or refresh grant.
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),

    /// Session hard deadline has passed.
    #[error("session expired")]
    SessionExpired,

    /// The provider has no refresh mechanism (SAML).
    #[error("session refresh not supported")]
    RefreshUnsupported,

    /// The refresh grant failed; caller falls back to re-authentication.
    #[error("refresh failed: {0}")]
    RefreshFailed(String),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// HTTP status this error maps to when it reaches a handler.
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::InvalidState
            | AuthError::ProviderMismatch
            | AuthError::VerificationFailed(_)
            | AuthError::ExchangeFailed(_)
            | AuthError::SessionExpired
            | AuthError::RefreshUnsupported
            | AuthError::RefreshFailed(_) => StatusCode::UNAUTHORIZED,
            AuthError::Cache(_) | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_failures_map_to_unauthorized() {
        assert_eq!(AuthError::InvalidState.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::ProviderMismatch.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AuthError::ExchangeFailed("denied".into()).status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_missing_parameter_is_bad_request() {
        let err = AuthError::BadRequest("missing code parameter".into());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "bad request: missing code parameter");
    }

    #[test]
    fn test_cache_errors_are_internal() {
        let err = AuthError::from(CacheError::Backend("connection reset".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
