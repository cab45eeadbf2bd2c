//! CSRF token service.
//!
//! Tokens are opaque 32-byte values whose existence in the cache is the only
//! state. Validation consumes the entry, so every token works exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;

use crate::cache::{Cache, CacheError};
use crate::security;

const CSRF_KEY_PREFIX: &str = "csrf:";
const CSRF_TTL: Duration = Duration::from_secs(10 * 60);

/// Header checked when the form carries no `csrf_token` field.
const CSRF_HEADER: &str = "x-csrf-token";

#[derive(Debug, thiserror::Error)]
pub enum CsrfError {
    #[error("missing CSRF token")]
    Missing,

    #[error("invalid or expired CSRF token")]
    Invalid,

    #[error("CSRF check failed: {0}")]
    Backend(String),
}

#[derive(Clone)]
pub struct CsrfService {
    cache: Arc<dyn Cache>,
}

impl CsrfService {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// Mint a token for embedding in a form.
    pub async fn generate(&self) -> Result<String, CsrfError> {
        let token = security::random_token();
        self.cache
            .set(&format!("{}{}", CSRF_KEY_PREFIX, token), b"1", CSRF_TTL)
            .await
            .map_err(|e| CsrfError::Backend(e.to_string()))?;
        Ok(token)
    }

    /// Validate and consume a token extracted from a state-changing request.
    pub async fn validate(&self, token: Option<&str>) -> Result<(), CsrfError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(CsrfError::Missing)?;
        let key = format!("{}{}", CSRF_KEY_PREFIX, token);

        match self.cache.exists(&key).await {
            Ok(true) => {}
            Ok(false) => return Err(CsrfError::Invalid),
            Err(e) => return Err(CsrfError::Backend(e.to_string())),
        }

        // Single use: consumed on first successful validation.
        if let Err(e) = self.cache.delete(&key).await {
            if !matches!(e, CacheError::NotFound) {
                tracing::warn!(error = %e, "failed to delete consumed CSRF token");
            }
        }

        Ok(())
    }
}

/// Pull the token from the form body, falling back to the `X-CSRF-Token`
/// header.
pub fn token_from_request<'a>(
    form: &'a HashMap<String, String>,
    headers: &'a HeaderMap,
) -> Option<&'a str> {
    form.get("csrf_token")
        .map(String::as_str)
        .filter(|t| !t.is_empty())
        .or_else(|| headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn service() -> CsrfService {
        CsrfService::new(Arc::new(MemoryCache::new()))
    }

    #[tokio::test]
    async fn test_token_is_single_use() {
        let csrf = service();
        let token = csrf.generate().await.unwrap();

        csrf.validate(Some(&token)).await.unwrap();

        let err = csrf.validate(Some(&token)).await.unwrap_err();
        assert!(matches!(err, CsrfError::Invalid));
    }

    #[tokio::test]
    async fn test_missing_token_rejected() {
        let csrf = service();
        assert!(matches!(csrf.validate(None).await.unwrap_err(), CsrfError::Missing));
        assert!(matches!(csrf.validate(Some("")).await.unwrap_err(), CsrfError::Missing));
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let csrf = service();
        let err = csrf.validate(Some("never-issued")).await.unwrap_err();
        assert!(matches!(err, CsrfError::Invalid));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let csrf = CsrfService::new(Arc::clone(&cache));

        // Plant a token with a tiny TTL instead of waiting ten minutes.
        let token = "short-lived";
        cache
            .set(
                &format!("csrf:{}", token),
                b"1",
                Duration::from_millis(20),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = csrf.validate(Some(token)).await.unwrap_err();
        assert!(matches!(err, CsrfError::Invalid));
    }

    #[test]
    fn test_token_extraction_prefers_form_field() {
        let mut form = HashMap::new();
        form.insert("csrf_token".to_string(), "from-form".to_string());

        let mut headers = HeaderMap::new();
        headers.insert("x-csrf-token", "from-header".parse().unwrap());

        assert_eq!(token_from_request(&form, &headers), Some("from-form"));

        form.clear();
        assert_eq!(token_from_request(&form, &headers), Some("from-header"));

        headers.clear();
        assert_eq!(token_from_request(&form, &headers), None);
    }
}
