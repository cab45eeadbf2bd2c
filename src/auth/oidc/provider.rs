//! OIDC provider: Authorization Code flow with PKCE.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{decode, decode_header, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use super::discovery::{self, DiscoveryDocument};
use super::jwks::JwksCache;
use crate::auth::{
    AuthRedirect, CallbackParams, ClaimValue, OidcFlowState, Provider, ProviderKind,
    RedirectMethod, Session, SessionId, FLOW_STATE_TTL, OIDC_STATE_KEY_PREFIX,
};
use crate::cache::{Cache, CacheError};
use crate::config::{OidcProviderConfig, ProviderConfig};
use crate::error::AuthError;
use crate::security;

/// Clock skew tolerated when validating ID-token timestamps.
const CLOCK_SKEW_SECS: u64 = 30;

/// Fallback access-token lifetime when the IdP omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

pub struct OidcProvider {
    id: String,
    name: String,
    cfg: OidcProviderConfig,
    header_mappings: HashMap<String, String>,
    cache: Arc<dyn Cache>,
    discovery: DiscoveryDocument,
    jwks: JwksCache,
    http: reqwest::Client,
}

/// Token endpoint response, for both the code exchange and the refresh
/// grant.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl OidcProvider {
    /// Discover the IdP and build the provider. Network failure here is
    /// fatal to startup.
    pub async fn discover(
        provider_cfg: &ProviderConfig,
        cache: Arc<dyn Cache>,
    ) -> anyhow::Result<Self> {
        let oidc_cfg = provider_cfg
            .oidc
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("OIDC config is required"))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to create HTTP client: {}", e))?;

        let doc = discovery::discover(&http, &oidc_cfg.issuer).await?;
        let jwks = JwksCache::new(doc.jwks_uri.clone(), http.clone());

        Ok(Self::assemble(provider_cfg, oidc_cfg.clone(), cache, doc, jwks, http))
    }

    fn assemble(
        provider_cfg: &ProviderConfig,
        cfg: OidcProviderConfig,
        cache: Arc<dyn Cache>,
        discovery: DiscoveryDocument,
        jwks: JwksCache,
        http: reqwest::Client,
    ) -> Self {
        Self {
            id: provider_cfg.id.clone(),
            name: provider_cfg.name.clone(),
            cfg,
            header_mappings: provider_cfg.header_mappings.clone(),
            cache,
            discovery,
            jwks,
            http,
        }
    }

    /// Build the IdP authorization URL for one flow.
    fn authorize_url(&self, redirect_url: &str, state: &str, code_challenge: &str) -> String {
        let separator = if self.discovery.authorization_endpoint.contains('?') {
            '&'
        } else {
            '?'
        };

        let mut url = format!(
            "{}{}response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
            self.discovery.authorization_endpoint,
            separator,
            urlencoding::encode(&self.cfg.client_id),
            urlencoding::encode(redirect_url),
            urlencoding::encode(&self.cfg.scopes.join(" ")),
            urlencoding::encode(state),
            code_challenge,
        );

        if let Some(hd) = &self.cfg.hd {
            url.push_str("&hd=");
            url.push_str(&urlencoding::encode(hd));
        }

        url
    }

    async fn exchange_code(
        &self,
        code: &str,
        flow: &OidcFlowState,
    ) -> Result<TokenResponse, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            // IdPs require byte-exact equality with the authorize request.
            ("redirect_uri", flow.redirect_url.as_str()),
            ("client_id", self.cfg.client_id.as_str()),
            ("client_secret", self.cfg.client_secret.as_str()),
            ("code_verifier", flow.code_verifier.as_str()),
        ];

        self.token_request(&params).await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let response = self
            .http
            .post(&self.discovery.token_endpoint)
            .form(params)
            .send()
            .await
            .map_err(|e| AuthError::ExchangeFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::ExchangeFailed(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::ExchangeFailed(format!("invalid token response: {}", e)))
    }

    /// Verify signature, issuer, audience, and time window; return the
    /// decoded claims.
    async fn verify_id_token(
        &self,
        raw: &str,
    ) -> Result<HashMap<String, ClaimValue>, AuthError> {
        let header =
            decode_header(raw).map_err(|e| AuthError::VerificationFailed(e.to_string()))?;

        let key = match header.kid.as_deref() {
            Some(kid) => self.jwks.key_for(kid).await,
            None => self.jwks.any_key().await,
        }
        .map_err(|e| AuthError::VerificationFailed(e.to_string()))?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.discovery.issuer]);
        validation.set_audience(&[&self.cfg.client_id]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = CLOCK_SKEW_SECS;

        let data = decode::<HashMap<String, serde_json::Value>>(raw, &key, &validation)
            .map_err(|e| AuthError::VerificationFailed(e.to_string()))?;

        Ok(data
            .claims
            .into_iter()
            .map(|(name, value)| (name, ClaimValue::from(value)))
            .collect())
    }
}

/// Derive the PKCE S256 challenge from a code verifier.
fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[async_trait]
impl Provider for OidcProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Oidc
    }

    fn header_mappings(&self) -> &HashMap<String, String> {
        &self.header_mappings
    }

    async fn initiate_auth(&self, redirect_url: &str) -> Result<AuthRedirect, AuthError> {
        let verifier_bytes: [u8; 32] = rand::random();
        let code_verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);
        let code_challenge = pkce_challenge(&code_verifier);

        let state = Uuid::new_v4().to_string();
        let url = self.authorize_url(redirect_url, &state, &code_challenge);

        let flow = OidcFlowState {
            state: state.clone(),
            provider_id: self.id.clone(),
            code_verifier,
            redirect_url: redirect_url.to_string(),
            created_at: Utc::now(),
        };
        let cache_data = serde_json::to_vec(&flow)
            .map_err(|e| AuthError::Internal(format!("failed to serialize flow state: {}", e)))?;

        debug!(provider = %self.id, state = %state, "OIDC flow initiated");

        Ok(AuthRedirect {
            url,
            method: RedirectMethod::Get,
            form_data: HashMap::new(),
            cache_key: format!("{}{}", OIDC_STATE_KEY_PREFIX, state),
            cache_data,
            cache_ttl: FLOW_STATE_TTL,
        })
    }

    async fn handle_callback(&self, params: &CallbackParams) -> Result<Session, AuthError> {
        let code = params
            .query_param("code")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AuthError::BadRequest("missing code parameter".to_string()))?;
        let state = params
            .query_param("state")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AuthError::BadRequest("missing state parameter".to_string()))?;

        let state_key = format!("{}{}", OIDC_STATE_KEY_PREFIX, state);
        let blob = match self.cache.get(&state_key).await {
            Ok(blob) => blob,
            Err(CacheError::NotFound) => return Err(AuthError::InvalidState),
            Err(e) => return Err(e.into()),
        };

        let flow: OidcFlowState = serde_json::from_slice(&blob)
            .map_err(|e| AuthError::Internal(format!("corrupt flow state: {}", e)))?;

        if flow.provider_id != self.id {
            return Err(AuthError::ProviderMismatch);
        }

        // Consume the state before the exchange: a concurrent duplicate
        // callback must observe InvalidState, never a second session.
        if let Err(e) = self.cache.delete(&state_key).await {
            warn!(error = %e, "failed to delete consumed OIDC state");
        }

        let token = self.exchange_code(code, &flow).await?;

        let raw_id_token = token
            .id_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AuthError::VerificationFailed("no id_token in token response".to_string())
            })?;

        let claims = self.verify_id_token(&raw_id_token).await?;

        let now = Utc::now();
        let token_expiry = now
            + chrono::Duration::seconds(
                token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
            );

        Ok(Session {
            id: SessionId::new(),
            provider_id: self.id.clone(),
            provider_kind: ProviderKind::Oidc,
            user_info: claims,
            created_at: now,
            expires_at: token_expiry,
            access_token: token.access_token,
            refresh_token: token.refresh_token.unwrap_or_default(),
            id_token: raw_id_token,
            token_expiry: Some(token_expiry),
            assertion: String::new(),
            csrf_secret: security::random_token(),
        })
    }

    fn validate_session(&self, session: &Session) -> Result<(), AuthError> {
        if session.provider_id != self.id {
            return Err(AuthError::ProviderMismatch);
        }
        if session.is_expired(Utc::now()) {
            return Err(AuthError::SessionExpired);
        }
        Ok(())
    }

    async fn refresh_session(&self, session: &mut Session) -> Result<(), AuthError> {
        if session.refresh_token.is_empty() {
            return Err(AuthError::RefreshUnsupported);
        }

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", session.refresh_token.as_str()),
            ("client_id", self.cfg.client_id.as_str()),
            ("client_secret", self.cfg.client_secret.as_str()),
        ];
        let token = self
            .token_request(&params)
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))?;

        if let Some(raw_id_token) = token.id_token.as_ref().filter(|t| !t.is_empty()) {
            let claims = self.verify_id_token(raw_id_token).await?;
            session.user_info = claims;
            session.id_token = raw_id_token.clone();
        }

        apply_refreshed_token(session, &token, Utc::now());

        debug!(provider = %self.id, session_id = %session.id, "OIDC session refreshed");
        Ok(())
    }
}

/// Fold a refresh-grant response into the session. A rotated refresh token
/// replaces the old one; absence keeps it.
fn apply_refreshed_token(
    session: &mut Session,
    token: &TokenResponse,
    now: chrono::DateTime<Utc>,
) {
    session.access_token = token.access_token.clone();

    if let Some(refresh_token) = token.refresh_token.as_ref().filter(|t| !t.is_empty()) {
        session.refresh_token = refresh_token.clone();
    }

    let token_expiry =
        now + chrono::Duration::seconds(token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS));
    session.token_expiry = Some(token_expiry);
    session.expires_at = token_expiry;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::ProviderConfig;

    fn test_provider(cache: Arc<dyn Cache>) -> OidcProvider {
        let provider_cfg = ProviderConfig {
            id: "azure".to_string(),
            name: "Azure AD".to_string(),
            kind: "oidc".to_string(),
            header_mappings: HashMap::from([(
                "email".to_string(),
                "X-User-Email".to_string(),
            )]),
            oidc: None,
            saml: None,
        };
        let oidc_cfg = OidcProviderConfig {
            issuer: "https://login.example.com/tenant/v2.0".to_string(),
            client_id: "app-client".to_string(),
            client_secret: "s3cret".to_string(),
            scopes: vec!["openid".to_string(), "email".to_string()],
            hd: None,
        };
        let discovery = DiscoveryDocument {
            issuer: oidc_cfg.issuer.clone(),
            authorization_endpoint: "https://login.example.com/authorize".to_string(),
            token_endpoint: "https://login.example.com/token".to_string(),
            jwks_uri: "https://login.example.com/keys".to_string(),
        };
        let http = reqwest::Client::new();
        let jwks = JwksCache::new(discovery.jwks_uri.clone(), http.clone());

        OidcProvider::assemble(&provider_cfg, oidc_cfg, cache, discovery, jwks, http)
    }

    #[test]
    fn test_pkce_challenge_matches_rfc7636_vector() {
        assert_eq!(
            pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[tokio::test]
    async fn test_initiate_auth_builds_authorize_url_and_flow_state() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let provider = test_provider(Arc::clone(&cache));

        let redirect = provider
            .initiate_auth("https://sso.example.com/auth/oidc/azure/callback")
            .await
            .unwrap();

        assert!(redirect.url.starts_with("https://login.example.com/authorize?"));
        assert!(redirect.url.contains("response_type=code"));
        assert!(redirect.url.contains("client_id=app-client"));
        assert!(redirect.url.contains("scope=openid%20email"));
        assert!(redirect.url.contains("code_challenge_method=S256"));
        assert_eq!(redirect.method, RedirectMethod::Get);
        assert_eq!(redirect.cache_ttl, Duration::from_secs(300));
        assert!(redirect.cache_key.starts_with("oidc:state:"));

        let flow: OidcFlowState = serde_json::from_slice(&redirect.cache_data).unwrap();
        assert_eq!(flow.provider_id, "azure");
        assert_eq!(
            flow.redirect_url,
            "https://sso.example.com/auth/oidc/azure/callback"
        );
        assert_eq!(redirect.cache_key, format!("oidc:state:{}", flow.state));
        // The challenge in the URL is derived from the stored verifier.
        assert!(redirect
            .url
            .contains(&format!("code_challenge={}", pkce_challenge(&flow.code_verifier))));
    }

    #[tokio::test]
    async fn test_hd_hint_appended_when_configured() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let mut provider = test_provider(cache);
        provider.cfg.hd = Some("example.com".to_string());

        let redirect = provider
            .initiate_auth("https://sso.example.com/cb")
            .await
            .unwrap();
        assert!(redirect.url.contains("&hd=example.com"));
    }

    #[tokio::test]
    async fn test_callback_requires_code_and_state() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let provider = test_provider(cache);

        let mut params = CallbackParams::default();
        params.query.insert("state".to_string(), "S".to_string());
        let err = provider.handle_callback(&params).await.unwrap_err();
        assert!(matches!(err, AuthError::BadRequest(_)));

        let mut params = CallbackParams::default();
        params.query.insert("code".to_string(), "C".to_string());
        let err = provider.handle_callback(&params).await.unwrap_err();
        assert!(matches!(err, AuthError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_unknown_state_is_invalid() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let provider = test_provider(cache);

        let mut params = CallbackParams::default();
        params.query.insert("code".to_string(), "C".to_string());
        params.query.insert("state".to_string(), "never-issued".to_string());

        let err = provider.handle_callback(&params).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidState));
    }

    #[tokio::test]
    async fn test_state_for_other_provider_is_rejected() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let provider = test_provider(Arc::clone(&cache));

        let flow = OidcFlowState {
            state: "S".to_string(),
            provider_id: "okta".to_string(),
            code_verifier: "v".to_string(),
            redirect_url: "https://sso.example.com/cb".to_string(),
            created_at: Utc::now(),
        };
        cache
            .set(
                "oidc:state:S",
                &serde_json::to_vec(&flow).unwrap(),
                Duration::from_secs(300),
            )
            .await
            .unwrap();

        let mut params = CallbackParams::default();
        params.query.insert("code".to_string(), "C".to_string());
        params.query.insert("state".to_string(), "S".to_string());

        let err = provider.handle_callback(&params).await.unwrap_err();
        assert!(matches!(err, AuthError::ProviderMismatch));
    }

    #[test]
    fn test_refresh_token_rotation() {
        let now = Utc::now();
        let mut session = Session {
            id: SessionId::new(),
            provider_id: "azure".to_string(),
            provider_kind: ProviderKind::Oidc,
            user_info: HashMap::new(),
            created_at: now,
            expires_at: now + chrono::Duration::minutes(1),
            access_token: "old-at".to_string(),
            refresh_token: "old-rt".to_string(),
            id_token: String::new(),
            token_expiry: Some(now + chrono::Duration::minutes(1)),
            assertion: String::new(),
            csrf_secret: String::new(),
        };

        // No refresh token in the response: the old one is retained.
        let token = TokenResponse {
            access_token: "new-at".to_string(),
            refresh_token: None,
            id_token: None,
            expires_in: Some(3600),
        };
        apply_refreshed_token(&mut session, &token, now);
        assert_eq!(session.access_token, "new-at");
        assert_eq!(session.refresh_token, "old-rt");
        assert_eq!(session.token_expiry, Some(now + chrono::Duration::seconds(3600)));
        assert_eq!(session.expires_at, now + chrono::Duration::seconds(3600));

        // A rotated refresh token replaces the old one.
        let token = TokenResponse {
            access_token: "newer-at".to_string(),
            refresh_token: Some("new-rt".to_string()),
            id_token: None,
            expires_in: Some(3600),
        };
        apply_refreshed_token(&mut session, &token, now);
        assert_eq!(session.refresh_token, "new-rt");
    }

    #[tokio::test]
    async fn test_refresh_without_token_is_unsupported() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let provider = test_provider(cache);

        let now = Utc::now();
        let mut session = Session {
            id: SessionId::new(),
            provider_id: "azure".to_string(),
            provider_kind: ProviderKind::Oidc,
            user_info: HashMap::new(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
            access_token: "at".to_string(),
            refresh_token: String::new(),
            id_token: "idt".to_string(),
            token_expiry: Some(now + chrono::Duration::hours(1)),
            assertion: String::new(),
            csrf_secret: String::new(),
        };

        let err = provider.refresh_session(&mut session).await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshUnsupported));
    }

    #[tokio::test]
    async fn test_validate_session_checks_provider_and_expiry() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let provider = test_provider(cache);

        let now = Utc::now();
        let mut session = Session {
            id: SessionId::new(),
            provider_id: "azure".to_string(),
            provider_kind: ProviderKind::Oidc,
            user_info: HashMap::new(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
            access_token: String::new(),
            refresh_token: String::new(),
            id_token: String::new(),
            token_expiry: None,
            assertion: String::new(),
            csrf_secret: String::new(),
        };
        provider.validate_session(&session).unwrap();

        session.provider_id = "okta".to_string();
        assert!(matches!(
            provider.validate_session(&session).unwrap_err(),
            AuthError::ProviderMismatch
        ));

        session.provider_id = "azure".to_string();
        session.expires_at = now - chrono::Duration::seconds(1);
        assert!(matches!(
            provider.validate_session(&session).unwrap_err(),
            AuthError::SessionExpired
        ));
    }
}
