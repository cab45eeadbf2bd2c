//! Identity provider abstraction.
//!
//! OIDC and SAML providers expose the same capability set, so the session
//! middleware, the flow handlers, and the proxy stage never branch on
//! protocol. Providers are constructed once at startup, registered in an
//! immutable map, and stay read-only for the life of the process.

pub mod oidc;
pub mod saml;
pub mod session;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::Cache;
use crate::config::Config;
use crate::error::AuthError;

pub use session::{ClaimValue, OidcFlowState, ProviderKind, SamlFlowState, Session, SessionId};

/// Cache key prefix for sessions.
pub const SESSION_KEY_PREFIX: &str = "session:";
/// Cache key prefix for in-flight OIDC authorizations.
pub const OIDC_STATE_KEY_PREFIX: &str = "oidc:state:";
/// Cache key prefix for in-flight SAML requests.
pub const SAML_REQUEST_KEY_PREFIX: &str = "saml:request:";

/// How long transient flow state lives between redirect and callback.
pub const FLOW_STATE_TTL: Duration = Duration::from_secs(5 * 60);

/// Where to send the user-agent to start authentication, plus the transient
/// state the orchestrator must persist before redirecting.
#[derive(Debug, Clone)]
pub struct AuthRedirect {
    /// Target URL at the IdP.
    pub url: String,
    /// HTTP method hint for the user-agent hop.
    pub method: RedirectMethod,
    /// Form fields for POST-binding redirects.
    pub form_data: HashMap<String, String>,
    /// Cache slot for the flow state; stored by the caller, consumed by the
    /// callback.
    pub cache_key: String,
    pub cache_data: Vec<u8>,
    pub cache_ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMethod {
    Get,
    Post,
}

/// The callback request as seen by a provider: query parameters for OIDC,
/// form fields for SAML. Decoupled from the HTTP framework so providers are
/// testable without a server.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub query: HashMap<String, String>,
    pub form: HashMap<String, String>,
}

impl CallbackParams {
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn form_param(&self, name: &str) -> Option<&str> {
        self.form.get(name).map(String::as_str)
    }
}

/// Capability set shared by all identity providers.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Claim/attribute name -> outbound header name.
    fn header_mappings(&self) -> &HashMap<String, String>;

    /// Produce the IdP redirect and the flow state to persist.
    async fn initiate_auth(&self, redirect_url: &str) -> Result<AuthRedirect, AuthError>;

    /// Validate the IdP callback and return a populated session. The caller
    /// assigns the final session id and storage TTL.
    async fn handle_callback(&self, params: &CallbackParams) -> Result<Session, AuthError>;

    /// Fast session check; no network I/O.
    fn validate_session(&self, session: &Session) -> Result<(), AuthError>;

    /// Refresh the session in place. SAML providers return
    /// `RefreshUnsupported`.
    async fn refresh_session(&self, session: &mut Session) -> Result<(), AuthError>;

    /// SP metadata document, served for SAML providers only.
    fn sp_metadata(&self) -> Result<Option<String>, AuthError> {
        Ok(None)
    }
}

/// Immutable provider registry, keyed by provider id.
pub type ProviderRegistry = HashMap<String, Arc<dyn Provider>>;

/// Construct every configured provider. Any unreachable IdP is fatal.
pub async fn build_registry(
    cfg: &Config,
    cache: Arc<dyn Cache>,
) -> anyhow::Result<ProviderRegistry> {
    let mut registry: ProviderRegistry = HashMap::new();

    for provider_cfg in &cfg.providers {
        let provider: Arc<dyn Provider> = match provider_cfg.kind.as_str() {
            "oidc" => Arc::new(
                oidc::OidcProvider::discover(provider_cfg, Arc::clone(&cache)).await?,
            ),
            "saml" => Arc::new(
                saml::SamlProvider::bootstrap(
                    provider_cfg,
                    Arc::clone(&cache),
                    &cfg.server.base_url,
                )
                .await?,
            ),
            other => anyhow::bail!("unsupported provider type: {}", other),
        };

        tracing::info!(
            id = %provider.id(),
            name = %provider.name(),
            kind = %provider.kind(),
            "provider initialized"
        );
        registry.insert(provider_cfg.id.clone(), provider);
    }

    Ok(registry)
}
