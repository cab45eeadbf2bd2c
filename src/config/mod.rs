//! Proxy configuration.
//!
//! Loaded from a single YAML file at startup, with credential overrides from
//! the environment. Durations are integer seconds. Validation happens once,
//! before anything else is constructed; a bad config aborts the process.

pub mod validation;

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    pub backend: BackendConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally visible origin of this proxy; callback and metadata URLs
    /// are derived from it.
    #[serde(default)]
    pub base_url: String,

    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    #[serde(default)]
    pub cookie_domain: String,

    #[serde(default)]
    pub cookie_secure: bool,

    #[serde(default = "default_true")]
    pub cookie_http_only: bool,

    /// One of "lax", "strict", "none".
    #[serde(default = "default_same_site")]
    pub cookie_same_site: String,

    /// Session hard deadline in seconds.
    #[serde(default = "default_session_ttl")]
    pub session_ttl: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: String,

    /// Upstream request timeout in seconds.
    #[serde(default = "default_backend_timeout")]
    pub timeout: u64,

    /// Forward the client-supplied Host (or X-Forwarded-Host) upstream.
    /// Trusts the front proxy to sanitize those headers.
    #[serde(default)]
    pub preserve_host: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// "memory" or "redis".
    #[serde(rename = "type", default = "default_cache_type")]
    pub kind: String,

    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kind: default_cache_type(),
            redis: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// host:port of the Redis endpoint.
    pub address: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub db: i64,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub name: String,

    /// "oidc" or "saml".
    #[serde(rename = "type")]
    pub kind: String,

    /// Claim/attribute name -> outbound header name.
    #[serde(default)]
    pub header_mappings: HashMap<String, String>,

    #[serde(default)]
    pub oidc: Option<OidcProviderConfig>,

    #[serde(default)]
    pub saml: Option<SamlProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcProviderConfig {
    /// IdP issuer URL; discovery document lives under it.
    pub issuer: String,

    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// Must include "openid".
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Google Workspace hosted-domain hint, appended to the authorize URL.
    #[serde(default)]
    pub hd: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamlProviderConfig {
    #[serde(default)]
    pub idp_metadata_url: Option<String>,

    #[serde(default)]
    pub idp_metadata_xml: Option<String>,

    pub sp_entity_id: String,

    pub acs_url: String,

    /// SP X.509 certificate, PEM.
    pub certificate_path: String,

    /// SP RSA private key, PKCS#1 or PKCS#8 PEM.
    pub private_key_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "json" or "text".
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    /// When false and exactly one provider is configured, the selection page
    /// is skipped and authentication starts immediately.
    #[serde(default = "default_true")]
    pub enable: bool,

    #[serde(default = "default_ui_title")]
    pub title: String,

    #[serde(default = "default_gradient_start")]
    pub gradient_start: String,

    #[serde(default = "default_gradient_end")]
    pub gradient_end: String,

    #[serde(default)]
    pub logo_path: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enable: true,
            title: default_ui_title(),
            gradient_start: default_gradient_start(),
            gradient_end: default_gradient_end(),
            logo_path: String::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: String::new(),
            cookie_name: default_cookie_name(),
            cookie_domain: String::new(),
            cookie_secure: false,
            cookie_http_only: true,
            cookie_same_site: default_same_site(),
            session_ttl: default_session_ttl(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cookie_name() -> String {
    "sso-session".to_string()
}

fn default_true() -> bool {
    true
}

fn default_same_site() -> String {
    "lax".to_string()
}

fn default_session_ttl() -> u64 {
    24 * 60 * 60
}

fn default_backend_timeout() -> u64 {
    30
}

fn default_cache_type() -> String {
    "memory".to_string()
}

fn default_pool_size() -> u32 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_ui_title() -> String {
    "Sign In".to_string()
}

fn default_gradient_start() -> String {
    "#667eea".to_string()
}

fn default_gradient_end() -> String {
    "#764ba2".to_string()
}

impl Config {
    /// Load a config file and apply environment overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let mut cfg: Config =
            serde_yaml::from_str(&data).context("failed to parse config file")?;

        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Environment values override file values: `<ID>_CLIENT_ID`,
    /// `<ID>_CLIENT_SECRET` per OIDC provider, `REDIS_PASSWORD` for the
    /// Redis cache.
    fn apply_env_overrides(&mut self) {
        for provider in &mut self.providers {
            if let Some(oidc) = provider.oidc.as_mut() {
                if let Ok(client_id) = std::env::var(format!("{}_CLIENT_ID", provider.id)) {
                    if !client_id.is_empty() {
                        oidc.client_id = client_id;
                    }
                }
                if let Ok(secret) = std::env::var(format!("{}_CLIENT_SECRET", provider.id)) {
                    if !secret.is_empty() {
                        oidc.client_secret = secret;
                    }
                }
            }
        }

        if self.cache.kind == "redis" {
            if let Some(redis) = self.cache.redis.as_mut() {
                if let Ok(password) = std::env::var("REDIS_PASSWORD") {
                    if !password.is_empty() {
                        redis.password = password;
                    }
                }
            }
        }
    }
}
