//! JWKS fetching and caching for ID-token verification.
//!
//! Keys are cached by `kid` and refreshed when a token references an unknown
//! key or the refresh interval has elapsed, which covers IdP key rotation
//! without a background task.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tracing::debug;

/// How long a fetched key set stays fresh.
const REFRESH_INTERVAL: Duration = Duration::from_secs(3600);

/// Cached verification keys for one IdP.
pub struct JwksCache {
    jwks_uri: String,
    http: reqwest::Client,
    keys: RwLock<HashMap<String, DecodingKey>>,
    fetched_at: RwLock<Option<Instant>>,
}

/// JWKS wire format.
#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    kid: Option<String>,
    #[serde(rename = "use")]
    key_use: Option<String>,
    // RSA components, base64url
    n: Option<String>,
    e: Option<String>,
    // EC components, base64url
    x: Option<String>,
    y: Option<String>,
}

impl JwksCache {
    pub fn new(jwks_uri: String, http: reqwest::Client) -> Self {
        Self {
            jwks_uri,
            http,
            keys: RwLock::new(HashMap::new()),
            fetched_at: RwLock::new(None),
        }
    }

    /// Key for the given `kid`, refreshing the set when it is unknown.
    pub async fn key_for(&self, kid: &str) -> Result<DecodingKey> {
        if let Some(key) = self.cached(kid) {
            return Ok(key);
        }

        self.refresh().await?;

        self.cached(kid)
            .ok_or_else(|| anyhow!("no key with kid '{}' in JWKS", kid))
    }

    /// Any signing key, for tokens without a `kid` header. Only usable when
    /// the IdP publishes a single key.
    pub async fn any_key(&self) -> Result<DecodingKey> {
        if self.is_stale() {
            self.refresh().await?;
        }

        let keys = self
            .keys
            .read()
            .map_err(|_| anyhow!("JWKS lock poisoned"))?;
        match keys.len() {
            0 => Err(anyhow!("JWKS is empty")),
            1 => Ok(keys.values().next().cloned().expect("len checked")),
            n => Err(anyhow!(
                "token has no kid but the IdP publishes {} keys",
                n
            )),
        }
    }

    fn cached(&self, kid: &str) -> Option<DecodingKey> {
        if self.is_stale() {
            return None;
        }
        self.keys.read().ok()?.get(kid).cloned()
    }

    fn is_stale(&self) -> bool {
        match self.fetched_at.read() {
            Ok(guard) => match *guard {
                Some(at) => at.elapsed() > REFRESH_INTERVAL,
                None => true,
            },
            Err(_) => true,
        }
    }

    async fn refresh(&self) -> Result<()> {
        let response = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .with_context(|| format!("failed to fetch JWKS from {}", self.jwks_uri))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "JWKS request to {} returned status {}",
                self.jwks_uri,
                response.status()
            ));
        }

        let jwks: Jwks = response.json().await.context("failed to parse JWKS")?;

        let mut fresh = HashMap::new();
        for jwk in &jwks.keys {
            // Encryption keys are not usable for signature checks.
            if matches!(jwk.key_use.as_deref(), Some(u) if u != "sig") {
                continue;
            }
            let Some(kid) = jwk.kid.clone() else {
                continue;
            };
            match decoding_key(jwk) {
                Ok(key) => {
                    fresh.insert(kid, key);
                }
                Err(e) => {
                    debug!(kid = %kid, error = %e, "skipping unusable JWK");
                }
            }
        }

        if fresh.is_empty() {
            return Err(anyhow!("JWKS from {} contains no usable keys", self.jwks_uri));
        }

        let count = fresh.len();
        {
            let mut keys = self
                .keys
                .write()
                .map_err(|_| anyhow!("JWKS lock poisoned"))?;
            *keys = fresh;
        }
        {
            let mut fetched_at = self
                .fetched_at
                .write()
                .map_err(|_| anyhow!("JWKS lock poisoned"))?;
            *fetched_at = Some(Instant::now());
        }

        debug!(keys = count, url = %self.jwks_uri, "JWKS refreshed");
        Ok(())
    }
}

fn decoding_key(jwk: &Jwk) -> Result<DecodingKey> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_deref().ok_or_else(|| anyhow!("RSA key missing n"))?;
            let e = jwk.e.as_deref().ok_or_else(|| anyhow!("RSA key missing e"))?;
            DecodingKey::from_rsa_components(n, e).context("invalid RSA components")
        }
        "EC" => {
            let x = jwk.x.as_deref().ok_or_else(|| anyhow!("EC key missing x"))?;
            let y = jwk.y.as_deref().ok_or_else(|| anyhow!("EC key missing y"))?;
            DecodingKey::from_ec_components(x, y).context("invalid EC components")
        }
        other => Err(anyhow!("unsupported key type: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwks_parsing_skips_unusable_entries() {
        let jwks: Jwks = serde_json::from_str(
            r#"{
                "keys": [
                    {"kty": "RSA", "kid": "a", "use": "sig", "n": "sXchYg", "e": "AQAB"},
                    {"kty": "RSA", "kid": "b", "use": "enc", "n": "sXchYg", "e": "AQAB"},
                    {"kty": "oct", "kid": "c"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(jwks.keys.len(), 3);
        assert!(decoding_key(&jwks.keys[0]).is_ok());
        assert!(decoding_key(&jwks.keys[2]).is_err());
    }

    #[test]
    fn test_empty_cache_is_stale() {
        let cache = JwksCache::new(
            "https://idp.example.com/keys".to_string(),
            reqwest::Client::new(),
        );
        assert!(cache.is_stale());
        assert!(cache.cached("any").is_none());
    }
}
