//! Session and transient flow-state types.
//!
//! Everything in this module is serialized to JSON and parked in the cache:
//! sessions under `session:<id>`, in-flight OIDC authorizations under
//! `oidc:state:<state>`, in-flight SAML requests under `saml:request:<id>`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique session identifier (16 random bytes, hex-encoded in the cookie).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId([u8; 16]);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(rand::random())
    }

    /// Hex form used in the cookie and the cache key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex. Anything that is not exactly 16 bytes is rejected.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Which protocol a provider (and the sessions it mints) speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Oidc,
    Saml,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Oidc => write!(f, "oidc"),
            ProviderKind::Saml => write!(f, "saml"),
        }
    }
}

/// A single claim or attribute value.
///
/// OIDC claims and SAML attributes disagree about shape: most values are
/// strings, SAML attributes may carry several, and OIDC tokens include
/// booleans and numbers. The untagged representation round-trips each shape
/// exactly, so a list never collapses into a string on the way through the
/// cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimValue {
    String(String),
    List(Vec<String>),
    Other(serde_json::Value),
}

impl ClaimValue {
    /// Header-friendly rendering: strings verbatim, lists comma-joined,
    /// scalars via their JSON text. Empty renderings mean "do not set".
    pub fn to_header_value(&self) -> String {
        match self {
            ClaimValue::String(s) => s.clone(),
            ClaimValue::List(items) => items.join(","),
            ClaimValue::Other(value) => match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => String::new(),
                other => other.to_string(),
            },
        }
    }
}

impl From<serde_json::Value> for ClaimValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => ClaimValue::String(s),
            serde_json::Value::Array(items) => {
                let mut strings = Vec::with_capacity(items.len());
                for item in &items {
                    match item.as_str() {
                        Some(s) => strings.push(s.to_string()),
                        None => return ClaimValue::Other(serde_json::Value::Array(items)),
                    }
                }
                ClaimValue::List(strings)
            }
            other => ClaimValue::Other(other),
        }
    }
}

/// The canonical authenticated principal, stored under `session:<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub provider_id: String,
    pub provider_kind: ProviderKind,

    /// Claims (OIDC) or attributes (SAML) asserted by the IdP, including
    /// URN-shaped SAML attribute names.
    pub user_info: HashMap<String, ClaimValue>,

    pub created_at: DateTime<Utc>,

    /// Session hard deadline. Always after `created_at`.
    pub expires_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id_token: String,

    /// OIDC access-token deadline; may be sooner than `expires_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expiry: Option<DateTime<Utc>>,

    /// Raw SAML assertion XML, retained for audit.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub assertion: String,

    /// Per-session CSRF secret, reserved for same-session form flows.
    #[serde(default)]
    pub csrf_secret: String,
}

impl Session {
    /// Whether the session-level hard deadline has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// One in-flight OIDC authorization, parked under `oidc:state:<state>`.
///
/// Single-use: the callback consumes (deletes) it before exchanging the
/// code, so a replayed callback finds nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcFlowState {
    pub state: String,
    pub provider_id: String,
    pub code_verifier: String,
    pub redirect_url: String,
    pub created_at: DateTime<Utc>,
}

/// One in-flight SAML AuthnRequest, parked under `saml:request:<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamlFlowState {
    pub id: String,
    pub provider_id: String,
    pub relay_state: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_session_id_hex_roundtrip() {
        let id = SessionId::new();
        let parsed = SessionId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_session_id_rejects_bad_input() {
        assert!(SessionId::from_hex("not-hex").is_none());
        assert!(SessionId::from_hex("abcd").is_none());
        assert!(SessionId::from_hex("").is_none());
    }

    #[test]
    fn test_claim_value_shapes_survive_roundtrip() {
        let mut user_info = HashMap::new();
        user_info.insert("email".to_string(), ClaimValue::String("alice@x.com".to_string()));
        user_info.insert(
            "groups".to_string(),
            ClaimValue::List(vec!["admins".to_string(), "users".to_string()]),
        );
        user_info.insert(
            "email_verified".to_string(),
            ClaimValue::Other(serde_json::json!(true)),
        );

        let encoded = serde_json::to_vec(&user_info).unwrap();
        let decoded: HashMap<String, ClaimValue> = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(decoded, user_info);
        assert!(matches!(decoded["email"], ClaimValue::String(_)));
        assert!(matches!(decoded["groups"], ClaimValue::List(_)));
        assert!(matches!(decoded["email_verified"], ClaimValue::Other(_)));
    }

    #[test]
    fn test_claim_value_from_json() {
        assert_eq!(
            ClaimValue::from(serde_json::json!("alice")),
            ClaimValue::String("alice".to_string())
        );
        assert_eq!(
            ClaimValue::from(serde_json::json!(["a", "b"])),
            ClaimValue::List(vec!["a".to_string(), "b".to_string()])
        );
        // Mixed arrays keep their original JSON shape.
        assert!(matches!(
            ClaimValue::from(serde_json::json!(["a", 1])),
            ClaimValue::Other(_)
        ));
        assert!(matches!(
            ClaimValue::from(serde_json::json!(42)),
            ClaimValue::Other(_)
        ));
    }

    #[test]
    fn test_header_rendering() {
        assert_eq!(
            ClaimValue::String("alice@x.com".to_string()).to_header_value(),
            "alice@x.com"
        );
        assert_eq!(
            ClaimValue::List(vec!["a".to_string(), "b".to_string()]).to_header_value(),
            "a,b"
        );
        assert_eq!(ClaimValue::Other(serde_json::json!(true)).to_header_value(), "true");
        assert_eq!(ClaimValue::Other(serde_json::Value::Null).to_header_value(), "");
    }

    fn sample_session() -> Session {
        let now = Utc::now();
        let mut user_info = HashMap::new();
        user_info.insert("email".to_string(), ClaimValue::String("alice@x.com".to_string()));
        user_info.insert(
            "urn:oid:0.9.2342.19200300.100.1.3".to_string(),
            ClaimValue::List(vec!["bob@x.com".to_string()]),
        );

        Session {
            id: SessionId::new(),
            provider_id: "azure".to_string(),
            provider_kind: ProviderKind::Oidc,
            user_info,
            created_at: now,
            expires_at: now + Duration::hours(8),
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            id_token: "idt".to_string(),
            token_expiry: Some(now + Duration::hours(1)),
            assertion: String::new(),
            csrf_secret: "secret".to_string(),
        }
    }

    #[test]
    fn test_session_roundtrip_preserves_all_fields() {
        let session = sample_session();

        let encoded = serde_json::to_vec(&session).unwrap();
        let decoded: Session = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(decoded.id, session.id);
        assert_eq!(decoded.provider_id, session.provider_id);
        assert_eq!(decoded.provider_kind, session.provider_kind);
        assert_eq!(decoded.user_info, session.user_info);
        assert_eq!(decoded.created_at, session.created_at);
        assert_eq!(decoded.expires_at, session.expires_at);
        assert_eq!(decoded.access_token, session.access_token);
        assert_eq!(decoded.refresh_token, session.refresh_token);
        assert_eq!(decoded.id_token, session.id_token);
        assert_eq!(decoded.token_expiry, session.token_expiry);
        assert_eq!(decoded.csrf_secret, session.csrf_secret);
    }

    #[test]
    fn test_session_expiry() {
        let mut session = sample_session();
        let now = Utc::now();
        assert!(!session.is_expired(now));

        session.expires_at = now - Duration::seconds(1);
        assert!(session.is_expired(now));
    }

    #[test]
    fn test_flow_state_roundtrip() {
        let state = OidcFlowState {
            state: "S".to_string(),
            provider_id: "azure".to_string(),
            code_verifier: "verifier".to_string(),
            redirect_url: "https://sso.example.com/auth/oidc/azure/callback".to_string(),
            created_at: Utc::now(),
        };

        let encoded = serde_json::to_vec(&state).unwrap();
        let decoded: OidcFlowState = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded.state, state.state);
        assert_eq!(decoded.code_verifier, state.code_verifier);
        assert_eq!(decoded.redirect_url, state.redirect_url);
    }
}
