//! OIDC discovery document fetching.

use anyhow::{anyhow, Context};
use serde::Deserialize;

/// The subset of the OIDC discovery document this proxy consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
}

/// Fetch `<issuer>/.well-known/openid-configuration` and check that the
/// document's `issuer` matches the configured one.
pub async fn discover(
    http: &reqwest::Client,
    issuer: &str,
) -> anyhow::Result<DiscoveryDocument> {
    let url = format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    );

    let response = http
        .get(&url)
        .send()
        .await
        .with_context(|| format!("failed to fetch OIDC discovery document from {}", url))?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "discovery request to {} returned status {}",
            url,
            response.status()
        ));
    }

    let doc: DiscoveryDocument = response
        .json()
        .await
        .context("failed to parse OIDC discovery document")?;

    if doc.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
        return Err(anyhow!(
            "discovery document issuer {} does not match configured issuer {}",
            doc.issuer,
            issuer
        ));
    }

    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_parsing() {
        let doc: DiscoveryDocument = serde_json::from_str(
            r#"{
                "issuer": "https://login.example.com/tenant/v2.0",
                "authorization_endpoint": "https://login.example.com/tenant/oauth2/v2.0/authorize",
                "token_endpoint": "https://login.example.com/tenant/oauth2/v2.0/token",
                "jwks_uri": "https://login.example.com/tenant/discovery/v2.0/keys",
                "response_types_supported": ["code"]
            }"#,
        )
        .unwrap();

        assert_eq!(doc.issuer, "https://login.example.com/tenant/v2.0");
        assert!(doc.token_endpoint.ends_with("/token"));
        assert!(doc.jwks_uri.ends_with("/keys"));
    }
}
