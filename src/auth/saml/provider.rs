//! SAML 2.0 service-provider implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use samael::metadata::EntityDescriptor;
use samael::schema::{Assertion, Response};
use samael::service_provider::{ServiceProvider, ServiceProviderBuilder};
use tracing::{debug, warn};

use crate::auth::{
    AuthRedirect, CallbackParams, ClaimValue, Provider, ProviderKind, RedirectMethod,
    SamlFlowState, Session, SessionId, FLOW_STATE_TTL, SAML_REQUEST_KEY_PREFIX,
};
use crate::cache::{Cache, CacheError};
use crate::config::ProviderConfig;
use crate::error::AuthError;
use crate::security;

const HTTP_REDIRECT_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
const HTTP_POST_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";

/// Session lifetime when the assertion carries no NotOnOrAfter condition.
const DEFAULT_SESSION_LIFETIME_HOURS: i64 = 24;

pub struct SamlProvider {
    id: String,
    name: String,
    header_mappings: HashMap<String, String>,
    cache: Arc<dyn Cache>,
    sp: ServiceProvider,
    sp_entity_id: String,
    acs_url: String,
    /// SP certificate as base64 DER, embedded in the metadata document.
    certificate_b64: Option<String>,
    signing_key: Option<PKey<Private>>,
    sign_requests: bool,
}

impl SamlProvider {
    /// Load SP credentials, fetch the IdP metadata, and build the service
    /// provider. Any failure here is fatal to startup.
    pub async fn bootstrap(
        provider_cfg: &ProviderConfig,
        cache: Arc<dyn Cache>,
        base_url: &str,
    ) -> anyhow::Result<Self> {
        let saml_cfg = provider_cfg
            .saml
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SAML config is required"))?;

        let cert_pem = std::fs::read(&saml_cfg.certificate_path).map_err(|e| {
            anyhow::anyhow!("failed to read certificate {}: {}", saml_cfg.certificate_path, e)
        })?;
        let certificate = X509::from_pem(&cert_pem)
            .map_err(|e| anyhow::anyhow!("failed to parse SP certificate: {}", e))?;
        let certificate_b64 = certificate.to_der().ok().map(|der| BASE64.encode(der));

        let key_pem = std::fs::read(&saml_cfg.private_key_path).map_err(|e| {
            anyhow::anyhow!("failed to read private key {}: {}", saml_cfg.private_key_path, e)
        })?;
        // PEM autodetects PKCS#1 ("RSA PRIVATE KEY") and PKCS#8.
        let signing_key = PKey::private_key_from_pem(&key_pem)
            .map_err(|e| anyhow::anyhow!("failed to parse SP private key: {}", e))?;

        let idp_metadata = fetch_idp_metadata(saml_cfg).await?;
        let sign_requests = wants_signed_requests(&idp_metadata);

        let metadata_url = format!(
            "{}/auth/saml/{}/metadata",
            base_url.trim_end_matches('/'),
            provider_cfg.id
        );

        let sp = ServiceProviderBuilder::default()
            .entity_id(saml_cfg.sp_entity_id.clone())
            .key(signing_key.clone())
            .certificate(certificate)
            .metadata_url(metadata_url)
            .acs_url(saml_cfg.acs_url.clone())
            .idp_metadata(idp_metadata)
            .allow_idp_initiated(true)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build SAML service provider: {}", e))?;

        Ok(Self {
            id: provider_cfg.id.clone(),
            name: provider_cfg.name.clone(),
            header_mappings: provider_cfg.header_mappings.clone(),
            cache,
            sp,
            sp_entity_id: saml_cfg.sp_entity_id.clone(),
            acs_url: saml_cfg.acs_url.clone(),
            certificate_b64,
            signing_key: Some(signing_key),
            sign_requests,
        })
    }

    /// The IdP's SSO endpoint, from its metadata. Redirect binding is
    /// preferred; POST is the fallback.
    fn sso_endpoint(&self) -> Result<SsoEndpoint, AuthError> {
        sso_endpoint(&self.sp.idp_metadata)
            .ok_or_else(|| AuthError::Internal("IdP metadata has no SSO endpoint".to_string()))
    }

    /// The SP EntityDescriptor, for IdP-side configuration: entity id,
    /// signing certificate, and the POST-binding ACS endpoint.
    pub fn metadata_xml(&self) -> Result<String, AuthError> {
        let mut xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}">
  <md:SPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">"#,
            self.sp_entity_id
        );

        if let Some(cert) = &self.certificate_b64 {
            xml.push_str(&format!(
                r#"
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data>
          <ds:X509Certificate>{}</ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>"#,
                cert
            ));
        }

        xml.push_str(&format!(
            r#"
    <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="{}" index="0"/>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
            self.acs_url
        ));

        Ok(xml)
    }

    /// Consume the flow state referenced by the response, if any.
    /// IdP-initiated responses carry no InResponseTo and skip this.
    async fn consume_flow_state(
        &self,
        in_response_to: Option<&str>,
    ) -> Result<(), AuthError> {
        let Some(request_id) = in_response_to else {
            return Ok(());
        };

        let key = format!("{}{}", SAML_REQUEST_KEY_PREFIX, request_id);
        let blob = match self.cache.get(&key).await {
            Ok(blob) => blob,
            Err(CacheError::NotFound) => return Err(AuthError::InvalidState),
            Err(e) => return Err(e.into()),
        };

        let flow: SamlFlowState = serde_json::from_slice(&blob)
            .map_err(|e| AuthError::Internal(format!("corrupt flow state: {}", e)))?;

        if flow.provider_id != self.id {
            return Err(AuthError::ProviderMismatch);
        }

        if let Err(e) = self.cache.delete(&key).await {
            warn!(error = %e, "failed to delete consumed SAML request state");
        }

        Ok(())
    }
}

#[async_trait]
impl Provider for SamlProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Saml
    }

    fn header_mappings(&self) -> &HashMap<String, String> {
        &self.header_mappings
    }

    async fn initiate_auth(&self, redirect_url: &str) -> Result<AuthRedirect, AuthError> {
        let endpoint = self.sso_endpoint()?;
        let sso_url = endpoint.location().to_string();

        let authn_request = self
            .sp
            .make_authentication_request(&sso_url)
            .map_err(|e| AuthError::Internal(format!("failed to create AuthnRequest: {}", e)))?;
        let request_id = authn_request.id.clone();

        let (url, method, form_data) = match endpoint {
            SsoEndpoint::Redirect(_) => {
                let url = if self.sign_requests {
                    let key = self.signing_key.clone().ok_or_else(|| {
                        AuthError::Internal(
                            "IdP requires signed requests but no SP key is loaded".to_string(),
                        )
                    })?;
                    authn_request.signed_redirect("", key).map_err(|e| {
                        AuthError::Internal(format!("failed to sign AuthnRequest: {}", e))
                    })?
                } else {
                    authn_request.redirect("").map_err(|e| {
                        AuthError::Internal(format!("failed to encode AuthnRequest: {}", e))
                    })?
                }
                .ok_or_else(|| {
                    AuthError::Internal("AuthnRequest has no destination".to_string())
                })?;
                (url.to_string(), RedirectMethod::Get, HashMap::new())
            }
            SsoEndpoint::Post(location) => {
                // POST binding carries the request base64'd in a form field
                // instead of deflated in the query string.
                let xml = {
                    use samael::traits::ToXml;
                    authn_request.to_string().map_err(|e| {
                        AuthError::Internal(format!("failed to serialize AuthnRequest: {}", e))
                    })?
                };
                let form_data =
                    HashMap::from([("SAMLRequest".to_string(), BASE64.encode(xml))]);
                (location, RedirectMethod::Post, form_data)
            }
        };

        let flow = SamlFlowState {
            id: request_id.clone(),
            provider_id: self.id.clone(),
            relay_state: redirect_url.to_string(),
            created_at: Utc::now(),
        };
        let cache_data = serde_json::to_vec(&flow)
            .map_err(|e| AuthError::Internal(format!("failed to serialize flow state: {}", e)))?;

        debug!(provider = %self.id, request_id = %request_id, "SAML flow initiated");

        Ok(AuthRedirect {
            url,
            method,
            form_data,
            cache_key: format!("{}{}", SAML_REQUEST_KEY_PREFIX, request_id),
            cache_data,
            cache_ttl: FLOW_STATE_TTL,
        })
    }

    async fn handle_callback(&self, params: &CallbackParams) -> Result<Session, AuthError> {
        let saml_response = params
            .form_param("SAMLResponse")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AuthError::BadRequest("missing SAMLResponse".to_string()))?;

        // Peek at the schema first: the InResponseTo id selects which flow
        // state to consume, and consumption must precede full validation so
        // a replayed response finds nothing.
        let decoded = BASE64
            .decode(saml_response)
            .map_err(|e| AuthError::BadRequest(format!("invalid SAMLResponse encoding: {}", e)))?;
        let response_xml = String::from_utf8(decoded)
            .map_err(|_| AuthError::BadRequest("SAMLResponse is not valid UTF-8".to_string()))?;
        let peek: Response = response_xml
            .parse()
            .map_err(|e| AuthError::BadRequest(format!("failed to parse SAML response: {}", e)))?;

        self.consume_flow_state(peek.in_response_to.as_deref()).await?;

        // Full validation: signature, destination, audience, time window.
        let request_ids: Vec<&str> = peek.in_response_to.as_deref().into_iter().collect();
        let assertion = self
            .sp
            .parse_base64_response(saml_response, Some(&request_ids))
            .map_err(|e| AuthError::VerificationFailed(e.to_string()))?;

        let claims = extract_claims(&assertion);

        let raw_assertion = {
            use samael::traits::ToXml;
            assertion.to_string().unwrap_or_default()
        };

        let now = Utc::now();
        let expires_at = assertion
            .conditions
            .as_ref()
            .and_then(|c| c.not_on_or_after)
            .unwrap_or_else(|| now + chrono::Duration::hours(DEFAULT_SESSION_LIFETIME_HOURS));

        debug!(
            provider = %self.id,
            attributes = claims.len(),
            "SAML assertion accepted"
        );

        Ok(Session {
            id: SessionId::new(),
            provider_id: self.id.clone(),
            provider_kind: ProviderKind::Saml,
            user_info: claims,
            created_at: now,
            expires_at,
            access_token: String::new(),
            refresh_token: String::new(),
            id_token: String::new(),
            token_expiry: None,
            assertion: raw_assertion,
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

    async fn refresh_session(&self, _session: &mut Session) -> Result<(), AuthError> {
        Err(AuthError::RefreshUnsupported)
    }

    fn sp_metadata(&self) -> Result<Option<String>, AuthError> {
        self.metadata_xml().map(Some)
    }
}

/// Fetch the IdP EntityDescriptor from the configured URL or inline XML.
async fn fetch_idp_metadata(
    cfg: &crate::config::SamlProviderConfig,
) -> anyhow::Result<EntityDescriptor> {
    if let Some(xml) = &cfg.idp_metadata_xml {
        return samael::metadata::de::from_str(xml)
            .map_err(|e| anyhow::anyhow!("failed to parse inline IdP metadata: {}", e));
    }

    let url = cfg
        .idp_metadata_url
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("either idp_metadata_url or idp_metadata_xml must be provided"))?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("failed to fetch IdP metadata from {}: {}", url, e))?;

    if response.status() != reqwest::StatusCode::OK {
        anyhow::bail!("IdP metadata request to {} returned status {}", url, response.status());
    }

    let body = response.text().await?;
    samael::metadata::de::from_str(&body)
        .map_err(|e| anyhow::anyhow!("failed to parse IdP metadata from {}: {}", url, e))
}

/// Whether the IdP metadata demands signed AuthnRequests.
fn wants_signed_requests(metadata: &EntityDescriptor) -> bool {
    metadata
        .idp_sso_descriptors
        .as_ref()
        .and_then(|descriptors| descriptors.first())
        .and_then(|descriptor| descriptor.want_authn_requests_signed)
        .unwrap_or(false)
}

/// An SSO endpoint selected from IdP metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SsoEndpoint {
    Redirect(String),
    Post(String),
}

impl SsoEndpoint {
    fn location(&self) -> &str {
        match self {
            SsoEndpoint::Redirect(location) | SsoEndpoint::Post(location) => location,
        }
    }
}

/// Pick the IdP's SSO endpoint: HTTP-Redirect when offered, HTTP-POST
/// otherwise.
fn sso_endpoint(metadata: &EntityDescriptor) -> Option<SsoEndpoint> {
    let descriptor = metadata.idp_sso_descriptors.as_ref()?.first()?;
    let services = &descriptor.single_sign_on_services;

    if let Some(endpoint) = services.iter().find(|e| e.binding == HTTP_REDIRECT_BINDING) {
        return Some(SsoEndpoint::Redirect(endpoint.location.clone()));
    }
    services
        .iter()
        .find(|e| e.binding == HTTP_POST_BINDING)
        .map(|e| SsoEndpoint::Post(e.location.clone()))
}

/// Project the assertion into the session claim map: NameID under
/// `name_id`/`name_id_format`, single-valued attributes as strings,
/// multi-valued ones as lists. Attribute names are kept verbatim, URNs
/// included.
fn extract_claims(assertion: &Assertion) -> HashMap<String, ClaimValue> {
    let mut claims = HashMap::new();

    if let Some(name_id) = assertion.subject.as_ref().and_then(|s| s.name_id.as_ref()) {
        claims.insert(
            "name_id".to_string(),
            ClaimValue::String(name_id.value.clone()),
        );
        if let Some(format) = &name_id.format {
            claims.insert(
                "name_id_format".to_string(),
                ClaimValue::String(format.clone()),
            );
        }
    }

    for statement in assertion.attribute_statements.as_deref().unwrap_or_default() {
        for attribute in &statement.attributes {
            let Some(name) = attribute.name.clone() else {
                continue;
            };
            let mut values: Vec<String> = attribute
                .values
                .iter()
                .filter_map(|v| v.value.clone())
                .collect();

            match values.len() {
                0 => {}
                1 => {
                    claims.insert(name, ClaimValue::String(values.remove(0)));
                }
                _ => {
                    claims.insert(name, ClaimValue::List(values));
                }
            }
        }
    }

    claims
}
