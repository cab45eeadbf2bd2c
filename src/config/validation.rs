//! Startup configuration validation.
//!
//! Every check here is fatal: the process refuses to start on the first
//! violation, with an error message naming the offending section.

use super::{Config, OidcProviderConfig, SamlProviderConfig};

impl Config {
    /// Validate the whole configuration tree.
    pub fn validate(&self) -> Result<(), String> {
        self.validate_server()
            .map_err(|e| format!("server config: {}", e))?;
        self.validate_backend()
            .map_err(|e| format!("backend config: {}", e))?;
        self.validate_cache()
            .map_err(|e| format!("cache config: {}", e))?;
        self.validate_providers()
            .map_err(|e| format!("providers config: {}", e))?;
        self.validate_logging()
            .map_err(|e| format!("logging config: {}", e))?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("invalid port: 0".to_string());
        }

        if self.server.base_url.is_empty() {
            return Err("base_url is required".to_string());
        }

        if !is_http_url(&self.server.base_url) {
            return Err(format!("invalid base_url: {}", self.server.base_url));
        }

        let same_site = self.server.cookie_same_site.to_lowercase();
        if !matches!(same_site.as_str(), "lax" | "strict" | "none") {
            return Err(format!(
                "invalid cookie_same_site: {} (must be lax, strict, or none)",
                self.server.cookie_same_site
            ));
        }

        if self.server.session_ttl < 60 {
            return Err("session_ttl must be at least 60 seconds".to_string());
        }

        Ok(())
    }

    fn validate_backend(&self) -> Result<(), String> {
        if self.backend.url.is_empty() {
            return Err("url is required".to_string());
        }

        if !is_http_url(&self.backend.url) {
            return Err(format!("invalid url: {}", self.backend.url));
        }

        if self.backend.timeout == 0 {
            return Err("timeout must be greater than zero".to_string());
        }

        Ok(())
    }

    fn validate_cache(&self) -> Result<(), String> {
        match self.cache.kind.as_str() {
            "memory" => Ok(()),
            "redis" => {
                let redis = self
                    .cache
                    .redis
                    .as_ref()
                    .ok_or_else(|| "redis config is required when type is redis".to_string())?;
                if redis.address.is_empty() {
                    return Err("redis address is required".to_string());
                }
                Ok(())
            }
            other => Err(format!("invalid type: {} (must be memory or redis)", other)),
        }
    }

    fn validate_providers(&self) -> Result<(), String> {
        if self.providers.is_empty() {
            return Err("at least one provider is required".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if provider.id.is_empty() {
                return Err("provider id is required".to_string());
            }
            if !seen.insert(provider.id.as_str()) {
                return Err(format!("duplicate provider id: {}", provider.id));
            }
            if provider.name.is_empty() {
                return Err(format!("provider {}: name is required", provider.id));
            }

            match provider.kind.as_str() {
                "oidc" => validate_oidc(&provider.id, provider.oidc.as_ref())?,
                "saml" => validate_saml(&provider.id, provider.saml.as_ref())?,
                other => {
                    return Err(format!(
                        "provider {}: invalid type: {} (must be oidc or saml)",
                        provider.id, other
                    ))
                }
            }

            if provider.header_mappings.is_empty() {
                return Err(format!(
                    "provider {}: at least one header mapping is required",
                    provider.id
                ));
            }
        }

        Ok(())
    }

    fn validate_logging(&self) -> Result<(), String> {
        let level = self.logging.level.to_lowercase();
        if !matches!(level.as_str(), "debug" | "info" | "warn" | "error") {
            return Err(format!(
                "invalid level: {} (must be debug, info, warn, or error)",
                self.logging.level
            ));
        }

        let format = self.logging.format.to_lowercase();
        if !matches!(format.as_str(), "json" | "text") {
            return Err(format!(
                "invalid format: {} (must be json or text)",
                self.logging.format
            ));
        }

        Ok(())
    }
}

fn validate_oidc(provider_id: &str, cfg: Option<&OidcProviderConfig>) -> Result<(), String> {
    let cfg = cfg.ok_or_else(|| format!("provider {}: oidc config is required", provider_id))?;

    if cfg.issuer.is_empty() {
        return Err(format!("provider {}: issuer is required", provider_id));
    }
    if !is_http_url(&cfg.issuer) {
        return Err(format!("provider {}: invalid issuer URL: {}", provider_id, cfg.issuer));
    }
    if cfg.client_id.is_empty() {
        return Err(format!("provider {}: client_id is required", provider_id));
    }
    if cfg.client_secret.is_empty() {
        return Err(format!("provider {}: client_secret is required", provider_id));
    }
    if cfg.scopes.is_empty() {
        return Err(format!("provider {}: at least one scope is required", provider_id));
    }
    if !cfg.scopes.iter().any(|s| s == "openid") {
        return Err(format!("provider {}: 'openid' scope is required", provider_id));
    }

    Ok(())
}

fn validate_saml(provider_id: &str, cfg: Option<&SamlProviderConfig>) -> Result<(), String> {
    let cfg = cfg.ok_or_else(|| format!("provider {}: saml config is required", provider_id))?;

    if cfg.idp_metadata_url.is_none() && cfg.idp_metadata_xml.is_none() {
        return Err(format!(
            "provider {}: either idp_metadata_url or idp_metadata_xml is required",
            provider_id
        ));
    }
    if let Some(url) = &cfg.idp_metadata_url {
        if !is_http_url(url) {
            return Err(format!("provider {}: invalid idp_metadata_url: {}", provider_id, url));
        }
    }
    if cfg.sp_entity_id.is_empty() {
        return Err(format!("provider {}: sp_entity_id is required", provider_id));
    }
    if cfg.acs_url.is_empty() {
        return Err(format!("provider {}: acs_url is required", provider_id));
    }
    if !is_http_url(&cfg.acs_url) {
        return Err(format!("provider {}: invalid acs_url: {}", provider_id, cfg.acs_url));
    }
    if cfg.certificate_path.is_empty() {
        return Err(format!("provider {}: certificate_path is required", provider_id));
    }
    if cfg.private_key_path.is_empty() {
        return Err(format!("provider {}: private_key_path is required", provider_id));
    }

    Ok(())
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use crate::config::Config;

    fn valid_yaml() -> String {
        r#"
server:
  base_url: "https://sso.example.com"
backend:
  url: "http://app:3000"
providers:
  - id: azure
    name: "Azure AD"
    type: oidc
    header_mappings:
      email: X-User-Email
    oidc:
      issuer: "https://login.example.com/tenant/v2.0"
      client_id: app-client
      client_secret: s3cret
      scopes: [openid]
"#
        .to_string()
    }

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_valid_config_passes() {
        parse(&valid_yaml()).validate().unwrap();
    }

    #[test]
    fn test_missing_base_url_rejected() {
        let yaml = valid_yaml().replace("base_url: \"https://sso.example.com\"", "host: 0.0.0.0");
        let err = parse(&yaml).validate().unwrap_err();
        assert!(err.contains("base_url"), "unexpected error: {}", err);
    }

    #[test]
    fn test_openid_scope_required() {
        let yaml = valid_yaml().replace("scopes: [openid]", "scopes: [email]");
        let err = parse(&yaml).validate().unwrap_err();
        assert!(err.contains("'openid' scope"), "unexpected error: {}", err);
    }

    #[test]
    fn test_duplicate_provider_ids_rejected() {
        let mut yaml = valid_yaml();
        let dup = r#"
  - id: azure
    name: "Azure Again"
    type: oidc
    header_mappings:
      email: X-User-Email
    oidc:
      issuer: "https://other.example.com"
      client_id: x
      client_secret: y
      scopes: [openid]
"#;
        yaml.push_str(dup);
        let err = parse(&yaml).validate().unwrap_err();
        assert!(err.contains("duplicate provider id"), "unexpected error: {}", err);
    }

    #[test]
    fn test_bad_same_site_rejected() {
        let yaml = valid_yaml().replace(
            "base_url: \"https://sso.example.com\"",
            "base_url: \"https://sso.example.com\"\n  cookie_same_site: sideways",
        );
        let err = parse(&yaml).validate().unwrap_err();
        assert!(err.contains("cookie_same_site"), "unexpected error: {}", err);
    }

    #[test]
    fn test_saml_requires_metadata_source() {
        let yaml = r#"
server:
  base_url: "https://sso.example.com"
backend:
  url: "http://app:3000"
providers:
  - id: okta
    name: Okta
    type: saml
    header_mappings:
      name_id: X-User-Id
    saml:
      sp_entity_id: "https://sso.example.com/metadata"
      acs_url: "https://sso.example.com/auth/saml/okta/acs"
      certificate_path: /etc/sso/sp.crt
      private_key_path: /etc/sso/sp.key
"#;
        let err = parse(yaml).validate().unwrap_err();
        assert!(err.contains("idp_metadata"), "unexpected error: {}", err);
    }

    #[test]
    fn test_redis_type_requires_address() {
        let yaml = valid_yaml().replace(
            "backend:",
            "cache:\n  type: redis\nbackend:",
        );
        let err = parse(&yaml).validate().unwrap_err();
        assert!(err.contains("redis"), "unexpected error: {}", err);
    }

    #[test]
    fn test_header_mappings_required() {
        let yaml = valid_yaml().replace("    header_mappings:\n      email: X-User-Email\n", "");
        let err = parse(&yaml).validate().unwrap_err();
        assert!(err.contains("header mapping"), "unexpected error: {}", err);
    }
}
