//! Session cookie construction.

use axum_extra::extract::cookie::{Cookie, SameSite};

use crate::config::ServerConfig;

/// Build the session cookie carrying `session_id`, valid for `max_age`.
pub fn session_cookie(
    cfg: &ServerConfig,
    session_id: String,
    max_age: time::Duration,
) -> Cookie<'static> {
    let same_site = match cfg.cookie_same_site.to_lowercase().as_str() {
        "strict" => SameSite::Strict,
        "none" => SameSite::None,
        _ => SameSite::Lax,
    };

    let mut cookie = Cookie::new(cfg.cookie_name.clone(), session_id);
    cookie.set_path("/");
    cookie.set_max_age(max_age);
    cookie.set_secure(cfg.cookie_secure);
    cookie.set_http_only(cfg.cookie_http_only);
    cookie.set_same_site(same_site);
    if !cfg.cookie_domain.is_empty() {
        cookie.set_domain(cfg.cookie_domain.clone());
    }
    cookie
}

/// Build an expired session cookie so the user-agent discards the session.
pub fn clear_session_cookie(cfg: &ServerConfig) -> Cookie<'static> {
    session_cookie(cfg, String::new(), time::Duration::seconds(-1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn server_config() -> ServerConfig {
        ServerConfig {
            cookie_name: "sso-session".to_string(),
            cookie_domain: "example.com".to_string(),
            cookie_secure: true,
            cookie_http_only: true,
            cookie_same_site: "strict".to_string(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie(
            &server_config(),
            "abc123".to_string(),
            time::Duration::hours(24),
        );

        assert_eq!(cookie.name(), "sso-session");
        assert_eq!(cookie.value(), "abc123");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.domain(), Some("example.com"));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.max_age(), Some(time::Duration::hours(24)));
    }

    #[test]
    fn test_same_site_defaults_to_lax() {
        let mut cfg = server_config();
        cfg.cookie_same_site = "lax".to_string();
        let cookie = session_cookie(&cfg, "v".to_string(), time::Duration::hours(1));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
    }

    #[test]
    fn test_clear_cookie_expires_immediately() {
        let cookie = clear_session_cookie(&server_config());

        assert_eq!(cookie.value(), "");
        assert!(cookie.max_age().unwrap().is_negative());
    }
}
