//! Reverse-proxy stage.
//!
//! Receives requests that already carry a validated session, injects the
//! identity headers, and forwards to the single configured backend,
//! streaming bodies in both directions.

pub mod headers;

use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{HeaderMap, HeaderName, HOST};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use crate::auth::{Provider, Session};
use crate::config::BackendConfig;

pub use headers::inject_identity_headers;

/// Headers that are connection-scoped and must not be forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub struct ReverseProxy {
    backend: reqwest::Url,
    preserve_host: bool,
    client: reqwest::Client,
}

impl ReverseProxy {
    pub fn new(cfg: &BackendConfig) -> anyhow::Result<Self> {
        let backend = reqwest::Url::parse(&cfg.url)
            .map_err(|e| anyhow::anyhow!("invalid backend url {}: {}", cfg.url, e))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout))
            .connect_timeout(Duration::from_secs(5))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to create backend client: {}", e))?;

        Ok(Self {
            backend,
            preserve_host: cfg.preserve_host,
            client,
        })
    }

    /// Forward one authenticated request and stream the backend's response
    /// back unchanged.
    pub async fn forward(
        &self,
        session: &Session,
        provider: &dyn Provider,
        req: Request,
    ) -> Response {
        let method = req.method().clone();
        let target = self.target_url(req.uri().path(), req.uri().query());

        let mut headers = req.headers().clone();
        strip_hop_by_hop(&mut headers);
        inject_identity_headers(&mut headers, session, provider);

        // The upstream Host comes from the backend URL unless preserve_host
        // forwards the client-facing name. X-Forwarded-Host is trusted per
        // the front-proxy deployment contract.
        let host_override = if self.preserve_host {
            headers
                .get("x-forwarded-host")
                .cloned()
                .or_else(|| headers.get(HOST).cloned())
        } else {
            None
        };
        headers.remove(HOST);
        if let Some(host) = host_override {
            headers.insert(HOST, host);
        }

        debug!(
            method = %method,
            target = %target,
            session_id = %session.id,
            "proxying request"
        );

        let body = reqwest::Body::wrap_stream(req.into_body().into_data_stream());
        let result = self
            .client
            .request(method, target)
            .headers(headers)
            .body(body)
            .send()
            .await;

        match result {
            Ok(upstream) => {
                let status = upstream.status();
                let mut response_headers = upstream.headers().clone();
                strip_hop_by_hop(&mut response_headers);

                let mut response =
                    Response::new(Body::from_stream(upstream.bytes_stream()));
                *response.status_mut() = status;
                *response.headers_mut() = response_headers;
                response
            }
            Err(e) => {
                error!(error = %e, backend = %self.backend, "backend request failed");
                (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
            }
        }
    }

    /// Backend scheme and host with the inbound path and query preserved.
    fn target_url(&self, path: &str, query: Option<&str>) -> reqwest::Url {
        let mut target = self.backend.clone();

        let base_path = target.path().trim_end_matches('/');
        if base_path.is_empty() {
            target.set_path(path);
        } else {
            target.set_path(&format!("{}{}", base_path, path));
        }
        target.set_query(query);
        target
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(HeaderName::from_static(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;

    fn proxy(url: &str, preserve_host: bool) -> ReverseProxy {
        ReverseProxy::new(&BackendConfig {
            url: url.to_string(),
            timeout: 30,
            preserve_host,
        })
        .unwrap()
    }

    #[test]
    fn test_target_preserves_path_and_query() {
        let proxy = proxy("http://app:3000", false);

        let url = proxy.target_url("/dashboard", Some("tab=alerts"));
        assert_eq!(url.as_str(), "http://app:3000/dashboard?tab=alerts");

        let url = proxy.target_url("/", None);
        assert_eq!(url.as_str(), "http://app:3000/");
    }

    #[test]
    fn test_target_joins_backend_base_path() {
        let proxy = proxy("http://app:3000/api/", false);

        let url = proxy.target_url("/dashboard", None);
        assert_eq!(url.as_str(), "http://app:3000/api/dashboard");
    }

    #[test]
    fn test_hop_by_hop_headers_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "keep-alive".parse().unwrap());
        headers.insert("transfer-encoding", "chunked".parse().unwrap());
        headers.insert("x-request-id", "abc".parse().unwrap());

        strip_hop_by_hop(&mut headers);

        assert!(headers.get("connection").is_none());
        assert!(headers.get("transfer-encoding").is_none());
        assert_eq!(headers.get("x-request-id").unwrap(), "abc");
    }

    #[test]
    fn test_invalid_backend_url_rejected() {
        assert!(ReverseProxy::new(&BackendConfig {
            url: "not a url".to_string(),
            timeout: 30,
            preserve_host: false,
        })
        .is_err());
    }
}
