//! Identity header injection.
//!
//! Projects provider-specific claims into the stable header contract the
//! backend consumes. Inbound headers colliding with mapped names are always
//! stripped first, so clients cannot smuggle identity values past the proxy.

use axum::http::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

use crate::auth::{Provider, Session};

const PROVIDER_HEADER: &str = "x-auth-provider";
const PROVIDER_TYPE_HEADER: &str = "x-auth-provider-type";
const SESSION_ID_HEADER: &str = "x-auth-session-id";

/// Rewrite `headers` in place: mapped claims first, then the three fixed
/// informational headers. Deterministic for a given session and mapping.
pub fn inject_identity_headers(
    headers: &mut HeaderMap,
    session: &Session,
    provider: &dyn Provider,
) {
    for (claim, header_name) in provider.header_mappings() {
        let name = match HeaderName::from_bytes(header_name.as_bytes()) {
            Ok(name) => name,
            Err(_) => {
                warn!(header = %header_name, "skipping unrepresentable header mapping");
                continue;
            }
        };

        // Drop whatever the client sent under this name, claim or no claim.
        headers.remove(&name);

        let Some(value) = session.user_info.get(claim) else {
            continue;
        };
        let rendered = value.to_header_value();
        if rendered.is_empty() {
            continue;
        }

        match HeaderValue::from_str(&rendered) {
            Ok(value) => {
                headers.insert(name, value);
            }
            Err(_) => {
                warn!(claim = %claim, "claim value is not a valid header value");
            }
        }
    }

    set_static(headers, PROVIDER_HEADER, &session.provider_id);
    set_static(headers, PROVIDER_TYPE_HEADER, &session.provider_kind.to_string());
    set_static(headers, SESSION_ID_HEADER, &session.id.to_hex());
}

fn set_static(headers: &mut HeaderMap, name: &'static str, value: &str) {
    let name = HeaderName::from_static(name);
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => {
            warn!(header = %name, "value is not a valid header value");
        }
    }
}
