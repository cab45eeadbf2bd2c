//! Provider-selection page and flow initiation.

use std::collections::HashMap;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Form;
use tracing::error;

use crate::auth::{Provider, ProviderKind, RedirectMethod};
use crate::middleware::csrf;
use crate::middleware::CsrfError;
use crate::server::{redirect_found, AppState};

/// GET /auth/select — render the selection page, or skip it entirely when a
/// single provider is configured and the UI is disabled.
pub async fn select_page(State(state): State<AppState>) -> Response {
    if state.providers.len() == 1 && !state.cfg.ui.enable {
        let provider = state.providers.values().next().expect("len checked");
        return start_auth_flow(&state, provider.as_ref()).await;
    }

    let csrf_token = match state.csrf.generate().await {
        Ok(token) => token,
        Err(e) => {
            error!(error = %e, "failed to generate CSRF token");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    Html(render_select_page(&state, &csrf_token)).into_response()
}

/// POST /auth/select — CSRF-validated provider pick.
pub async fn select_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    if let Some(response) = reject_bad_csrf(&state, &form, &headers).await {
        return response;
    }

    let Some(provider_id) = form.get("provider").filter(|p| !p.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Provider is required").into_response();
    };
    let Some(provider) = state.providers.get(provider_id) else {
        return (StatusCode::BAD_REQUEST, "Invalid provider").into_response();
    };

    start_auth_flow(&state, provider.as_ref()).await
}

/// GET /auth/select/logo — the configured logo file, when present.
pub async fn serve_logo(State(state): State<AppState>) -> Response {
    if state.cfg.ui.logo_path.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }

    match tokio::fs::read(&state.cfg.ui.logo_path).await {
        Ok(bytes) => {
            let content_type = match state.cfg.ui.logo_path.rsplit('.').next() {
                Some("svg") => "image/svg+xml",
                Some("jpg") | Some("jpeg") => "image/jpeg",
                _ => "image/png",
            };
            ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
        }
        Err(e) => {
            error!(error = %e, path = %state.cfg.ui.logo_path, "failed to read logo");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Validate the CSRF token on a state-changing request; `None` means pass.
pub async fn reject_bad_csrf(
    state: &AppState,
    form: &HashMap<String, String>,
    headers: &HeaderMap,
) -> Option<Response> {
    match state
        .csrf
        .validate(csrf::token_from_request(form, headers))
        .await
    {
        Ok(()) => None,
        Err(CsrfError::Missing) => {
            Some((StatusCode::FORBIDDEN, "Missing CSRF token").into_response())
        }
        Err(CsrfError::Invalid) => {
            Some((StatusCode::FORBIDDEN, "Invalid or expired CSRF token").into_response())
        }
        Err(CsrfError::Backend(e)) => {
            error!(error = %e, "CSRF validation failed");
            Some(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

/// Kick off a provider's flow: persist the transient state, then send the
/// user-agent to the IdP.
pub async fn start_auth_flow(state: &AppState, provider: &dyn Provider) -> Response {
    let redirect_url = callback_url(&state.cfg.server.base_url, provider);

    let auth_redirect = match provider.initiate_auth(&redirect_url).await {
        Ok(redirect) => redirect,
        Err(e) => {
            error!(provider = %provider.id(), error = %e, "failed to initiate auth");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to initiate authentication",
            )
                .into_response();
        }
    };

    // The flow state must be durable before the user-agent leaves, or the
    // callback will find nothing to consume.
    if let Err(e) = state
        .cache
        .set(
            &auth_redirect.cache_key,
            &auth_redirect.cache_data,
            auth_redirect.cache_ttl,
        )
        .await
    {
        error!(error = %e, "failed to cache auth state");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    match auth_redirect.method {
        RedirectMethod::Get => redirect_found(&auth_redirect.url),
        RedirectMethod::Post => {
            Html(render_post_redirect(&auth_redirect.url, &auth_redirect.form_data))
                .into_response()
        }
    }
}

/// The callback URL registered with the IdP for this provider.
fn callback_url(base_url: &str, provider: &dyn Provider) -> String {
    let base = base_url.trim_end_matches('/');
    match provider.kind() {
        ProviderKind::Oidc => format!("{}/auth/oidc/{}/callback", base, provider.id()),
        ProviderKind::Saml => format!("{}/auth/saml/{}/acs", base, provider.id()),
    }
}

fn render_select_page(state: &AppState, csrf_token: &str) -> String {
    let ui = &state.cfg.ui;

    let mut providers: Vec<_> = state.providers.values().collect();
    providers.sort_by(|a, b| a.name().cmp(b.name()));

    let mut buttons = String::new();
    for provider in providers {
        buttons.push_str(&format!(
            r#"      <button type="submit" name="provider" value="{id}">{name} <span class="kind">{kind}</span></button>
"#,
            id = escape_html(provider.id()),
            name = escape_html(provider.name()),
            kind = provider.kind(),
        ));
    }

    let logo = if ui.logo_path.is_empty() {
        String::new()
    } else {
        r#"    <img class="logo" src="/auth/select/logo" alt="">
"#
        .to_string()
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{title}</title>
  <style>
    body {{ margin: 0; font-family: system-ui, sans-serif; min-height: 100vh;
           display: flex; align-items: center; justify-content: center;
           background: linear-gradient(135deg, {gradient_start}, {gradient_end}); }}
    .card {{ background: #fff; border-radius: 12px; padding: 2.5rem; width: 20rem;
            box-shadow: 0 10px 30px rgba(0,0,0,.2); text-align: center; }}
    .logo {{ max-width: 8rem; margin-bottom: 1rem; }}
    h1 {{ font-size: 1.25rem; margin: 0 0 1.5rem; }}
    button {{ display: block; width: 100%; margin-bottom: .75rem; padding: .75rem;
             border: 1px solid #ddd; border-radius: 8px; background: #fafafa;
             font-size: 1rem; cursor: pointer; }}
    button:hover {{ background: #f0f0f0; }}
    .kind {{ color: #888; font-size: .8rem; text-transform: uppercase; }}
  </style>
</head>
<body>
  <div class="card">
{logo}    <h1>{title}</h1>
    <form method="post" action="/auth/select">
      <input type="hidden" name="csrf_token" value="{csrf_token}">
{buttons}    </form>
  </div>
</body>
</html>
"#,
        title = escape_html(&ui.title),
        gradient_start = escape_html(&ui.gradient_start),
        gradient_end = escape_html(&ui.gradient_end),
        csrf_token = escape_html(csrf_token),
        logo = logo,
        buttons = buttons,
    )
}

/// Auto-submitting form for POST-binding redirects.
fn render_post_redirect(url: &str, form_data: &HashMap<String, String>) -> String {
    let mut fields = String::new();
    for (name, value) in form_data {
        fields.push_str(&format!(
            r#"    <input type="hidden" name="{}" value="{}">
"#,
            escape_html(name),
            escape_html(value),
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<body onload="document.forms[0].submit()">
  <form method="post" action="{}">
{}    <noscript><button type="submit">Continue</button></noscript>
  </form>
</body>
</html>
"#,
        escape_html(url),
        fields,
    )
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escaping() {
        assert_eq!(
            escape_html(r#"<b>"x" & 'y'</b>"#),
            "&lt;b&gt;&quot;x&quot; &amp; &#39;y&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_post_redirect_embeds_fields() {
        let mut form = HashMap::new();
        form.insert("SAMLRequest".to_string(), "PHNhbWw+".to_string());

        let html = render_post_redirect("https://idp.example.com/sso", &form);
        assert!(html.contains(r#"action="https://idp.example.com/sso""#));
        assert!(html.contains(r#"name="SAMLRequest" value="PHNhbWw+""#));
    }
}
