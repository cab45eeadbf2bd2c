//! SAML 2.0 provider.
//!
//! Web-SSO profile: HTTP-Redirect binding for the AuthnRequest, HTTP-POST
//! for the assertion. IdP-initiated responses are accepted.

pub mod provider;

pub use provider::SamlProvider;
