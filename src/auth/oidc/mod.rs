//! OpenID Connect provider.
//!
//! Authorization Code flow with PKCE: discovery at startup, ID-token
//! verification against a cached JWKS, transparent refresh-grant support.

pub mod discovery;
pub mod jwks;
pub mod provider;

pub use discovery::DiscoveryDocument;
pub use jwks::JwksCache;
pub use provider::OidcProvider;
