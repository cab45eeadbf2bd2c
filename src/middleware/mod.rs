//! Request middleware: session resolution, CSRF, request logging, and the
//! fixed security response headers.

pub mod auth;
pub mod csrf;
pub mod logging;
pub mod security_headers;

pub use auth::require_auth;
pub use csrf::{CsrfError, CsrfService};
pub use logging::log_requests;
pub use security_headers::security_headers;
