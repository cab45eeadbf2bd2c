//! HTTP handlers for the authentication flows and operational endpoints.

pub mod callback;
pub mod health;
pub mod logout;
pub mod select;
