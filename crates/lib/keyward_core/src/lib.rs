//! # keyward_core
//!
//! Authentication and session management for Keyward.
//!
//! Password and third-party (OAuth2 + PKCE) login, signed access tokens,
//! device-bound refresh sessions, and the single-use token stores that back
//! email verification, password reset, OAuth state and the one-time-code
//! handoff to native clients.

pub mod auth;
pub mod config;
pub mod migrate;
pub mod oauth;
pub mod refresh;
pub mod secrets;
pub mod store;
pub mod users;

pub use auth::{AuthError, AuthResult};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
