//! autoflow-core - client-side session management for the autoflow API.
//!
//! Keeps a short-lived access token valid for the lifetime of the client:
//! tokens are persisted, refreshed shortly before they expire, and refreshed
//! on demand when the server rejects one. Concurrent refresh demands are
//! collapsed into a single call.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;

#[cfg(test)]
pub(crate) mod test_utils;

pub use api::{AuthError, AuthorizedClient, HttpRequest, HttpResponse};
pub use auth::{Session, SessionManager, SessionState, UserInfo};
pub use config::Config;
