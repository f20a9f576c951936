//! HTTP side of the session core.
//!
//! This module provides:
//! - `HttpTransport`: the generic request/response seam, with a `reqwest` implementation
//! - `AuthApi`: typed calls to the `login/`, `refresh/` and `logout/` endpoints
//! - `AuthorizedClient`: bearer token injection with one refresh-and-retry on 401

pub mod authorized;
pub mod client;
pub mod error;
pub mod transport;

pub use authorized::AuthorizedClient;
pub use client::{AuthApi, RefreshedTokens};
pub use error::{AuthError, TransportError};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
