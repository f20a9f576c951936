use serde::Deserialize;
use thiserror::Error;

/// Errors surfaced by the session core to its collaborators.
///
/// `Clone` so that a single refresh outcome can be handed to every caller
/// waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error("Token storage error: {0}")]
    Storage(String),

    #[error("Unexpected response (status {status}): {body}")]
    UnexpectedResponse { status: u16, body: String },
}

/// Transport-level failures: the request never produced an HTTP status.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<TransportError> for AuthError {
    fn from(err: TransportError) -> Self {
        AuthError::NetworkError(err.to_string())
    }
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Fallback message when a rejected login carries no readable reason
const DEFAULT_LOGIN_FAILURE: &str = "Login failed";

#[derive(Debug, Deserialize)]
struct ServerMessage {
    message: Option<String>,
    detail: Option<String>,
}

impl AuthError {
    /// Truncate a response body to avoid logging excessive data
    pub(crate) fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    /// Pull the human-readable reason out of an auth endpoint error body.
    /// Servers answer with either `{"message": ...}` or `{"detail": ...}`.
    fn server_message(body: &str) -> String {
        serde_json::from_str::<ServerMessage>(body)
            .ok()
            .and_then(|m| m.message.or(m.detail))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_LOGIN_FAILURE.to_string())
    }

    /// Map a non-success status from the auth endpoint.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            400 | 401 | 403 => AuthError::InvalidCredentials(Self::server_message(body)),
            _ => AuthError::UnexpectedResponse {
                status,
                body: Self::truncate_body(body),
            },
        }
    }
}
