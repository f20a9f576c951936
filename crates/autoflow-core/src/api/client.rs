//! Client for the remote authentication endpoint.
//!
//! Three calls: `login/`, `refresh/` and `logout/`. Everything goes through
//! the generic [`HttpTransport`], so the same client works against the real
//! server and against a scripted transport in tests.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::auth::StoredCredentials;

use super::error::AuthError;
use super::transport::{HttpRequest, HttpResponse, HttpTransport};

const LOGIN_PATH: &str = "/login/";
const REFRESH_PATH: &str = "/refresh/";
const LOGOUT_PATH: &str = "/logout/";

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(alias = "access_token")]
    access: String,
    #[serde(alias = "refresh_token")]
    refresh: String,
}

/// Tokens returned by `refresh/`. The server may or may not rotate the
/// refresh token.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshedTokens {
    #[serde(alias = "access_token")]
    pub access: String,
    #[serde(default, alias = "refresh_token")]
    pub refresh: Option<String>,
}

#[derive(Clone)]
pub struct AuthApi {
    transport: Arc<dyn HttpTransport>,
}

impl AuthApi {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Exchange email and password for a token pair
    pub async fn login(&self, email: &str, password: &str) -> Result<StoredCredentials, AuthError> {
        let request = HttpRequest::post(LOGIN_PATH, json!({ "email": email, "password": password }));
        let response = self.transport.send(request).await?;
        let response = Self::check_response(response)?;

        let tokens: LoginResponse = Self::parse(&response)?;
        debug!("Login response received");
        Ok(StoredCredentials {
            access_token: tokens.access,
            refresh_token: tokens.refresh,
        })
    }

    /// Exchange a refresh token for a new access token
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, AuthError> {
        let request = HttpRequest::post(REFRESH_PATH, json!({ "refresh": refresh_token }));
        let response = self.transport.send(request).await?;
        let response = Self::check_response(response)?;

        let tokens: RefreshedTokens = Self::parse(&response)?;
        debug!(rotated = tokens.refresh.is_some(), "Refresh response received");
        Ok(tokens)
    }

    /// Ask the server to invalidate the token pair
    pub async fn logout(&self, access_token: &str, refresh_token: &str) -> Result<(), AuthError> {
        let request = HttpRequest::post(
            LOGOUT_PATH,
            json!({ "access_token": access_token, "refresh_token": refresh_token }),
        );
        let response = self.transport.send(request).await?;
        Self::check_response(response)?;
        Ok(())
    }

    /// Check if response is successful, returning an error with body if not.
    fn check_response(response: HttpResponse) -> Result<HttpResponse, AuthError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(AuthError::from_status(response.status, &response.body))
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(response: &HttpResponse) -> Result<T, AuthError> {
        response.json().map_err(|e| AuthError::UnexpectedResponse {
            status: response.status,
            body: format!("{}: {}", e, AuthError::truncate_body(&response.body)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeTransport, Reply};

    #[tokio::test]
    async fn test_login_returns_token_pair() {
        let transport = FakeTransport::new();
        transport.enqueue(LOGIN_PATH, Reply::json(200, json!({"access": "a1", "refresh": "r1"})));
        let api = AuthApi::new(transport.clone());

        let creds = api.login("user@example.com", "hunter2").await.expect("login succeeds");
        assert_eq!(creds.access_token, "a1");
        assert_eq!(creds.refresh_token, "r1");

        let sent = transport.requests(LOGIN_PATH);
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].body,
            Some(json!({"email": "user@example.com", "password": "hunter2"}))
        );
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let transport = FakeTransport::new();
        transport.enqueue(LOGIN_PATH, Reply::json(401, json!({"detail": "No active account"})));
        let api = AuthApi::new(transport);

        let err = api.login("user@example.com", "wrong").await.unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials("No active account".to_string()));
    }

    #[tokio::test]
    async fn test_login_transport_failure() {
        let transport = FakeTransport::new();
        transport.enqueue(LOGIN_PATH, Reply::fail("connection refused"));
        let api = AuthApi::new(transport);

        let err = api.login("user@example.com", "pw").await.unwrap_err();
        assert!(matches!(err, AuthError::NetworkError(_)));
    }

    #[tokio::test]
    async fn test_refresh_accepts_long_field_names() {
        let transport = FakeTransport::new();
        transport.enqueue(REFRESH_PATH, Reply::json(200, json!({"access_token": "a2"})));
        transport.enqueue(
            REFRESH_PATH,
            Reply::json(200, json!({"access": "a3", "refresh": "r3"})),
        );
        let api = AuthApi::new(transport.clone());

        let first = api.refresh("r1").await.expect("refresh");
        assert_eq!(first.access, "a2");
        assert_eq!(first.refresh, None);

        let second = api.refresh("r1").await.expect("refresh");
        assert_eq!(second.refresh.as_deref(), Some("r3"));

        assert_eq!(transport.requests(REFRESH_PATH)[0].body, Some(json!({"refresh": "r1"})));
    }

    #[tokio::test]
    async fn test_refresh_garbage_body() {
        let transport = FakeTransport::new();
        transport.enqueue(REFRESH_PATH, Reply::text(200, "<html>oops</html>"));
        let api = AuthApi::new(transport);

        let err = api.refresh("r1").await.unwrap_err();
        assert!(matches!(err, AuthError::UnexpectedResponse { status: 200, .. }));
    }

    #[tokio::test]
    async fn test_logout_sends_both_tokens() {
        let transport = FakeTransport::new();
        transport.enqueue(LOGOUT_PATH, Reply::text(205, ""));
        let api = AuthApi::new(transport.clone());

        api.logout("a1", "r1").await.expect("logout");
        assert_eq!(
            transport.requests(LOGOUT_PATH)[0].body,
            Some(json!({"access_token": "a1", "refresh_token": "r1"}))
        );
    }
}
