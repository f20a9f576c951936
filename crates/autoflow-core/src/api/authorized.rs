//! Authorizing wrapper around the generic transport.
//!
//! Attaches the cached bearer token to every outbound call. A `401` triggers
//! one reactive refresh and one retry; the attempt count travels with the
//! call itself.

use std::sync::Arc;

use reqwest::header;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::RefreshCoordinator;

use super::error::AuthError;
use super::transport::{HttpRequest, HttpResponse, HttpTransport};

/// A rejected call is retried at most this many times after a refresh
const MAX_AUTH_RETRIES: u32 = 1;

#[derive(Clone)]
pub struct AuthorizedClient {
    transport: Arc<dyn HttpTransport>,
    coordinator: RefreshCoordinator,
}

impl AuthorizedClient {
    pub fn new(transport: Arc<dyn HttpTransport>, coordinator: RefreshCoordinator) -> Self {
        Self {
            transport,
            coordinator,
        }
    }

    fn authorize(mut request: HttpRequest, token: Option<&str>) -> HttpRequest {
        request.remove_header(header::AUTHORIZATION.as_str());
        match token {
            Some(token) => request.with_header(header::AUTHORIZATION.as_str(), format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Send `request` with the current access token.
    ///
    /// Non-401 responses and transport errors are returned as they are. A
    /// 401 after the single retry ends the session with
    /// [`AuthError::SessionExpired`].
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AuthError> {
        let mut attempt: u32 = 0;
        loop {
            let token = self.coordinator.session().map(|s| s.access_token);
            let outgoing = Self::authorize(request.clone(), token.as_deref());
            let response = self.transport.send(outgoing).await?;

            if !response.is_unauthorized() {
                return Ok(response);
            }

            if attempt >= MAX_AUTH_RETRIES {
                warn!(path = %request.path, "Request still unauthorized after refresh, ending session");
                self.coordinator.teardown();
                return Err(AuthError::SessionExpired);
            }
            attempt += 1;

            debug!(path = %request.path, attempt, "Request unauthorized, refreshing token");
            match token {
                Some(ref token) => self.coordinator.refresh_rejected(token).await?,
                None => self.coordinator.ensure_fresh(chrono::Duration::zero()).await?,
            };
        }
    }

    pub async fn get(&self, path: &str) -> Result<HttpResponse, AuthError> {
        self.send(HttpRequest::get(path)).await
    }

    /// GET `path` and parse a successful JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AuthError> {
        let response = self.get(path).await?;
        if !response.is_success() {
            return Err(AuthError::UnexpectedResponse {
                status: response.status,
                body: AuthError::truncate_body(&response.body),
            });
        }
        response.json().map_err(|e| AuthError::UnexpectedResponse {
            status: response.status,
            body: format!("{}: {}", e, AuthError::truncate_body(&response.body)),
        })
    }
}
