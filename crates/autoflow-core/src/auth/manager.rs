//! Session façade used by collaborators: startup restore, login, logout
//! and current-user queries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::api::{AuthApi, AuthError, AuthorizedClient, HttpTransport, ReqwestTransport};
use crate::clock::{SessionClock, SystemClock};
use crate::config::Config;

use super::credentials::{StoredCredentials, TokenStore};
use super::refresh::{RefreshCoordinator, RefreshSettings};
use super::session::{Session, SessionState, UserInfo};

pub struct SessionManager {
    api: AuthApi,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn TokenStore>,
    coordinator: RefreshCoordinator,
    authenticating: AtomicBool,
}

/// Marks a login as in progress for as long as it lives
struct AuthenticatingGuard<'a>(&'a AtomicBool);

impl<'a> AuthenticatingGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for AuthenticatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn SessionClock>,
        settings: RefreshSettings,
    ) -> Self {
        let api = AuthApi::new(transport.clone());
        let coordinator = RefreshCoordinator::new(api.clone(), store.clone(), clock, settings);
        Self {
            api,
            transport,
            store,
            coordinator,
            authenticating: AtomicBool::new(false),
        }
    }

    /// Wire up the reqwest transport, the configured token store and the system clock
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = ReqwestTransport::new(
            &config.api_base_url,
            StdDuration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Self::new(
            Arc::new(transport),
            config.token_store()?,
            Arc::new(SystemClock::new()),
            config.refresh_settings(),
        ))
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Client for API calls that need the bearer token
    pub fn authorized_client(&self) -> AuthorizedClient {
        AuthorizedClient::new(self.transport.clone(), self.coordinator.clone())
    }

    pub fn state(&self) -> SessionState {
        if self.authenticating.load(Ordering::SeqCst) {
            SessionState::Authenticating
        } else if self.coordinator.session().is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    /// Restore the session persisted by a previous run.
    ///
    /// Never fails: anything unusable resolves to `Unauthenticated`. Makes at
    /// most one refresh round trip.
    pub async fn initialize(&self) -> SessionState {
        let stored = match self.store.load() {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!("No stored credentials");
                return SessionState::Unauthenticated;
            }
            Err(e) => {
                warn!(error = %e, "Stored credentials unreadable, discarding");
                self.coordinator.teardown();
                return SessionState::Unauthenticated;
            }
        };

        let StoredCredentials {
            access_token,
            refresh_token,
        } = stored;

        match Session::from_tokens(access_token, refresh_token.clone()) {
            Ok(session) if !session.is_expired(self.coordinator.now()) => {
                info!(subject = %session.subject_id, "Restored stored session");
                self.coordinator.resume(session);
                return SessionState::Authenticated;
            }
            Ok(_) => debug!("Stored access token expired"),
            Err(e) => warn!(error = %e, "Stored access token unreadable"),
        }

        if refresh_token.is_empty() {
            self.coordinator.teardown();
            return SessionState::Unauthenticated;
        }

        match self.coordinator.restore(refresh_token).await {
            Ok(session) => {
                info!(subject = %session.subject_id, "Session restored with refresh token");
                SessionState::Authenticated
            }
            Err(e) => {
                warn!(error = %e, "Could not restore session");
                SessionState::Unauthenticated
            }
        }
    }

    /// Authenticate with email and password and start a new session
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let _authenticating = AuthenticatingGuard::enter(&self.authenticating);

        let credentials = self.api.login(email, password).await.map_err(|e| {
            error!(error = %e, "Login failed");
            e
        })?;
        let session = Session::from_tokens(credentials.access_token, credentials.refresh_token)?;
        self.coordinator.install(session.clone()).map_err(|e| {
            error!(error = %e, "Failed to store credentials");
            e
        })?;

        info!(subject = %session.subject_id, "Login successful");
        Ok(session)
    }

    /// End the session. The server is told on a best-effort basis; local
    /// state is always cleared.
    pub async fn logout(&self) {
        let credentials = match self.coordinator.session() {
            Some(session) => Some(session.credentials()),
            None => self.store.load().ok().flatten(),
        };

        if let Some(credentials) = credentials {
            if let Err(e) = self
                .api
                .logout(&credentials.access_token, &credentials.refresh_token)
                .await
            {
                warn!(error = %e, "Remote logout failed, clearing local session anyway");
            }
        }

        self.coordinator.teardown();
        info!("Logged out");
    }

    pub fn current_user(&self) -> Option<UserInfo> {
        self.coordinator.session().map(|s| s.user())
    }

    pub fn is_authenticated(&self) -> bool {
        self.coordinator.session().is_some()
    }

    /// The cached access token; never touches the network
    pub fn access_token(&self) -> Option<String> {
        self.coordinator.session().map(|s| s.access_token)
    }
}
