//! Single-flight access token renewal.
//!
//! The [`RefreshCoordinator`] owns the in-memory [`Session`], the proactive
//! refresh timer and the (at most one) in-flight refresh call. Callers that
//! need a fresh token while a refresh is running attach to the same shared
//! future and all observe its outcome.
//!
//! Every transition (session installed, refresh succeeded, refresh failed,
//! session torn down) replaces the single timer handle: success and install
//! re-arm it, failure and teardown cancel it.
//!
//! Each installed session gets a new epoch. A refresh whose epoch no longer
//! matches when it completes is discarded, so a slow refresh cannot resurrect
//! a session that was logged out (or clear one that replaced it).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::api::{AuthApi, AuthError};
use crate::clock::{CancelHandle, SessionClock};

use super::credentials::TokenStore;
use super::session::Session;

/// Refresh this long before the access token expires
pub const DEFAULT_REFRESH_LEAD_SECS: i64 = 60;

type RefreshOutcome = Result<Session, AuthError>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    /// Margin before expiry at which the proactive timer fires
    pub lead_time: Duration,
    /// Added to the clock before every expiry comparison
    pub clock_skew: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            lead_time: Duration::seconds(DEFAULT_REFRESH_LEAD_SECS),
            clock_skew: Duration::zero(),
        }
    }
}

#[derive(Default)]
struct State {
    session: Option<Session>,
    in_flight: Option<PendingRefresh>,
    timer: Option<CancelHandle>,
    epoch: u64,
}

struct Inner {
    api: AuthApi,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn SessionClock>,
    settings: RefreshSettings,
    state: Mutex<State>,
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        api: AuthApi,
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn SessionClock>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                clock,
                settings,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn settings(&self) -> RefreshSettings {
        self.inner.settings
    }

    /// Current time as used for expiry decisions (clock plus skew allowance)
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.now()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.lock_state().session.clone()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.lock_state().in_flight.is_some()
    }

    /// True while a proactive refresh timer is armed and has not fired
    pub fn has_pending_timer(&self) -> bool {
        self.inner
            .lock_state()
            .timer
            .as_ref()
            .is_some_and(CancelHandle::is_pending)
    }

    /// Return a session whose access token is valid for at least `lead_time`,
    /// refreshing it first if necessary.
    ///
    /// Concurrent callers share one refresh call. Any refresh failure ends
    /// the session and every waiter gets [`AuthError::SessionExpired`].
    pub async fn ensure_fresh(&self, lead_time: Duration) -> Result<Session, AuthError> {
        self.ensure_fresh_inner(lead_time, None).await
    }

    /// Reactive variant used after the server rejected `rejected_token`.
    ///
    /// The rejected token counts as stale even if its `exp` says otherwise.
    /// If another caller already replaced it, the current session is
    /// returned without a second refresh.
    pub async fn refresh_rejected(&self, rejected_token: &str) -> Result<Session, AuthError> {
        self.ensure_fresh_inner(Duration::zero(), Some(rejected_token)).await
    }

    async fn ensure_fresh_inner(
        &self,
        lead_time: Duration,
        rejected_token: Option<&str>,
    ) -> Result<Session, AuthError> {
        let pending = {
            let mut state = self.inner.lock_state();
            let in_flight = state.in_flight.clone();
            match in_flight {
                Some(pending) => {
                    debug!("Refresh already in flight, waiting on it");
                    pending
                }
                None => {
                    let session = state.session.clone().ok_or(AuthError::SessionExpired)?;
                    let rejected = rejected_token == Some(session.access_token.as_str());
                    if !rejected && !session.expires_within(lead_time, self.inner.now()) {
                        return Ok(session);
                    }
                    Inner::start_refresh(&self.inner, &mut state, session.refresh_token)
                }
            }
        };
        pending.await
    }

    /// Exchange a stored refresh token for a session when no usable access
    /// token is available (startup with an expired or unreadable token).
    pub(crate) async fn restore(&self, refresh_token: String) -> Result<Session, AuthError> {
        let pending = {
            let mut state = self.inner.lock_state();
            state.epoch += 1;
            state.session = None;
            Inner::replace_timer(&mut state, None);
            Inner::start_refresh(&self.inner, &mut state, refresh_token)
        };
        pending.await
    }

    /// Persist `session`, make it current and arm its proactive refresh timer.
    ///
    /// The save happens under the state lock so a refresh finishing for the
    /// previous session cannot interleave its own write. On a storage error
    /// nothing changes.
    pub(crate) fn install(&self, session: Session) -> Result<(), AuthError> {
        let mut state = self.inner.lock_state();
        self.inner
            .store
            .save(&session.credentials())
            .map_err(|e| AuthError::Storage(format!("{:#}", e)))?;
        Inner::activate(&self.inner, &mut state, session);
        Ok(())
    }

    /// Like [`install`](Self::install) for a session read back from the store.
    pub(crate) fn resume(&self, session: Session) {
        let mut state = self.inner.lock_state();
        Inner::activate(&self.inner, &mut state, session);
    }

    /// Drop the session: clear storage and memory, cancel the timer.
    /// Idempotent.
    pub(crate) fn teardown(&self) {
        let mut state = self.inner.lock_state();
        state.epoch += 1;
        self.inner.clear_locked(&mut state);
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now() + self.settings.clock_skew
    }

    /// Spawn the refresh call and record it as the in-flight request.
    ///
    /// Runs with the state lock held; the spawned task needs the same lock to
    /// publish its outcome, so it cannot finish before `in_flight` is set.
    fn start_refresh(this: &Arc<Self>, state: &mut State, refresh_token: String) -> PendingRefresh {
        let epoch = state.epoch;
        info!(epoch, "Refreshing access token");

        let task = tokio::spawn(Arc::clone(this).run_refresh(refresh_token, epoch));
        let inner = Arc::clone(this);
        let pending = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Refresh task did not complete");
                    let mut state = inner.lock_state();
                    if state.epoch == epoch {
                        inner.clear_locked(&mut state);
                    }
                    Err(AuthError::SessionExpired)
                }
            }
        }
        .boxed()
        .shared();

        state.in_flight = Some(pending.clone());
        pending
    }

    async fn run_refresh(self: Arc<Self>, refresh_token: String, epoch: u64) -> RefreshOutcome {
        let response = self.api.refresh(&refresh_token).await;
        let result = response.and_then(|tokens| {
            // keep the old refresh token unless the server rotated it
            let refresh = tokens.refresh.unwrap_or(refresh_token);
            Session::from_tokens(tokens.access, refresh)
        });

        let mut state = self.lock_state();
        if state.epoch != epoch {
            debug!(epoch, current = state.epoch, "Discarding refresh result for a replaced session");
            return Err(AuthError::SessionExpired);
        }
        state.in_flight = None;

        let session = match result {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                self.clear_locked(&mut state);
                return Err(AuthError::SessionExpired);
            }
        };

        if let Err(e) = self.store.save(&session.credentials()) {
            error!(error = %e, "Failed to persist refreshed tokens, ending session");
            self.clear_locked(&mut state);
            return Err(AuthError::SessionExpired);
        }

        Self::arm_timer(&self, &mut state, &session, false);
        state.session = Some(session.clone());
        info!(
            subject = %session.subject_id,
            expires_at = %session.access_expiry,
            "Access token refreshed"
        );
        Ok(session)
    }

    fn activate(this: &Arc<Self>, state: &mut State, session: Session) {
        state.epoch += 1;
        state.in_flight = None;
        Self::arm_timer(this, state, &session, true);
        state.session = Some(session);
    }

    fn clear_locked(&self, state: &mut State) {
        state.session = None;
        state.in_flight = None;
        Self::replace_timer(state, None);
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored credentials");
        }
    }

    fn replace_timer(state: &mut State, timer: Option<CancelHandle>) {
        if let Some(old) = std::mem::replace(&mut state.timer, timer) {
            old.cancel();
        }
    }

    /// Schedule the proactive refresh for `session`.
    ///
    /// A fresh session that is already inside the lead window refreshes
    /// immediately. A token that comes back from a refresh already inside the
    /// window gets no timer; the reactive 401 path covers it.
    fn arm_timer(this: &Arc<Self>, state: &mut State, session: &Session, allow_immediate: bool) {
        let delay = session.time_until_expiry(this.now()) - this.settings.lead_time;
        let delay = match delay.to_std() {
            Ok(delay) if !delay.is_zero() => delay,
            _ if allow_immediate => std::time::Duration::ZERO,
            _ => {
                warn!(
                    expires_at = %session.access_expiry,
                    "Refreshed token is already inside the refresh window; not scheduling proactive refresh"
                );
                Self::replace_timer(state, None);
                return;
            }
        };

        debug!(delay_secs = delay.as_secs(), "Scheduling proactive token refresh");
        let weak = Arc::downgrade(this);
        let lead_time = this.settings.lead_time;
        let handle = this.clock.schedule_once(
            delay,
            Box::new(move || Self::proactive_refresh(weak, lead_time).boxed()),
        );
        Self::replace_timer(state, Some(handle));
    }

    async fn proactive_refresh(weak: Weak<Self>, lead_time: Duration) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let coordinator = RefreshCoordinator { inner };
        if let Err(e) = coordinator.ensure_fresh(lead_time).await {
            debug!(error = %e, "Proactive refresh ended the session");
        }
    }
}
