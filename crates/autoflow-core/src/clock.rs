//! Wall-clock time and one-shot timers, behind a trait so the refresh
//! schedule can be driven deterministically in tests.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

/// Work run when a timer fires
pub type TimerTask = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Shared firing state of one scheduled timer.
/// A timer leaves `PENDING` exactly once, either by firing or by being cancelled.
#[derive(Debug, Clone, Default)]
pub struct TimerState(Arc<AtomicU8>);

impl TimerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the timer for firing. Returns false if it was cancelled (or already fired).
    pub fn try_fire(&self) -> bool {
        self.0
            .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn try_cancel(&self) -> bool {
        self.0
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire) == PENDING
    }
}

/// Handle to a scheduled timer. Cancelling after the timer fired is a no-op.
#[derive(Debug)]
pub struct CancelHandle {
    state: TimerState,
    abort: Option<tokio::task::AbortHandle>,
}

impl CancelHandle {
    pub fn new(state: TimerState, abort: Option<tokio::task::AbortHandle>) -> Self {
        Self { state, abort }
    }

    pub fn cancel(&self) {
        if self.state.try_cancel() {
            if let Some(ref abort) = self.abort {
                abort.abort();
            }
        }
    }

    /// True until the timer fires or is cancelled
    pub fn is_pending(&self) -> bool {
        self.state.is_pending()
    }
}

pub trait SessionClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Run `task` once after `delay` unless the returned handle is cancelled first.
    fn schedule_once(&self, delay: Duration, task: TimerTask) -> CancelHandle;
}

/// System clock: `Utc::now` and tokio timers.
///
/// `schedule_once` must be called from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SessionClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn schedule_once(&self, delay: Duration, task: TimerTask) -> CancelHandle {
        let state = TimerState::new();
        let timer_state = state.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if timer_state.try_fire() {
                // Detached so that cancelling this timer from inside the task
                // cannot abort the work it started.
                tokio::spawn(task());
            }
        });
        CancelHandle::new(state, Some(handle.abort_handle()))
    }
}
