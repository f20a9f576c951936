//! Test doubles shared by the unit tests: a scripted transport, a manually
//! advanced clock and token builders.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::api::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::auth::claims::{issue_unsigned, Claims};
use crate::auth::{MemoryTokenStore, StoredCredentials, TokenStore};
use crate::clock::{CancelHandle, SessionClock, TimerState, TimerTask};

/// Subject and email carried by every token built here
pub const TEST_SUBJECT: &str = "42";
pub const TEST_EMAIL: &str = "user@example.com";

pub fn token_expiring_at(expiry: DateTime<Utc>) -> String {
    issue_unsigned(&Claims {
        subject_id: TEST_SUBJECT.to_string(),
        email: TEST_EMAIL.to_string(),
        expiry,
    })
}

/// A successful `refresh/` reply carrying a new access token
pub fn refresh_reply(expiry: DateTime<Utc>, rotated: Option<&str>) -> Reply {
    let mut body = json!({ "access": token_expiring_at(expiry) });
    if let Some(refresh) = rotated {
        body["refresh"] = json!(refresh);
    }
    Reply::json(200, body)
}

/// A successful `login/` reply
pub fn login_reply(expiry: DateTime<Utc>, refresh: &str) -> Reply {
    Reply::json(200, json!({ "access": token_expiring_at(expiry), "refresh": refresh }))
}

/// Let spawned tasks run until they block
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16, String),
    Fail(String),
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Reply::Status(status, body.to_string())
    }

    pub fn text(status: u16, body: &str) -> Self {
        Reply::Status(status, body.to_string())
    }

    pub fn fail(message: &str) -> Self {
        Reply::Fail(message.to_string())
    }
}

#[derive(Default)]
struct Route {
    queued: VecDeque<Reply>,
    fallback: Option<Reply>,
}

/// Scripted [`HttpTransport`]. Replies are looked up by request path: queued
/// one-shot replies first, then the `always` reply, otherwise 404.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, Route>>,
    requests: Mutex<Vec<HttpRequest>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enqueue(&self, path: &str, reply: Reply) {
        let mut routes = self.routes.lock().expect("routes lock");
        routes.entry(path.to_string()).or_default().queued.push_back(reply);
    }

    pub fn always(&self, path: &str, reply: Reply) {
        let mut routes = self.routes.lock().expect("routes lock");
        routes.entry(path.to_string()).or_default().fallback = Some(reply);
    }

    /// Hold requests to `path` until permits are added to the returned semaphore
    pub fn gate(&self, path: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates
            .lock()
            .expect("gates lock")
            .insert(path.to_string(), gate.clone());
        gate
    }

    pub fn requests(&self, path: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .expect("requests lock")
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    pub fn calls(&self, path: &str) -> usize {
        self.requests(path).len()
    }

    fn next_reply(&self, path: &str) -> Option<Reply> {
        let mut routes = self.routes.lock().expect("routes lock");
        let route = routes.get_mut(path)?;
        route.queued.pop_front().or_else(|| route.fallback.clone())
    }
}

impl HttpTransport for FakeTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        async move {
            let path = request.path.clone();
            self.requests.lock().expect("requests lock").push(request);

            let gate = self.gates.lock().expect("gates lock").get(&path).cloned();
            if let Some(gate) = gate {
                gate.acquire().await.expect("gate open").forget();
            }

            match self.next_reply(&path) {
                Some(Reply::Status(status, body)) => Ok(HttpResponse::new(status, body)),
                Some(Reply::Fail(message)) => Err(TransportError::Connection(message)),
                None => Ok(HttpResponse::new(404, "not found")),
            }
        }
        .boxed()
    }
}

struct ManualTimer {
    deadline: DateTime<Utc>,
    state: TimerState,
    task: TimerTask,
}

struct ManualState {
    now: DateTime<Utc>,
    timers: Vec<ManualTimer>,
}

/// Clock whose time only moves when the test says so. Timers due at or
/// before the new time run (in deadline order) inside [`ManualClock::advance`].
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl ManualClock {
    pub fn at_epoch_secs(secs: i64) -> Self {
        let now = DateTime::from_timestamp(secs, 0).expect("valid timestamp");
        Self {
            state: Mutex::new(ManualState {
                now,
                timers: Vec::new(),
            }),
        }
    }

    /// Deadlines of timers that have neither fired nor been cancelled
    pub fn pending_deadlines(&self) -> Vec<DateTime<Utc>> {
        let state = self.state.lock().expect("clock lock");
        state
            .timers
            .iter()
            .filter(|t| t.state.is_pending())
            .map(|t| t.deadline)
            .collect()
    }

    pub async fn advance(&self, by: Duration) {
        let due = {
            let mut state = self.state.lock().expect("clock lock");
            state.now += by;
            let now = state.now;
            let (mut due, keep): (Vec<_>, Vec<_>) = std::mem::take(&mut state.timers)
                .into_iter()
                .filter(|t| t.state.is_pending())
                .partition(|t| t.deadline <= now);
            state.timers = keep;
            due.sort_by_key(|t| t.deadline);
            due
        };

        for timer in due {
            if timer.state.try_fire() {
                (timer.task)().await;
            }
        }
        settle().await;
    }
}

impl SessionClock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().expect("clock lock").now
    }

    fn schedule_once(&self, delay: std::time::Duration, task: TimerTask) -> CancelHandle {
        let mut state = self.state.lock().expect("clock lock");
        let delay = Duration::from_std(delay).expect("delay in range");
        let timer_state = TimerState::new();
        let deadline = state.now + delay;
        state.timers.push(ManualTimer {
            deadline,
            state: timer_state.clone(),
            task,
        });
        CancelHandle::new(timer_state, None)
    }
}

/// [`TokenStore`] whose `load` and `save` can be switched to fail.
/// Counts `clear` calls; clearing always succeeds.
#[derive(Default)]
pub struct FailingTokenStore {
    inner: MemoryTokenStore,
    fail_load: AtomicBool,
    fail_save: AtomicBool,
    clears: AtomicUsize,
}

impl FailingTokenStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn fail_save(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl TokenStore for FailingTokenStore {
    fn load(&self) -> anyhow::Result<Option<StoredCredentials>> {
        if self.fail_load.load(Ordering::SeqCst) {
            anyhow::bail!("credentials unreadable");
        }
        self.inner.load()
    }

    fn save(&self, credentials: &StoredCredentials) -> anyhow::Result<()> {
        if self.fail_save.load(Ordering::SeqCst) {
            anyhow::bail!("disk full");
        }
        self.inner.save(credentials)
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear()
    }
}
