//! # Polling Fetch Loop
//!
//! Keeps one request descriptor continuously refreshed. Each call to
//! [`Poller::start`] or [`Poller::refetch`] opens a new poll session: a
//! background task that fetches, publishes the outcome, waits the poll
//! interval (measured from completion), and repeats.
//!
//! Sessions are identified by a counter stored inside the published state.
//! A task only commits while its identity is still the current one, and the
//! comparison happens under the state channel's write lock, so a superseded
//! session can never overwrite the state of its successor. Superseded
//! sessions are also cancelled, which aborts their in-flight request.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{FetchError, SharedFetchError};
use crate::query::RequestDescriptor;
use crate::transport::Transport;

/// Callback run on every response committed by the current session.
///
/// It may mutate the response before it is published.
pub type ResponseSink<R> = Arc<dyn Fn(&RequestDescriptor, &mut R) + Send + Sync>;

/// Published state of a poller.
pub struct PollState<R> {
    /// Last successfully fetched payload; kept across errors and refreshes.
    pub data: Option<Arc<R>>,
    /// A request is in flight and nothing has been resolved yet.
    pub is_loading: bool,
    /// A background request is in flight while earlier results stay visible.
    pub is_refreshing: bool,
    /// Error of the latest request, cleared by the next success.
    pub error: Option<SharedFetchError>,
    /// Completion time of the latest successful request.
    pub last_updated: Option<DateTime<Utc>>,
    /// Descriptor of the current session.
    pub descriptor: RequestDescriptor,
    session: u64,
    resolved: bool,
}

impl<R> PollState<R> {
    /// Identity of the current poll session.
    pub fn session(&self) -> u64 {
        self.session
    }
}

impl<R> Default for PollState<R> {
    fn default() -> Self {
        Self {
            data: None,
            is_loading: false,
            is_refreshing: false,
            error: None,
            last_updated: None,
            descriptor: RequestDescriptor::empty(),
            session: 0,
            resolved: false,
        }
    }
}

impl<R> Clone for PollState<R> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            is_loading: self.is_loading,
            is_refreshing: self.is_refreshing,
            error: self.error.clone(),
            last_updated: self.last_updated,
            descriptor: self.descriptor.clone(),
            session: self.session,
            resolved: self.resolved,
        }
    }
}

impl<R> fmt::Debug for PollState<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollState")
            .field("has_data", &self.data.is_some())
            .field("is_loading", &self.is_loading)
            .field("is_refreshing", &self.is_refreshing)
            .field("error", &self.error)
            .field("last_updated", &self.last_updated)
            .field("descriptor", &self.descriptor)
            .field("session", &self.session)
            .finish()
    }
}

struct ActiveSession {
    id: u64,
    descriptor: RequestDescriptor,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Slot {
    session: Option<ActiveSession>,
    closed: bool,
}

/// Periodic fetcher for one consumer.
pub struct Poller<R> {
    transport: Arc<dyn Transport>,
    interval: Duration,
    state: Arc<watch::Sender<PollState<R>>>,
    sink: Option<ResponseSink<R>>,
    active: Mutex<Slot>,
}

impl<R> Poller<R> {
    /// Create an idle poller; nothing is fetched until [`Poller::start`].
    pub fn new(transport: Arc<dyn Transport>, interval: Duration) -> Self {
        let (state, _) = watch::channel(PollState::default());
        Self {
            transport,
            interval,
            state: Arc::new(state),
            sink: None,
            active: Mutex::new(Slot::default()),
        }
    }

    /// Run `sink` on every response committed by the current session.
    pub fn with_sink(mut self, sink: ResponseSink<R>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop polling. Any in-flight request is aborted and its result dropped.
    /// A later [`Poller::start`] resumes.
    pub fn stop(&self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        self.stop_locked(&mut active);
    }

    /// Stop polling for good; later starts are ignored.
    pub fn close(&self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.closed = true;
        self.stop_locked(&mut active);
    }

    fn stop_locked(&self, active: &mut Slot) {
        let Some(previous) = active.session.take() else {
            return;
        };

        self.invalidate(|state| {
            state.is_loading = false;
            state.is_refreshing = false;
        });
        previous.cancel.cancel();
        debug!(
            session = previous.id,
            descriptor = %previous.descriptor,
            "Poll session stopped"
        );
    }

    /// Whether a session is currently active.
    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .session
            .is_some()
    }

    pub fn snapshot(&self) -> PollState<R> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState<R>> {
        self.state.subscribe()
    }

    /// Bump the session identity so late responses of older sessions are
    /// discarded, applying `update` in the same critical section.
    fn invalidate(&self, update: impl FnOnce(&mut PollState<R>)) -> u64 {
        let mut id = 0;
        self.state.send_modify(|state| {
            state.session += 1;
            id = state.session;
            update(state);
        });
        id
    }
}

impl<R> Poller<R>
where
    R: DeserializeOwned + Send + Sync + 'static,
{
    /// Open a new session for `descriptor`, superseding the current one.
    ///
    /// Must be called from within a tokio runtime. Returns the new identity,
    /// or the last one when the poller has been closed.
    pub fn start(&self, descriptor: RequestDescriptor) -> u64 {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.closed {
            debug!(descriptor = %descriptor, "Ignoring start on a closed poller");
            return self.state.borrow().session;
        }

        let id = self.invalidate(|state| {
            state.descriptor = descriptor.clone();
            if !descriptor.is_empty() {
                state.is_loading = !state.resolved;
                state.is_refreshing = state.resolved;
            }
        });
        if let Some(previous) = active.session.take() {
            previous.cancel.cancel();
            debug!(
                session = previous.id,
                descriptor = %previous.descriptor,
                "Poll session superseded"
            );
        }

        let cancel = CancellationToken::new();
        tokio::spawn(run_session(Session {
            id,
            descriptor: descriptor.clone(),
            transport: Arc::clone(&self.transport),
            state: Arc::clone(&self.state),
            sink: self.sink.clone(),
            interval: self.interval,
            cancel: cancel.clone(),
        }));

        debug!(session = id, descriptor = %descriptor, "Poll session started");
        active.session = Some(ActiveSession {
            id,
            descriptor,
            cancel,
        });
        id
    }

    /// Fetch the current descriptor right away instead of waiting for the
    /// pending interval. Returns `None` when the poller is stopped.
    pub fn refetch(&self) -> Option<u64> {
        let descriptor = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .session
            .as_ref()
            .map(|session| session.descriptor.clone())?;
        Some(self.start(descriptor))
    }
}

impl<R> Drop for Poller<R> {
    fn drop(&mut self) {
        let active = self.active.get_mut().unwrap_or_else(PoisonError::into_inner);
        active.closed = true;
        if let Some(previous) = active.session.take() {
            self.state.send_modify(|state| {
                state.session += 1;
                state.is_loading = false;
                state.is_refreshing = false;
            });
            previous.cancel.cancel();
        }
    }
}

struct Session<R> {
    id: u64,
    descriptor: RequestDescriptor,
    transport: Arc<dyn Transport>,
    state: Arc<watch::Sender<PollState<R>>>,
    sink: Option<ResponseSink<R>>,
    interval: Duration,
    cancel: CancellationToken,
}

impl<R> Session<R> {
    /// Apply `update` only while this session is still current.
    fn commit(&self, update: impl FnOnce(&mut PollState<R>)) -> bool {
        let committed = self.state.send_if_modified(|state| {
            if state.session != self.id {
                return false;
            }
            update(state);
            true
        });

        if !committed {
            counter!("list_poll_discarded_total").increment(1);
            debug!(
                session = self.id,
                descriptor = %self.descriptor,
                "Discarding result of superseded poll session"
            );
        }
        committed
    }
}

async fn run_session<R>(session: Session<R>)
where
    R: DeserializeOwned + Send + Sync + 'static,
{
    let resource = session.descriptor.path().to_string();

    loop {
        if session.descriptor.is_empty() {
            let current = session.commit(|state| {
                state.data = None;
                state.error = None;
                state.is_loading = false;
                state.is_refreshing = false;
                state.resolved = false;
            });
            if !current {
                return;
            }
        } else {
            let current = session.commit(|state| {
                if state.resolved {
                    state.is_refreshing = true;
                } else {
                    state.is_loading = true;
                }
            });
            if !current {
                return;
            }

            counter!("list_poll_requests_total", "resource" => resource.clone()).increment(1);
            let started = Instant::now();
            let result = session
                .transport
                .get(&session.descriptor, &session.cancel)
                .await
                .and_then(|value| serde_json::from_value::<R>(value).map_err(FetchError::from));
            histogram!("list_poll_request_duration_ms", "resource" => resource.clone())
                .record(started.elapsed().as_secs_f64() * 1_000.0);

            let current = match result {
                Err(err) if err.is_cancellation() || session.cancel.is_cancelled() => {
                    debug!(session = session.id, "Poll request aborted");
                    return;
                }
                Ok(mut data) => session.commit(|state| {
                    if let Some(sink) = &session.sink {
                        sink(&session.descriptor, &mut data);
                    }
                    state.data = Some(Arc::new(data));
                    state.error = None;
                    state.is_loading = false;
                    state.is_refreshing = false;
                    state.resolved = true;
                    state.last_updated = Some(Utc::now());
                }),
                Err(err) => {
                    counter!("list_poll_errors_total", "resource" => resource.clone())
                        .increment(1);
                    warn!(
                        session = session.id,
                        descriptor = %session.descriptor,
                        error = %err,
                        "List poll request failed"
                    );
                    session.commit(|state| {
                        state.error = Some(Arc::new(err));
                        state.is_loading = false;
                        state.is_refreshing = false;
                        state.resolved = true;
                    })
                }
            };
            if !current {
                return;
            }
        }

        tokio::select! {
            _ = session.cancel.cancelled() => return,
            _ = sleep(session.interval) => {}
        }
    }
}
