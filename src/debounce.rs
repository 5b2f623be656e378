//! # Descriptor Debouncing
//!
//! Holds the latest descriptor computed from query state next to a settled
//! copy that only follows it once it has stopped changing for the settle
//! window. Only the settled copy is handed to the poller, so typing into a
//! filter box does not restart polling on every keystroke.
//!
//! Each debouncer owns its timer task. Dropping the debouncer stops it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::query::RequestDescriptor;

/// Per-consumer debounce of a [`RequestDescriptor`].
#[derive(Debug)]
pub struct Debouncer {
    immediate: watch::Sender<RequestDescriptor>,
    settled: Arc<watch::Sender<RequestDescriptor>>,
    settle_window: Duration,
    shutdown: CancellationToken,
}

impl Debouncer {
    /// Start a debouncer whose immediate and settled values are both `initial`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(initial: RequestDescriptor, settle_window: Duration) -> Self {
        let (immediate, immediate_rx) = watch::channel(initial.clone());
        let (settled, _) = watch::channel(initial);
        let settled = Arc::new(settled);
        let shutdown = CancellationToken::new();

        tokio::spawn(settle_loop(
            immediate_rx,
            Arc::clone(&settled),
            settle_window,
            shutdown.clone(),
        ));

        Self {
            immediate,
            settled,
            settle_window,
            shutdown,
        }
    }

    pub fn settle_window(&self) -> Duration {
        self.settle_window
    }

    /// Record a new descriptor; the settled copy follows after the window.
    pub fn set(&self, descriptor: RequestDescriptor) {
        self.immediate.send_if_modified(|current| {
            if *current == descriptor {
                return false;
            }
            trace!(descriptor = %descriptor, "Descriptor changed; settling");
            *current = descriptor;
            true
        });
    }

    /// Record a new descriptor and publish it as settled right away.
    pub fn flush(&self, descriptor: RequestDescriptor) {
        self.immediate.send_replace(descriptor.clone());
        self.settled.send_if_modified(|current| {
            if *current == descriptor {
                return false;
            }
            debug!(descriptor = %descriptor, "Descriptor flushed");
            *current = descriptor;
            true
        });
    }

    /// Latest descriptor, settled or not.
    pub fn immediate(&self) -> RequestDescriptor {
        self.immediate.borrow().clone()
    }

    /// Descriptor that has been stable for the settle window.
    pub fn settled(&self) -> RequestDescriptor {
        self.settled.borrow().clone()
    }

    /// Whether the latest descriptor has not been published yet.
    pub fn is_settling(&self) -> bool {
        *self.immediate.borrow() != *self.settled.borrow()
    }

    /// Receiver that observes each settled descriptor.
    pub fn subscribe(&self) -> watch::Receiver<RequestDescriptor> {
        self.settled.subscribe()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn settle_loop(
    mut immediate: watch::Receiver<RequestDescriptor>,
    settled: Arc<watch::Sender<RequestDescriptor>>,
    settle_window: Duration,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            changed = immediate.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        // Every further change restarts the quiet period.
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                changed = immediate.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = sleep(settle_window) => break,
            }
        }

        let latest = immediate.borrow_and_update().clone();
        settled.send_if_modified(|current| {
            if *current == latest {
                return false;
            }
            debug!(descriptor = %latest, "Descriptor settled");
            *current = latest;
            true
        });
    }
}
