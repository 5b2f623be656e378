//! # Resource List View
//!
//! Wires the pager, the descriptor builder, the debouncer and the poller
//! together for one paginated list. Query edits are debounced; page
//! navigation and explicit refreshes take effect immediately.
//!
//! Page bookkeeping is only fed responses to the exact descriptor the pager
//! currently wants: same filters, same page, same token. A response for a page
//! the user has left, or for a query that was replaced, cannot rewrite the
//! token table. Replacing the query forgets all tokens, so deeper pages become
//! reachable again only once the new query's first page has resolved.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::PollConfig;
use crate::debounce::Debouncer;
use crate::error::SharedFetchError;
use crate::models::list::ListResponse;
use crate::pagination::Pager;
use crate::poller::{PollState, Poller, ResponseSink};
use crate::query::{ListQuery, RequestDescriptor, build_descriptor};
use crate::transport::Transport;

/// Hook that may rewrite each page before it is recorded and published.
pub type PageProcessor<T> = Arc<dyn Fn(&mut ListResponse<T>) + Send + Sync>;

/// Timing and sizing of a list view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListViewOptions {
    pub page_size: usize,
    pub poll_interval: Duration,
    pub settle_window: Duration,
}

impl ListViewOptions {
    pub fn from_config(config: &PollConfig) -> Self {
        Self {
            page_size: config.page_size,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            settle_window: Duration::from_millis(config.settle_window_ms),
        }
    }
}

impl Default for ListViewOptions {
    fn default() -> Self {
        Self::from_config(&PollConfig::default())
    }
}

/// Navigation outside the pages whose tokens are known.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageError {
    #[error("page {page} is not reachable; last reachable page is {last_reachable}")]
    Unreachable { page: usize, last_reachable: usize },
}

/// Point-in-time view of a list for rendering.
#[derive(Debug)]
pub struct ListViewState<T> {
    pub data: Option<Arc<ListResponse<T>>>,
    pub is_loading: bool,
    pub is_refreshing: bool,
    /// A query edit is waiting out the settle window.
    pub is_settling: bool,
    pub error: Option<SharedFetchError>,
    pub last_updated: Option<DateTime<Utc>>,
    pub current_page: usize,
    pub estimated_item_count: u64,
    pub last_reachable_page: usize,
    pub has_next_page: bool,
}

impl<T> ListViewState<T> {
    /// Items of the displayed page, empty until the first success.
    pub fn items(&self) -> &[T] {
        self.data
            .as_deref()
            .map(|page| page.items.as_slice())
            .unwrap_or_default()
    }

    /// Any background activity worth a lightweight spinner.
    pub fn is_updating(&self) -> bool {
        self.is_refreshing || self.is_settling
    }
}

/// Filters and the pagination state learned for them.
struct Paging {
    query: ListQuery,
    pager: Pager,
}

impl Paging {
    fn descriptor(&self) -> RequestDescriptor {
        build_descriptor(
            &self.query,
            self.pager.token_for_current_page(),
            self.pager.page_size(),
        )
    }
}

/// One paginated, polled resource list.
pub struct ResourceListView<T> {
    paging: Arc<Mutex<Paging>>,
    debouncer: Debouncer,
    poller: Arc<Poller<ListResponse<T>>>,
    forwarder: CancellationToken,
}

impl<T> ResourceListView<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    /// Open the view and start polling page 1 of `query`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(transport: Arc<dyn Transport>, query: ListQuery, options: ListViewOptions) -> Self {
        Self::open_with_processor(transport, query, options, None)
    }

    pub fn open_with_processor(
        transport: Arc<dyn Transport>,
        query: ListQuery,
        options: ListViewOptions,
        processor: Option<PageProcessor<T>>,
    ) -> Self {
        let paging = Arc::new(Mutex::new(Paging {
            query,
            pager: Pager::new(options.page_size),
        }));
        let descriptor = lock(&paging).descriptor();

        let sink = page_sink(Arc::clone(&paging), processor);
        let poller = Arc::new(Poller::new(transport, options.poll_interval).with_sink(sink));
        poller.start(descriptor.clone());

        let debouncer = Debouncer::new(descriptor, options.settle_window);
        let forwarder = CancellationToken::new();
        tokio::spawn(forward_settled(
            debouncer.subscribe(),
            Arc::clone(&poller),
            forwarder.clone(),
        ));

        Self {
            paging,
            debouncer,
            poller,
            forwarder,
        }
    }

    /// Replace the filters. Returns to page 1 and waits for the input to settle.
    ///
    /// Tokens learned for the previous filters are dropped, so only page 1 is
    /// reachable until the new query's first page arrives.
    pub fn set_query(&self, query: ListQuery) {
        let mut paging = lock(&self.paging);
        if paging.query == query {
            return;
        }
        paging.query = query;
        paging.pager.reset();

        self.debouncer.set(paging.descriptor());
    }

    /// Navigate to `page`, fetching it immediately.
    pub fn go_to_page(&self, page: usize) -> Result<(), PageError> {
        let descriptor = {
            let mut paging = lock(&self.paging);
            if !paging.pager.can_request_page(page) {
                return Err(PageError::Unreachable {
                    page,
                    last_reachable: paging.pager.last_reachable_page(),
                });
            }
            paging.pager.request_page(page);
            paging.descriptor()
        };

        self.debouncer.flush(descriptor.clone());
        self.restart_if_changed(descriptor);
        Ok(())
    }

    /// Re-fetch the settled descriptor now, restarting the poll interval.
    pub fn refetch(&self) {
        if self.poller.refetch().is_none() {
            self.poller.start(self.debouncer.settled());
        }
    }

    pub fn snapshot(&self) -> ListViewState<T> {
        let poll = self.poller.snapshot();
        let is_settling = self.debouncer.is_settling();
        let paging = lock(&self.paging);
        let pager = &paging.pager;

        ListViewState {
            data: poll.data,
            is_loading: poll.is_loading,
            is_refreshing: poll.is_refreshing,
            is_settling,
            error: poll.error,
            last_updated: poll.last_updated,
            current_page: pager.current_page(),
            estimated_item_count: pager.estimated_item_count(),
            last_reachable_page: pager.last_reachable_page(),
            has_next_page: pager.has_next_page(),
        }
    }

    /// Receiver notified on every poll state change.
    pub fn subscribe(&self) -> watch::Receiver<PollState<ListResponse<T>>> {
        self.poller.subscribe()
    }

    /// Descriptor built from the latest query and page, settled or not.
    pub fn descriptor(&self) -> RequestDescriptor {
        self.debouncer.immediate()
    }

    /// Stop polling and drop any in-flight result.
    pub fn close(&self) {
        self.forwarder.cancel();
        self.poller.close();
    }

    fn restart_if_changed(&self, descriptor: RequestDescriptor) {
        restart_if_changed(&self.poller, descriptor);
    }
}

impl<T> Drop for ResourceListView<T> {
    fn drop(&mut self) {
        self.forwarder.cancel();
        self.poller.close();
    }
}

fn lock<V>(mutex: &Mutex<V>) -> std::sync::MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn restart_if_changed<R>(poller: &Poller<R>, descriptor: RequestDescriptor)
where
    R: DeserializeOwned + Send + Sync + 'static,
{
    if poller.is_running() && poller.snapshot().descriptor == descriptor {
        trace!(descriptor = %descriptor, "Poll session already current");
        return;
    }
    poller.start(descriptor);
}

fn page_sink<T>(paging: Arc<Mutex<Paging>>, processor: Option<PageProcessor<T>>) -> ResponseSink<ListResponse<T>>
where
    T: Send + Sync + 'static,
{
    Arc::new(move |descriptor: &RequestDescriptor, page: &mut ListResponse<T>| {
        if let Some(processor) = &processor {
            processor(page);
        }

        let mut paging = lock(&paging);
        if paging.descriptor() == *descriptor {
            paging.pager.on_page_fetched(page);
        } else {
            debug!(
                descriptor = %descriptor,
                token = %descriptor.continue_token(),
                current_page = paging.pager.current_page(),
                "Skipping page bookkeeping for a page no longer displayed"
            );
        }
    })
}

async fn forward_settled<R>(
    mut settled: watch::Receiver<RequestDescriptor>,
    poller: Arc<Poller<R>>,
    shutdown: CancellationToken,
) where
    R: DeserializeOwned + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            changed = settled.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        let descriptor = settled.borrow_and_update().clone();
        restart_if_changed(&poller, descriptor);
    }
}
