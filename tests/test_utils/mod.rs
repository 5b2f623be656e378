//! Test utilities for exercising pollers without a network.
//!
//! [`MockTransport`] serves scripted replies per descriptor after a virtual
//! delay, records every call, and honors cancellation unless told otherwise.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fleetsync::error::FetchError;
use fleetsync::query::RequestDescriptor;
use fleetsync::transport::Transport;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// One scripted reply.
#[derive(Debug, Clone)]
pub struct Reply {
    body: Result<Value, (u16, String)>,
    delay: Duration,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Self {
            body: Ok(body),
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            body: Err((status, body.to_string())),
            delay: Duration::ZERO,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A recorded request.
#[derive(Debug, Clone)]
pub struct Call {
    pub descriptor: RequestDescriptor,
    pub at: Instant,
}

/// Scripted [`Transport`].
///
/// Replies queued for a descriptor are served in order; the last one repeats.
/// Descriptors without a script get the fallback reply, or a 404.
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    fallback: Mutex<Option<Reply>>,
    calls: Mutex<Vec<Call>>,
    cancelled: AtomicUsize,
    ignore_cancellation: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            cancelled: AtomicUsize::new(0),
            ignore_cancellation: false,
        }
    }

    /// Transport that keeps running aborted requests to completion, so late
    /// responses reach the poller.
    pub fn ignoring_cancellation() -> Self {
        Self {
            ignore_cancellation: true,
            ..Self::new()
        }
    }

    pub fn respond(&self, descriptor: &str, reply: Reply) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(descriptor.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn fallback(&self, reply: Reply) -> &Self {
        *self.fallback.lock().unwrap() = Some(reply);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn requested(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|call| call.descriptor.to_string())
            .collect()
    }

    pub fn cancelled_count(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn next_reply(&self, descriptor: &RequestDescriptor) -> Reply {
        let mut scripts = self.scripts.lock().unwrap();
        if let Some(queue) = scripts.get_mut(descriptor.as_str()) {
            if queue.len() > 1 {
                if let Some(reply) = queue.pop_front() {
                    return reply;
                }
            }
            if let Some(reply) = queue.front() {
                return reply.clone();
            }
        }
        self.fallback
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Reply::status(404, r#"{"message":""}"#))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Value, FetchError> {
        self.calls.lock().unwrap().push(Call {
            descriptor: descriptor.clone(),
            at: Instant::now(),
        });
        let reply = self.next_reply(descriptor);

        if self.ignore_cancellation {
            sleep(reply.delay).await;
        } else {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.cancelled.fetch_add(1, Ordering::SeqCst);
                    return Err(FetchError::Cancelled);
                }
                _ = sleep(reply.delay) => {}
            }
        }

        match reply.body {
            Ok(body) => Ok(body),
            Err((status, body)) => Err(FetchError::from_status(
                StatusCode::from_u16(status).unwrap(),
                &body,
            )),
        }
    }
}

/// List body with `count` items named `<prefix>-<n>`.
pub fn page(prefix: &str, count: usize, next: Option<&str>, remaining: Option<u64>) -> Value {
    let items: Vec<Value> = (1..=count)
        .map(|n| json!({ "metadata": { "name": format!("{prefix}-{n}") } }))
        .collect();

    let mut metadata = serde_json::Map::new();
    if let Some(next) = next {
        metadata.insert("continue".into(), json!(next));
    }
    if let Some(remaining) = remaining {
        metadata.insert("remainingItemCount".into(), json!(remaining));
    }
    json!({ "items": items, "metadata": metadata })
}

/// Names of the items in a list body.
pub fn item_names(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| item["metadata"]["name"].as_str().map(str::to_string))
        .collect()
}

/// Let spawned tasks run without advancing the clock.
pub async fn settle_tasks() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
