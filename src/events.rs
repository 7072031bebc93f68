//! Per-webhook publish/subscribe registry for request log mutations.
//!
//! Delivery is synchronous and best effort: an event published while nobody
//! is subscribed to its webhook is dropped.

use crate::types::RequestRecord;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_MAX_SUBSCRIBERS: usize = 50;

/// A mutation of one webhook's request log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LogEvent {
    #[serde(rename_all = "camelCase")]
    NewRequest {
        webhook_id: String,
        request: RequestRecord,
    },
    #[serde(rename_all = "camelCase")]
    ClearRequests { webhook_id: String },
    #[serde(rename_all = "camelCase")]
    DeleteRequest { webhook_id: String, index: usize },
}

impl LogEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewRequest { .. } => "new-request",
            Self::ClearRequests { .. } => "clear-requests",
            Self::DeleteRequest { .. } => "delete-request",
        }
    }

    pub fn webhook_id(&self) -> &str {
        match self {
            Self::NewRequest { webhook_id, .. }
            | Self::ClearRequests { webhook_id }
            | Self::DeleteRequest { webhook_id, .. } => webhook_id,
        }
    }
}

pub type Callback = Arc<dyn Fn(&LogEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventBusError {
    #[error("webhook {webhook_id} already has {limit} subscribers")]
    TooManySubscribers { webhook_id: String, limit: usize },
}

struct Listener {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Callback,
}

struct Registry {
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
    next_id: AtomicU64,
    max_per_webhook: usize,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Listener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, webhook_id: &str, id: u64) {
        let mut listeners = self.lock();
        if let Some(entries) = listeners.get_mut(webhook_id) {
            entries.retain(|l| l.id != id);
            if entries.is_empty() {
                listeners.remove(webhook_id);
            }
        }
    }
}

/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SUBSCRIBERS)
    }
}

impl EventBus {
    pub fn new(max_per_webhook: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                max_per_webhook,
            }),
        }
    }

    /// Register `callback` for events of `webhook_id`. The returned handle
    /// unsubscribes when dropped.
    pub fn subscribe<F>(&self, webhook_id: &str, callback: F) -> Result<Subscription, EventBusError>
    where
        F: Fn(&LogEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut listeners = self.registry.lock();
        let entries = listeners.entry(webhook_id.to_string()).or_default();
        if entries.len() >= self.registry.max_per_webhook {
            return Err(EventBusError::TooManySubscribers {
                webhook_id: webhook_id.to_string(),
                limit: self.registry.max_per_webhook,
            });
        }

        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        entries.push(Listener {
            id,
            active: active.clone(),
            callback: Arc::new(callback),
        });
        debug!(webhook_id, subscriber = id, "event subscriber added");

        Ok(Subscription {
            registry: Arc::downgrade(&self.registry),
            webhook_id: webhook_id.to_string(),
            id,
            active,
        })
    }

    /// Deliver `event` to every subscriber of its webhook, in subscription
    /// order. Returns how many callbacks completed without error.
    pub fn publish(&self, event: &LogEvent) -> usize {
        let webhook_id = event.webhook_id();
        // Snapshot under the lock, call outside it so callbacks may re-enter.
        let callbacks: Vec<(Arc<AtomicBool>, Callback)> = self
            .registry
            .lock()
            .get(webhook_id)
            .map(|entries| {
                entries
                    .iter()
                    .map(|l| (l.active.clone(), l.callback.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let mut delivered = 0;
        for (position, (active, callback)) in callbacks.iter().enumerate() {
            if !active.load(Ordering::Acquire) {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(error)) => warn!(
                    webhook_id,
                    kind = event.kind(),
                    position,
                    reason = %error,
                    "event subscriber failed"
                ),
                Err(_) => warn!(
                    webhook_id,
                    kind = event.kind(),
                    position,
                    "event subscriber panicked"
                ),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, webhook_id: &str) -> usize {
        self.registry
            .lock()
            .get(webhook_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// Handle for one registered callback.
pub struct Subscription {
    registry: Weak<Registry>,
    webhook_id: String,
    id: u64,
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// Remove the callback. Later calls are no-ops.
    ///
    /// Once this returns the callback is not invoked again, including by a
    /// publish already in flight on another thread. An invocation that has
    /// already started runs to completion.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.webhook_id, self.id);
            debug!(webhook_id = %self.webhook_id, subscriber = self.id, "event subscriber removed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
