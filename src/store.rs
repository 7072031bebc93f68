use crate::events::{EventBus, LogEvent};
use crate::types::{RequestRecord, WebhookSummary};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_LOG_CAPACITY: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("webhook id is required")]
    MissingWebhookId,
}

/// One webhook's history.
///
/// `order` is held from mutation through publish, so subscribers see a
/// webhook's events in the order the log applied them. `records` is released
/// before publishing, so callbacks may read the log. `order` is reentrant: a
/// callback may mutate its own webhook from the publishing thread. Callbacks
/// must not synchronously mutate a different webhook that could itself be
/// mutating this one on another thread.
#[derive(Default)]
struct Log {
    order: ReentrantMutex<()>,
    records: Mutex<VecDeque<RequestRecord>>,
}

/// In-memory request logs, one bounded FIFO per webhook id.
///
/// The id map lock only guards key lookup and creation; each log has its own
/// locks, so work on different webhooks never contends.
pub struct RequestLog {
    logs: RwLock<HashMap<String, Arc<Log>>>,
    capacity: usize,
    events: EventBus,
}

fn is_blank(webhook_id: &str) -> bool {
    webhook_id.trim().is_empty()
}

impl RequestLog {
    pub fn new(capacity: usize, events: EventBus) -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn existing(&self, webhook_id: &str) -> Option<Arc<Log>> {
        self.logs.read().get(webhook_id).cloned()
    }

    fn existing_or_create(&self, webhook_id: &str) -> Arc<Log> {
        if let Some(log) = self.existing(webhook_id) {
            return log;
        }
        self.logs
            .write()
            .entry(webhook_id.to_string())
            .or_default()
            .clone()
    }

    /// Append a record, evicting the oldest one once the log is full.
    pub fn append(
        &self,
        webhook_id: &str,
        record: RequestRecord,
    ) -> Result<RequestRecord, StoreError> {
        if is_blank(webhook_id) {
            warn!("cannot add request: no webhook id provided");
            return Err(StoreError::MissingWebhookId);
        }

        let log = self.existing_or_create(webhook_id);
        let _order = log.order.lock();
        let len = {
            let mut queue = log.records.lock();
            queue.push_back(record.clone());
            if queue.len() > self.capacity {
                queue.pop_front();
            }
            queue.len()
        };
        debug!(webhook_id, method = %record.method, len, "request appended");

        self.events.publish(&LogEvent::NewRequest {
            webhook_id: webhook_id.to_string(),
            request: record.clone(),
        });
        Ok(record)
    }

    /// Oldest-first copy of the log. Unknown ids yield an empty list and are
    /// not materialized.
    pub fn list(&self, webhook_id: &str) -> Vec<RequestRecord> {
        if is_blank(webhook_id) {
            return Vec::new();
        }
        self.existing(webhook_id)
            .map(|log| log.records.lock().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, webhook_id: &str) -> usize {
        self.existing(webhook_id)
            .map(|log| log.records.lock().len())
            .unwrap_or(0)
    }

    pub fn clear(&self, webhook_id: &str) {
        if is_blank(webhook_id) {
            warn!("cannot clear requests: no webhook id provided");
            return;
        }
        let Some(log) = self.existing(webhook_id) else {
            return;
        };
        let _order = log.order.lock();
        let removed = {
            let mut queue = log.records.lock();
            let removed = queue.len();
            queue.clear();
            removed
        };
        debug!(webhook_id, removed, "requests cleared");

        self.events.publish(&LogEvent::ClearRequests {
            webhook_id: webhook_id.to_string(),
        });
    }

    /// Remove the record at `index`. Indices outside the log are ignored.
    pub fn delete_at(&self, webhook_id: &str, index: usize) {
        if is_blank(webhook_id) {
            warn!("cannot delete request: no webhook id provided");
            return;
        }
        let Some(log) = self.existing(webhook_id) else {
            return;
        };
        let _order = log.order.lock();
        let removed = log.records.lock().remove(index).is_some();
        if !removed {
            debug!(webhook_id, index, "delete index out of range, ignored");
            return;
        }

        self.events.publish(&LogEvent::DeleteRequest {
            webhook_id: webhook_id.to_string(),
            index,
        });
    }

    /// Ids with a materialized log, sorted.
    pub fn webhook_ids(&self) -> Vec<WebhookSummary> {
        let logs: Vec<(String, Arc<Log>)> = self
            .logs
            .read()
            .iter()
            .map(|(id, log)| (id.clone(), log.clone()))
            .collect();

        let mut items: Vec<WebhookSummary> = logs
            .into_iter()
            .map(|(webhook_id, log)| WebhookSummary {
                webhook_id,
                request_count: log.records.lock().len(),
            })
            .collect();
        items.sort_by(|a, b| a.webhook_id.cmp(&b.webhook_id));
        items
    }
}
