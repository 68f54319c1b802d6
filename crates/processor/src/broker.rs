//! Fan-out of finalized window results to live subscribers
//!
//! Every subscription owns a bounded channel. Publishing never waits: a
//! subscriber whose backlog is full is dropped on the spot, and one whose
//! receiver is gone is removed. A slow consumer can therefore never stall
//! ingestion or other subscribers.

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use playback_types::{WindowResult, WindowType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::config::SubscriptionConfig;
use crate::error::SubscriptionError;
use crate::metrics::EngineMetrics;

/// Identifier of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Which results a subscriber wants; `None` matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    pub content_id: Option<String>,
    pub window_type: Option<WindowType>,
}

impl SubscriptionFilter {
    pub fn new(content_id: Option<String>, window_type: Option<WindowType>) -> Self {
        Self {
            content_id,
            window_type,
        }
    }

    pub fn matches(&self, result: &WindowResult) -> bool {
        self.content_id
            .as_deref()
            .map_or(true, |content| content == result.content_id)
            && self.window_type.map_or(true, |wt| wt == result.window_type)
    }
}

/// Why the broker ended a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// The subscriber fell `backlog_limit` results behind
    BacklogOverflow,
    /// The receiving side went away
    Disconnected,
    /// Removed through [`SubscriptionBroker::unsubscribe`]
    Unsubscribed,
}

/// Drop reason shared between a subscription and its broker entry
#[derive(Debug, Clone, Default)]
struct DropReasonHandle(Arc<Mutex<Option<DropReason>>>);

impl DropReasonHandle {
    fn get(&self) -> Option<DropReason> {
        *self.0.lock()
    }

    fn set(&self, reason: DropReason) {
        let mut guard = self.0.lock();
        if guard.is_none() {
            *guard = Some(reason);
        }
    }
}

/// Receiving side of a subscription
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::Receiver<Arc<WindowResult>>,
    drop_reason: DropReasonHandle,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next result; `None` once the broker dropped the subscription and the
    /// backlog is drained
    pub async fn recv(&mut self) -> Option<Arc<WindowResult>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Arc<WindowResult>, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn drop_reason(&self) -> Option<DropReason> {
        self.drop_reason.get()
    }

    pub fn into_stream(self) -> ReceiverStream<Arc<WindowResult>> {
        ReceiverStream::new(self.receiver)
    }
}

struct Subscriber {
    filter: SubscriptionFilter,
    sender: mpsc::Sender<Arc<WindowResult>>,
    drop_reason: DropReasonHandle,
}

/// Outcome of one publish call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped_overflow: usize,
    pub removed_disconnected: usize,
}

/// Registry of live subscriptions
pub struct SubscriptionBroker {
    config: SubscriptionConfig,
    subscribers: DashMap<SubscriptionId, Subscriber>,
    by_content: DashMap<String, BTreeSet<SubscriptionId>>,
    wildcard: DashSet<SubscriptionId>,
    next_id: AtomicU64,
    metrics: EngineMetrics,
}

impl SubscriptionBroker {
    pub fn new(config: SubscriptionConfig, metrics: EngineMetrics) -> Self {
        Self {
            config,
            subscribers: DashMap::new(),
            by_content: DashMap::new(),
            wildcard: DashSet::new(),
            next_id: AtomicU64::new(1),
            metrics,
        }
    }

    pub fn subscribe(&self, filter: SubscriptionFilter) -> Result<Subscription, SubscriptionError> {
        if self.subscribers.len() >= self.config.max_subscribers {
            return Err(SubscriptionError::LimitReached {
                max: self.config.max_subscribers,
            });
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.config.backlog_limit);
        let drop_reason = DropReasonHandle::default();

        match &filter.content_id {
            Some(content_id) => {
                self.by_content.entry(content_id.clone()).or_default().insert(id);
            }
            None => {
                self.wildcard.insert(id);
            }
        }
        info!(
            subscription = %id,
            content_id = ?filter.content_id,
            window_type = ?filter.window_type,
            "Subscriber registered"
        );
        self.subscribers.insert(
            id,
            Subscriber {
                filter,
                sender,
                drop_reason: drop_reason.clone(),
            },
        );
        self.metrics.active_subscriptions.set(self.subscribers.len() as i64);

        Ok(Subscription {
            id,
            receiver,
            drop_reason,
        })
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.remove(id, DropReason::Unsubscribed)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    fn remove(&self, id: SubscriptionId, reason: DropReason) -> bool {
        let Some((_, subscriber)) = self.subscribers.remove(&id) else {
            return false;
        };
        subscriber.drop_reason.set(reason);
        match &subscriber.filter.content_id {
            Some(content_id) => {
                let now_empty = match self.by_content.get_mut(content_id) {
                    Some(mut ids) => {
                        ids.remove(&id);
                        ids.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.by_content.remove_if(content_id, |_, ids| ids.is_empty());
                }
            }
            None => {
                self.wildcard.remove(&id);
            }
        }
        self.metrics.active_subscriptions.set(self.subscribers.len() as i64);
        debug!(subscription = %id, reason = ?reason, "Subscription removed");
        true
    }

    fn candidates(&self, content_id: &str) -> Vec<SubscriptionId> {
        let mut ids: Vec<SubscriptionId> = self
            .by_content
            .get(content_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        ids.extend(self.wildcard.iter().map(|id| *id));
        ids
    }

    /// Offer one result to every matching subscriber without waiting
    pub fn publish(&self, result: &WindowResult) -> PublishReport {
        let mut report = PublishReport::default();
        let shared = Arc::new(result.clone());
        let mut overflowed = Vec::new();
        let mut disconnected = Vec::new();

        for id in self.candidates(&result.content_id) {
            let Some(subscriber) = self.subscribers.get(&id) else {
                continue;
            };
            if !subscriber.filter.matches(result) {
                continue;
            }
            match subscriber.sender.try_send(Arc::clone(&shared)) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => overflowed.push(id),
                Err(TrySendError::Closed(_)) => disconnected.push(id),
            }
        }

        for id in overflowed {
            if self.remove(id, DropReason::BacklogOverflow) {
                warn!(
                    subscription = %id,
                    backlog_limit = self.config.backlog_limit,
                    "Dropping subscriber that overflowed its backlog"
                );
                self.metrics.subscribers_dropped.inc();
                report.dropped_overflow += 1;
            }
        }
        for id in disconnected {
            if self.remove(id, DropReason::Disconnected) {
                report.removed_disconnected += 1;
            }
        }

        self.metrics.results_published.inc_by(report.delivered as u64);
        report
    }

    /// Remove every subscription whose receiver has gone away
    pub fn prune_disconnected(&self) -> usize {
        let closed: Vec<SubscriptionId> = self
            .subscribers
            .iter()
            .filter(|entry| entry.value().sender.is_closed())
            .map(|entry| *entry.key())
            .collect();
        closed
            .into_iter()
            .filter(|id| self.remove(*id, DropReason::Disconnected))
            .count()
    }
}
