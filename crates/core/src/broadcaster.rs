//! In-process fan-out of relay events to long-lived subscribers.
//!
//! Delivery is best-effort and at-most-once: each subscriber owns a bounded
//! queue and an event is dropped for a subscriber whose queue is full.
//! Publishing is additionally throttled per event type over a sliding
//! one-second window, and accepted events are kept in a bounded history
//! ring for `Last-Event-ID` replay and the history endpoint.

use crate::event::{EventPayload, EventType, RelayEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Tunables for [`EventBroadcaster`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcasterConfig {
    /// Maximum number of events kept for replay.
    pub history_size: usize,
    /// Maximum events per type per second. 0 disables throttling.
    pub throttle_per_second: usize,
    /// Queue length of each subscriber.
    pub subscriber_buffer: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            history_size: 1000,
            throttle_per_second: 10,
            subscriber_buffer: 100,
        }
    }
}

pub type SubscriptionId = u64;

/// A live subscription. Dropping the receiver ends it; the slot is reaped on
/// the next publish.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub client_id: String,
    pub event_types: HashSet<EventType>,
    pub receiver: mpsc::Receiver<Arc<RelayEvent>>,
}

/// Result of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered {
        event_id: u64,
        recipients: usize,
        dropped: usize,
    },
    Throttled,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub client_id: String,
    pub event_types: Vec<EventType>,
    pub connected_at: DateTime<Utc>,
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcasterStats {
    pub active_subscribers: usize,
    pub total_published: u64,
    pub total_delivered: u64,
    pub total_dropped: u64,
    pub total_throttled: u64,
    pub history_len: usize,
    pub last_event_id: Option<u64>,
    pub events_by_type: BTreeMap<String, u64>,
}

struct Slot {
    client_id: String,
    event_types: HashSet<EventType>,
    sender: mpsc::Sender<Arc<RelayEvent>>,
    connected_at: DateTime<Utc>,
    delivered: u64,
    dropped: u64,
}

#[derive(Default)]
struct State {
    next_subscription: SubscriptionId,
    last_event_id: u64,
    subscribers: HashMap<SubscriptionId, Slot>,
    history: VecDeque<Arc<RelayEvent>>,
    recent: HashMap<EventType, VecDeque<Instant>>,
    stats: BroadcasterStats,
}

/// Pub/sub hub shared by the HTTP layer and the context service.
///
/// Thread-safe via `std::sync::Mutex`; the lock is never held across an
/// await point and delivery uses `try_send`.
pub struct EventBroadcaster {
    config: BroadcasterConfig,
    state: Mutex<State>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(BroadcasterConfig::default())
    }
}

impl EventBroadcaster {
    pub fn new(config: BroadcasterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    pub fn config(&self) -> BroadcasterConfig {
        self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to `types` (all types when `None`).
    pub fn subscribe(
        &self,
        client_id: Option<String>,
        types: Option<HashSet<EventType>>,
    ) -> Subscription {
        self.subscribe_after(client_id, types, None).0
    }

    /// Subscribe and, in the same critical section, collect the retained
    /// events newer than `after` that match the subscription. Nothing is
    /// both replayed and delivered live.
    pub fn subscribe_after(
        &self,
        client_id: Option<String>,
        types: Option<HashSet<EventType>>,
        after: Option<u64>,
    ) -> (Subscription, Vec<Arc<RelayEvent>>) {
        let event_types = types
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| EventType::ALL.into_iter().collect());
        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer.max(1));

        let mut state = self.lock();
        state.next_subscription += 1;
        let id = state.next_subscription;
        let client_id = client_id.unwrap_or_else(|| format!("client-{id}"));

        let replay = match after {
            Some(last) => state
                .history
                .iter()
                .filter(|e| e.id > last && event_types.contains(&e.event_type))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        state.subscribers.insert(
            id,
            Slot {
                client_id: client_id.clone(),
                event_types: event_types.clone(),
                sender: tx,
                connected_at: Utc::now(),
                delivered: 0,
                dropped: 0,
            },
        );
        debug!(subscription = id, client = %client_id, "Subscriber added");

        (
            Subscription {
                id,
                client_id,
                event_types,
                receiver: rx,
            },
            replay,
        )
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.lock().subscribers.remove(&id).is_some();
        if removed {
            debug!(subscription = id, "Subscriber removed");
        }
        removed
    }

    /// Publish a typed payload.
    pub fn publish(&self, payload: EventPayload) -> PublishOutcome {
        let event_type = payload.event_type();
        self.publish_raw(event_type, payload.into_data())
    }

    /// Publish an already-shaped payload.
    pub fn publish_raw(&self, event_type: EventType, data: serde_json::Value) -> PublishOutcome {
        let mut state = self.lock();

        if self.is_throttled(&mut state, event_type) {
            state.stats.total_throttled += 1;
            warn!(event_type = %event_type, "Event throttled");
            return PublishOutcome::Throttled;
        }

        state.last_event_id += 1;
        let event = Arc::new(RelayEvent {
            id: state.last_event_id,
            event_type,
            timestamp: Utc::now(),
            data,
        });

        if self.config.history_size > 0 {
            while state.history.len() >= self.config.history_size {
                state.history.pop_front();
            }
            state.history.push_back(event.clone());
        }

        let mut recipients = 0;
        let mut dropped = 0;
        let mut closed = Vec::new();

        for (id, slot) in state.subscribers.iter_mut() {
            if !slot.event_types.contains(&event_type) {
                continue;
            }
            match slot.sender.try_send(event.clone()) {
                Ok(()) => {
                    slot.delivered += 1;
                    recipients += 1;
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    slot.dropped += 1;
                    dropped += 1;
                    warn!(client = %slot.client_id, event_id = event.id, "Subscriber queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            state.subscribers.remove(&id);
            debug!(subscription = id, "Reaped closed subscriber");
        }

        state.stats.total_published += 1;
        state.stats.total_delivered += recipients as u64;
        state.stats.total_dropped += dropped as u64;
        *state
            .stats
            .events_by_type
            .entry(event_type.to_string())
            .or_insert(0) += 1;

        PublishOutcome::Delivered {
            event_id: event.id,
            recipients,
            dropped,
        }
    }

    fn is_throttled(&self, state: &mut State, event_type: EventType) -> bool {
        let limit = self.config.throttle_per_second;
        if limit == 0 {
            return false;
        }
        let now = Instant::now();
        let window = state.recent.entry(event_type).or_default();
        while window
            .front()
            .is_some_and(|t| now.duration_since(*t) >= Duration::from_secs(1))
        {
            window.pop_front();
        }
        if window.len() >= limit {
            return true;
        }
        window.push_back(now);
        false
    }

    /// The most recent `limit` retained events, oldest first, optionally
    /// filtered by type and by a lower timestamp bound.
    pub fn history(
        &self,
        event_type: Option<EventType>,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Vec<RelayEvent> {
        let state = self.lock();
        let mut matching: Vec<RelayEvent> = state
            .history
            .iter()
            .rev()
            .filter(|e| event_type.is_none_or(|t| e.event_type == t))
            .filter(|e| since.is_none_or(|s| e.timestamp >= s))
            .take(limit)
            .map(|e| (**e).clone())
            .collect();
        matching.reverse();
        matching
    }

    /// Retained events with an id greater than `last_id`.
    pub fn events_after(&self, last_id: u64, types: &HashSet<EventType>) -> Vec<Arc<RelayEvent>> {
        self.lock()
            .history
            .iter()
            .filter(|e| e.id > last_id && types.contains(&e.event_type))
            .cloned()
            .collect()
    }

    /// Drop slots whose receivers are gone. Returns how many were removed.
    pub fn cleanup_closed(&self) -> usize {
        let mut state = self.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|_, slot| !slot.sender.is_closed());
        before - state.subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let state = self.lock();
        let mut infos: Vec<SubscriptionInfo> = state
            .subscribers
            .iter()
            .map(|(id, slot)| {
                let mut event_types: Vec<EventType> = slot.event_types.iter().copied().collect();
                event_types.sort();
                SubscriptionInfo {
                    id: *id,
                    client_id: slot.client_id.clone(),
                    event_types,
                    connected_at: slot.connected_at,
                    delivered: slot.delivered,
                    dropped: slot.dropped,
                }
            })
            .collect();
        infos.sort_by_key(|i| i.id);
        infos
    }

    pub fn stats(&self) -> BroadcasterStats {
        let state = self.lock();
        let mut stats = state.stats.clone();
        stats.active_subscribers = state.subscribers.len();
        stats.history_len = state.history.len();
        stats.last_event_id = (state.last_event_id > 0).then_some(state.last_event_id);
        stats
    }

    pub fn event_types(&self) -> &'static [EventType] {
        &EventType::ALL
    }
}
