//! Event endpoints: the SSE relay stream and its history/introspection routes.
//!
//! - `GET /events/relay?event_types=a,b&client_id=x`  SSE stream
//! - `GET /events/types`                             Known event types
//! - `GET /events/history`                           Retained events
//! - `GET /events/stats`                             Broadcaster counters

use axum::{
    Router,
    extract::rejection::QueryRejection,
    extract::{Query, State},
    http::HeaderMap,
    response::Json,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::get,
};
use chrono::{DateTime, Utc};
use contextrelay_core::broadcaster::{BroadcasterStats, SubscriptionId, SubscriptionInfo};
use contextrelay_core::event::{EventType, RelayEvent};
use contextrelay_core::EventBroadcaster;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::routes::SharedState;

const DEFAULT_HISTORY_LIMIT: usize = 100;
const MAX_HISTORY_LIMIT: usize = 1000;

pub fn events_router(state: SharedState) -> Router {
    Router::new()
        .route("/events/relay", get(relay_stream_handler))
        .route("/events/types", get(event_types_handler))
        .route("/events/history", get(history_handler))
        .route("/events/stats", get(stats_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub event_types: Option<String>,
    pub client_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub event_type: Option<String>,
    pub limit: Option<usize>,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub events: Vec<RelayEvent>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventTypesResponse {
    pub event_types: Vec<String>,
    pub visualization_types: Vec<String>,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    broadcaster: BroadcasterStats,
    subscriptions: Vec<SubscriptionInfo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectedData {
    subscription_id: SubscriptionId,
    client_id: String,
    event_types: Vec<EventType>,
    timestamp: DateTime<Utc>,
}

// ── SSE Stream ────────────────────────────────────────────────────────────

/// Live events of one subscription.
///
/// Dropping the stream removes the subscription, which is what happens when
/// the SSE client disconnects.
struct SubscriptionStream {
    inner: ReceiverStream<Arc<RelayEvent>>,
    events: Arc<EventBroadcaster>,
    id: SubscriptionId,
}

impl Stream for SubscriptionStream {
    type Item = Arc<RelayEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        self.events.unsubscribe(self.id);
    }
}

/// An event followed by its `viz:<type>` companion.
fn sse_pair(event: &RelayEvent) -> [SseEvent; 2] {
    let data = serde_json::to_string(event).unwrap_or_default();
    let viz = serde_json::to_string(&event.visualization()).unwrap_or_default();
    [
        SseEvent::default()
            .id(event.id.to_string())
            .event(event.event_type.as_str())
            .data(data),
        SseEvent::default()
            .event(event.visualization_name())
            .data(viz),
    ]
}

/// `GET /events/relay`: live relay events.
///
/// The stream opens with a `connected` event. A `Last-Event-ID` header
/// replays retained events newer than that id before live delivery starts.
async fn relay_stream_handler(
    State(state): State<SharedState>,
    query: Result<Query<StreamQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let Query(query) = query?;
    let types = EventType::parse_list(query.event_types.as_deref().unwrap_or(""))
        .map_err(ApiError::bad_request)?;
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let events = state.service.events().clone();
    let (subscription, replay) = events.subscribe_after(query.client_id, Some(types), last_event_id);

    let mut event_types: Vec<EventType> = subscription.event_types.iter().copied().collect();
    event_types.sort();
    info!(
        subscription = subscription.id,
        client = %subscription.client_id,
        replayed = replay.len(),
        "SSE client connected"
    );

    let connected = ConnectedData {
        subscription_id: subscription.id,
        client_id: subscription.client_id.clone(),
        event_types,
        timestamp: Utc::now(),
    };
    let connected = SseEvent::default()
        .event("connected")
        .data(serde_json::to_string(&connected).unwrap_or_default());

    let live = SubscriptionStream {
        inner: ReceiverStream::new(subscription.receiver),
        events,
        id: subscription.id,
    };

    let relayed = futures::stream::iter(replay)
        .chain(live)
        .flat_map(|event| futures::stream::iter(sse_pair(&event)));

    let stream = futures::stream::once(async move { connected })
        .chain(relayed)
        .map(Ok::<_, Infallible>);

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keepalive)))
}

// ── Introspection ─────────────────────────────────────────────────────────

async fn event_types_handler(State(state): State<SharedState>) -> Json<EventTypesResponse> {
    let types = state.service.events().event_types();
    Json(EventTypesResponse {
        event_types: types.iter().map(|t| t.as_str().to_string()).collect(),
        visualization_types: types.iter().map(|t| format!("viz:{t}")).collect(),
    })
}

/// `GET /events/history?event_type&limit&since`
async fn history_handler(
    State(state): State<SharedState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let Query(query) = query?;

    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
        return Err(ApiError::bad_request(format!(
            "limit must be between 1 and {MAX_HISTORY_LIMIT}, got {limit}"
        )));
    }
    let event_type = query
        .event_type
        .as_deref()
        .map(str::parse::<EventType>)
        .transpose()
        .map_err(ApiError::bad_request)?;

    let events = state.service.events().history(event_type, limit, query.since);
    debug!(count = events.len(), "Event history served");
    Ok(Json(HistoryResponse {
        count: events.len(),
        events,
    }))
}

async fn stats_handler(State(state): State<SharedState>) -> Json<StatsResponse> {
    let events = state.service.events();
    events.cleanup_closed();
    Json(StatsResponse {
        broadcaster: events.stats(),
        subscriptions: events.subscriptions(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────
