//! HTTP routes for context operations.
//!
//! Endpoints:
//!
//! - `GET  /`                                   Service info
//! - `GET  /health`                             Liveness plus embedder/store availability
//! - `GET  /context`                            List stored contexts
//! - `POST /context/initialize`                 Create a context packet
//! - `POST /context/relay`                      Apply a delta from one agent to another
//! - `POST /context/merge`                      Merge two or more contexts
//! - `POST /context/prune`                      Cut a context down to a budget
//! - `POST /context/version`                    Snapshot a context
//! - `GET  /context/{id}`                       Fetch a context
//! - `GET  /context/{id}/versions`              List snapshots
//! - `GET  /context/{id}/versions/{version_id}`  Fetch one snapshot
//! - `POST /context/{id}/similar`               Rank fragments against a query
//! - `POST /context/{id}/conflicts`             Conflict check for an ad-hoc fragment
//!
//! With test routes enabled:
//!
//! - `POST /test/embedding/availability`, `POST /test/store/availability`, `POST /test/clear`

use axum::{
    Router,
    extract::rejection::JsonRejection,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use contextrelay_core::broadcaster::BroadcasterStats;
use contextrelay_core::conflict::ConflictMatch;
use contextrelay_core::context::{ContextDelta, ContextPacket, VersionInfo, VersionSnapshot};
use contextrelay_core::fragment::Fragment;
use contextrelay_core::merge::{MergeConflict, MergeStrategy};
use contextrelay_core::prune::PruningStrategy;
use contextrelay_core::store::ContextSummary;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::ApiError;
use crate::service::{ContextService, InitializeInput, SimilarFragment};

// ── State ─────────────────────────────────────────────────────────────────

/// Shared state for every handler.
pub struct AppState {
    pub service: ContextService,
    /// Interval of SSE keep-alive comments.
    pub keepalive: Duration,
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(service: ContextService, keepalive: Duration) -> Self {
        Self {
            service,
            keepalive,
            start_time: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;

type ApiResult<T> = Result<T, ApiError>;

// ── Router ────────────────────────────────────────────────────────────────

/// Context and health routes.
pub fn context_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/context", get(list_contexts_handler))
        .route("/context/initialize", post(initialize_handler))
        .route("/context/relay", post(relay_handler))
        .route("/context/merge", post(merge_handler))
        .route("/context/prune", post(prune_handler))
        .route("/context/version", post(version_handler))
        .route("/context/{id}", get(get_context_handler))
        .route("/context/{id}/versions", get(list_versions_handler))
        .route(
            "/context/{id}/versions/{version_id}",
            get(get_version_handler),
        )
        .route("/context/{id}/similar", post(similar_handler))
        .route("/context/{id}/conflicts", post(conflicts_handler))
        .with_state(state)
}

/// Availability switches and a store reset, for integration tests.
pub fn test_router(state: SharedState) -> Router {
    Router::new()
        .route("/test/embedding/availability", post(embedding_availability_handler))
        .route("/test/store/availability", post(store_availability_handler))
        .route("/test/clear", post(clear_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct InitializeRequest {
    pub session_id: String,
    #[serde(default)]
    pub initial_input: Option<Value>,
    #[serde(default)]
    pub fragments: Vec<Fragment>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InitializeResponse {
    pub context_id: String,
    pub context_packet: ContextPacket,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelayRequest {
    pub from_agent: String,
    pub to_agent: String,
    pub context_id: String,
    #[serde(default)]
    pub delta: ContextDelta,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelayResponse {
    pub context_packet: ContextPacket,
    pub conflicts: Vec<String>,
    pub conflict_details: Vec<ConflictMatch>,
    pub accepted_fragment_ids: Vec<String>,
    pub rejected_fragment_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MergeRequest {
    pub context_ids: Vec<String>,
    #[serde(default = "default_merge_strategy")]
    pub merge_strategy: String,
    #[serde(default)]
    pub target_context_id: Option<String>,
}

fn default_merge_strategy() -> String {
    MergeStrategy::default().as_str().to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MergeResponse {
    pub merged_context: ContextPacket,
    pub conflict_report: Vec<MergeConflict>,
    pub created: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PruneRequest {
    pub context_id: String,
    pub pruning_strategy: String,
    pub budget: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PruneResponse {
    pub pruned_context: ContextPacket,
    pub removed_fragment_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionRequest {
    pub context_id: String,
    #[serde(default)]
    pub version_label: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version_id: String,
    pub version_info: VersionInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContextResponse {
    pub context_packet: ContextPacket,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContextListResponse {
    pub contexts: Vec<ContextSummary>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionListResponse {
    pub context_id: String,
    pub versions: Vec<VersionInfo>,
}

#[derive(Debug, Deserialize)]
pub struct SimilarRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SimilarResponse {
    pub context_id: String,
    pub results: Vec<SimilarFragment>,
}

#[derive(Debug, Deserialize)]
pub struct ConflictCheckRequest {
    pub fragment: Fragment,
    #[serde(default)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConflictCheckResponse {
    pub context_id: String,
    pub conflicts: Vec<ConflictMatch>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub name: String,
    pub available: bool,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: i64,
    embedding: ComponentStatus,
    embedding_dimensions: usize,
    store: ComponentStatus,
    events: BroadcasterStats,
}

#[derive(Debug, Serialize)]
struct RootResponse {
    service: &'static str,
    version: &'static str,
    docs: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AvailabilityRequest {
    pub available: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub cleared: bool,
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn root_handler() -> Json<RootResponse> {
    Json(RootResponse {
        service: "contextrelay",
        version: env!("CARGO_PKG_VERSION"),
        docs: "See GET /health, /context/* and /events/*",
    })
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    let service = &state.service;
    let embedding = ComponentStatus {
        name: service.embedder().name().to_string(),
        available: service.embedder().is_available(),
    };
    let store = ComponentStatus {
        name: service.store().name().to_string(),
        available: service.store().is_available(),
    };
    let status = if embedding.available && store.available {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (Utc::now() - state.start_time).num_seconds(),
        embedding_dimensions: service.embedder().dimensions(),
        embedding,
        store,
        events: service.events().stats(),
    })
}

async fn list_contexts_handler(
    State(state): State<SharedState>,
) -> ApiResult<Json<ContextListResponse>> {
    let contexts = state.service.list_contexts().await?;
    Ok(Json(ContextListResponse {
        count: contexts.len(),
        contexts,
    }))
}

/// `POST /context/initialize`
async fn initialize_handler(
    State(state): State<SharedState>,
    payload: Result<Json<InitializeRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<InitializeResponse>)> {
    let Json(req) = payload?;
    info!(session_id = %req.session_id, "context/initialize request");

    let packet = state
        .service
        .initialize(InitializeInput {
            session_id: req.session_id,
            initial_input: req.initial_input,
            fragments: req.fragments,
            metadata: req.metadata,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(InitializeResponse {
            context_id: packet.id.clone(),
            context_packet: packet,
        }),
    ))
}

/// `POST /context/relay`
async fn relay_handler(
    State(state): State<SharedState>,
    payload: Result<Json<RelayRequest>, JsonRejection>,
) -> ApiResult<Json<RelayResponse>> {
    let Json(req) = payload?;
    info!(
        context_id = %req.context_id,
        from = %req.from_agent,
        to = %req.to_agent,
        "context/relay request"
    );

    let outcome = state
        .service
        .relay(&req.from_agent, &req.to_agent, &req.context_id, req.delta)
        .await?;

    Ok(Json(RelayResponse {
        context_packet: outcome.context,
        conflicts: outcome.conflicts,
        conflict_details: outcome.conflict_details,
        accepted_fragment_ids: outcome.accepted_fragment_ids,
        rejected_fragment_ids: outcome.rejected_fragment_ids,
    }))
}

/// `POST /context/merge`
async fn merge_handler(
    State(state): State<SharedState>,
    payload: Result<Json<MergeRequest>, JsonRejection>,
) -> ApiResult<Json<MergeResponse>> {
    let Json(req) = payload?;
    let strategy: MergeStrategy = req.merge_strategy.parse().map_err(ApiError::bad_request)?;
    info!(sources = req.context_ids.len(), strategy = %strategy, "context/merge request");

    let result = state
        .service
        .merge(&req.context_ids, strategy, req.target_context_id.as_deref())
        .await?;

    Ok(Json(MergeResponse {
        merged_context: result.context,
        conflict_report: result.conflicts,
        created: result.created,
    }))
}

/// `POST /context/prune`
async fn prune_handler(
    State(state): State<SharedState>,
    payload: Result<Json<PruneRequest>, JsonRejection>,
) -> ApiResult<Json<PruneResponse>> {
    let Json(req) = payload?;
    let strategy: PruningStrategy = req.pruning_strategy.parse().map_err(ApiError::bad_request)?;
    let budget = usize::try_from(req.budget)
        .map_err(|_| ApiError::bad_request(format!("budget must be >= 0, got {}", req.budget)))?;
    info!(context_id = %req.context_id, strategy = %strategy, budget, "context/prune request");

    let outcome = state.service.prune(&req.context_id, strategy, budget).await?;
    Ok(Json(PruneResponse {
        pruned_context: outcome.context,
        removed_fragment_ids: outcome.removed_fragment_ids,
    }))
}

/// `POST /context/version`
async fn version_handler(
    State(state): State<SharedState>,
    payload: Result<Json<VersionRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<VersionResponse>)> {
    let Json(req) = payload?;
    let snapshot = state
        .service
        .create_version(&req.context_id, req.version_label)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(VersionResponse {
            version_id: snapshot.snapshot_id.clone(),
            version_info: VersionInfo::from(&snapshot),
        }),
    ))
}

async fn get_context_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ContextResponse>> {
    let packet = state.service.get_context(&id).await?;
    Ok(Json(ContextResponse {
        context_packet: packet,
    }))
}

async fn list_versions_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Json<VersionListResponse>> {
    let versions = state.service.list_versions(&id).await?;
    Ok(Json(VersionListResponse {
        context_id: id,
        versions,
    }))
}

async fn get_version_handler(
    State(state): State<SharedState>,
    Path((id, version_id)): Path<(String, String)>,
) -> ApiResult<Json<VersionSnapshot>> {
    Ok(Json(state.service.get_version(&id, &version_id).await?))
}

async fn similar_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    payload: Result<Json<SimilarRequest>, JsonRejection>,
) -> ApiResult<Json<SimilarResponse>> {
    let Json(req) = payload?;
    let results = state
        .service
        .find_similar(&id, &req.query, req.top_k, req.threshold)
        .await?;
    Ok(Json(SimilarResponse {
        context_id: id,
        results,
    }))
}

async fn conflicts_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    payload: Result<Json<ConflictCheckRequest>, JsonRejection>,
) -> ApiResult<Json<ConflictCheckResponse>> {
    let Json(req) = payload?;
    let conflicts = state
        .service
        .detect_conflicts(&id, req.fragment, req.threshold)
        .await?;
    Ok(Json(ConflictCheckResponse {
        context_id: id,
        count: conflicts.len(),
        conflicts,
    }))
}

// ── Test controls ─────────────────────────────────────────────────────────

async fn embedding_availability_handler(
    State(state): State<SharedState>,
    payload: Result<Json<AvailabilityRequest>, JsonRejection>,
) -> ApiResult<Json<ComponentStatus>> {
    let Json(req) = payload?;
    let embedder = state.service.embedder();
    if !embedder.set_available(req.available) {
        return Err(ApiError::bad_request(format!(
            "embedder '{}' cannot be switched",
            embedder.name()
        )));
    }
    info!(provider = %embedder.name(), available = req.available, "Embedding availability set");
    Ok(Json(ComponentStatus {
        name: embedder.name().to_string(),
        available: embedder.is_available(),
    }))
}

async fn store_availability_handler(
    State(state): State<SharedState>,
    payload: Result<Json<AvailabilityRequest>, JsonRejection>,
) -> ApiResult<Json<ComponentStatus>> {
    let Json(req) = payload?;
    let store = state.service.store();
    if !store.set_available(req.available) {
        return Err(ApiError::bad_request(format!(
            "store '{}' cannot be switched",
            store.name()
        )));
    }
    info!(backend = %store.name(), available = req.available, "Store availability set");
    Ok(Json(ComponentStatus {
        name: store.name().to_string(),
        available: store.is_available(),
    }))
}

async fn clear_handler(State(state): State<SharedState>) -> ApiResult<Json<ClearResponse>> {
    state
        .service
        .store()
        .clear()
        .await
        .map_err(contextrelay_core::Error::from)?;
    info!("Store cleared");
    Ok(Json(ClearResponse { cleared: true }))
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorResponse;
    use crate::service::ServiceSettings;
    use axum::body::Body;
    use axum::http::Request;
    use contextrelay_core::{BroadcasterConfig, EventBroadcaster};
    use contextrelay_providers::MockEmbedder;
    use contextrelay_store::InMemoryStore;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> SharedState {
        let service = ContextService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(MockEmbedder::new(32)),
            Arc::new(EventBroadcaster::new(BroadcasterConfig {
                throttle_per_second: 0,
                ..BroadcasterConfig::default()
            })),
            ServiceSettings::default(),
        );
        Arc::new(AppState::new(service, Duration::from_secs(30)))
    }

    fn app(state: SharedState) -> Router {
        context_router(state.clone()).merge(test_router(state))
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    async fn initialize(state: &SharedState, texts: &[&str]) -> ContextPacket {
        let fragments: Vec<Value> = texts
            .iter()
            .map(|t| serde_json::json!({ "content": t }))
            .collect();
        let response = app(state.clone())
            .oneshot(post(
                "/context/initialize",
                serde_json::json!({ "session_id": "s1", "fragments": fragments }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        json_body::<InitializeResponse>(response).await.context_packet
    }

    #[tokio::test]
    async fn health_reports_components() {
        let response = app(test_state()).oneshot(get_req("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: Value = json_body(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["embedding"]["name"], "mock");
        assert_eq!(json["store"]["name"], "memory");
        assert_eq!(json["embedding_dimensions"], 32);
    }

    #[tokio::test]
    async fn initialize_then_get() {
        let state = test_state();
        let packet = initialize(&state, &["The budget is $2000"]).await;
        assert_eq!(packet.version, 0);
        assert!(packet.fragments[0].has_embedding());

        let response = app(state)
            .oneshot(get_req(&format!("/context/{}", packet.id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: ContextResponse = json_body(response).await;
        assert_eq!(json.context_packet.id, packet.id);
    }

    #[tokio::test]
    async fn initialize_rejects_blank_session() {
        let response = app(test_state())
            .oneshot(post(
                "/context/initialize",
                serde_json::json!({ "session_id": "" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let err: ErrorResponse = json_body(response).await;
        assert_eq!(err.code, "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let request = Request::builder()
            .method("POST")
            .uri("/context/relay")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app(test_state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_context_is_not_found() {
        let response = app(test_state())
            .oneshot(get_req("/context/does-not-exist"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let err: ErrorResponse = json_body(response).await;
        assert_eq!(err.code, "NOT_FOUND");
    }

    #[tokio::test]
    async fn relay_reports_conflicts() {
        let state = test_state();
        let packet = initialize(&state, &["The budget is $2000"]).await;

        let response = app(state)
            .oneshot(post(
                "/context/relay",
                serde_json::json!({
                    "from_agent": "planner",
                    "to_agent": "coder",
                    "context_id": packet.id,
                    "delta": {
                        "new_fragments": [{ "fragment_id": "dup", "content": "The budget is $2000" }]
                    }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: RelayResponse = json_body(response).await;
        assert_eq!(json.context_packet.version, 1);
        assert!(json.conflicts.contains(&"dup".to_string()));
        assert_eq!(json.accepted_fragment_ids, vec!["dup".to_string()]);
    }

    #[tokio::test]
    async fn unknown_strategies_are_bad_requests() {
        let state = test_state();
        let packet = initialize(&state, &["a"]).await;

        let response = app(state.clone())
            .oneshot(post(
                "/context/prune",
                serde_json::json!({
                    "context_id": packet.id,
                    "pruning_strategy": "random",
                    "budget": 1
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app(state.clone())
            .oneshot(post(
                "/context/prune",
                serde_json::json!({
                    "context_id": packet.id,
                    "pruning_strategy": "recency",
                    "budget": -1
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app(state)
            .oneshot(post(
                "/context/merge",
                serde_json::json!({
                    "context_ids": [packet.id, packet.id],
                    "merge_strategy": "zip"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn merge_and_prune() {
        let state = test_state();
        let a = initialize(&state, &["alpha", "beta"]).await;
        let b = initialize(&state, &["gamma"]).await;

        let response = app(state.clone())
            .oneshot(post(
                "/context/merge",
                serde_json::json!({ "context_ids": [a.id, b.id] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let merged: MergeResponse = json_body(response).await;
        assert!(merged.created);
        assert_eq!(merged.merged_context.fragments.len(), 3);

        let response = app(state)
            .oneshot(post(
                "/context/prune",
                serde_json::json!({
                    "context_id": merged.merged_context.id,
                    "pruning_strategy": "importance_based",
                    "budget": 2
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let pruned: PruneResponse = json_body(response).await;
        assert_eq!(pruned.pruned_context.fragments.len(), 2);
        assert_eq!(pruned.removed_fragment_ids.len(), 1);
    }

    #[tokio::test]
    async fn version_lifecycle() {
        let state = test_state();
        let packet = initialize(&state, &["a"]).await;

        let response = app(state.clone())
            .oneshot(post(
                "/context/version",
                serde_json::json!({ "context_id": packet.id, "version_label": "v1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: VersionResponse = json_body(response).await;
        assert_eq!(created.version_info.version_number, 1);
        assert_eq!(created.version_info.label.as_deref(), Some("v1"));

        let response = app(state.clone())
            .oneshot(get_req(&format!("/context/{}/versions", packet.id)))
            .await
            .unwrap();
        let list: VersionListResponse = json_body(response).await;
        assert_eq!(list.versions.len(), 1);

        let response = app(state)
            .oneshot(get_req(&format!(
                "/context/{}/versions/{}",
                packet.id, created.version_id
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot: VersionSnapshot = json_body(response).await;
        assert_eq!(snapshot.fragments.len(), 1);
    }

    #[tokio::test]
    async fn similar_and_conflict_probes() {
        let state = test_state();
        let packet = initialize(&state, &["Ship on Friday", "The budget is $2000"]).await;

        let response = app(state.clone())
            .oneshot(post(
                &format!("/context/{}/similar", packet.id),
                serde_json::json!({ "query": "Ship on Friday", "top_k": 1 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: Value = json_body(response).await;
        assert_eq!(json["results"].as_array().unwrap().len(), 1);
        assert_eq!(json["results"][0]["fragment"]["content"], "Ship on Friday");

        let response = app(state)
            .oneshot(post(
                &format!("/context/{}/conflicts", packet.id),
                serde_json::json!({ "fragment": { "content": "The budget is $2000" } }),
            ))
            .await
            .unwrap();
        let json: ConflictCheckResponse = json_body(response).await;
        assert_eq!(json.count, 1);
    }

    #[tokio::test]
    async fn embedding_outage_maps_to_bad_gateway() {
        let state = test_state();
        let packet = initialize(&state, &["x"]).await;

        let response = app(state.clone())
            .oneshot(post(
                "/test/embedding/availability",
                serde_json::json!({ "available": false }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app(state.clone())
            .oneshot(get_req("/health"))
            .await
            .unwrap();
        let json: Value = json_body(response).await;
        assert_eq!(json["status"], "degraded");

        let response = app(state)
            .oneshot(post(
                &format!("/context/{}/similar", packet.id),
                serde_json::json!({ "query": "x" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn store_outage_maps_to_service_unavailable() {
        let state = test_state();
        let response = app(state.clone())
            .oneshot(post(
                "/test/store/availability",
                serde_json::json!({ "available": false }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app(state)
            .oneshot(post(
                "/context/initialize",
                serde_json::json!({ "session_id": "s" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let err: ErrorResponse = json_body(response).await;
        assert_eq!(err.code, "STORE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn clear_empties_store() {
        let state = test_state();
        initialize(&state, &["a"]).await;

        let response = app(state.clone())
            .oneshot(post("/test/clear", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app(state).oneshot(get_req("/context")).await.unwrap();
        let list: ContextListResponse = json_body(response).await;
        assert_eq!(list.count, 0);
    }
}
