//! HTTP gateway for the context relay.
//!
//! Exposes the context operations of [`service::ContextService`] as REST
//! endpoints and relay events as a server-sent event stream.
//!
//! Built on Axum. Everything the handlers touch is injected through
//! [`routes::AppState`]; nothing is process-global.

pub mod error;
pub mod events;
pub mod routes;
pub mod service;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use contextrelay_config::{AppConfig, GatewayConfig};
use contextrelay_core::{BroadcasterConfig, EventBroadcaster};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

pub use routes::{AppState, SharedState};
pub use service::{ContextService, ServiceSettings};

/// Build the full router: context routes, event routes and, when enabled,
/// the test controls.
///
/// Layers applied:
/// - CORS (configured origins, or any origin when none are configured)
/// - Request body size limit
/// - HTTP trace logging
pub fn build_router(state: SharedState, config: &GatewayConfig) -> Router {
    let mut app = routes::context_router(state.clone()).merge(events::events_router(state.clone()));
    if config.enable_test_routes {
        warn!("Test routes enabled under /test");
        app = app.merge(routes::test_router(state));
    }

    app.layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(cors_layer(&config.cors_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::HeaderName::from_static("last-event-id")])
        .max_age(Duration::from_secs(3600));

    if parsed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}

/// Wire store, embedder and broadcaster from configuration.
pub async fn build_state(config: &AppConfig) -> Result<SharedState, Box<dyn std::error::Error>> {
    let store = contextrelay_store::build_from_config(&config.store).await?;
    let embedder = contextrelay_providers::build_from_config(&config.embedding);
    let events = Arc::new(EventBroadcaster::new(BroadcasterConfig {
        history_size: config.events.history_size,
        throttle_per_second: config.events.throttle_per_second,
        subscriber_buffer: config.events.subscriber_buffer,
    }));

    info!(
        store = %store.name(),
        embedder = %embedder.name(),
        dimensions = embedder.dimensions(),
        "Context service assembled"
    );

    let service = ContextService::new(store, embedder, events, ServiceSettings::from_config(config));
    Ok(Arc::new(AppState::new(
        service,
        Duration::from_secs(config.events.keepalive_secs.max(1)),
    )))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let state = build_state(&config).await?;
    let app = build_router(state, &config.gateway);

    info!(addr = %addr, "Context relay gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn router(enable_test_routes: bool) -> Router {
        let config = AppConfig::default();
        let state = build_state(&config).await.unwrap();
        build_router(
            state,
            &GatewayConfig {
                enable_test_routes,
                ..GatewayConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_routes_are_opt_in() {
        let request = || {
            Request::builder()
                .method("POST")
                .uri("/test/clear")
                .body(Body::empty())
                .unwrap()
        };

        let response = router(false).await.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router(true).await.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let config = AppConfig::default();
        let state = build_state(&config).await.unwrap();
        let app = build_router(
            state,
            &GatewayConfig {
                max_body_bytes: 64,
                ..GatewayConfig::default()
            },
        );

        let body = serde_json::json!({ "session_id": "x".repeat(256) }).to_string();
        let request = Request::builder()
            .method("POST")
            .uri("/context/initialize")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn cors_allows_any_origin_by_default() {
        let request = Request::builder()
            .uri("/health")
            .header("origin", "http://localhost:3000")
            .body(Body::empty())
            .unwrap();
        let response = router(false).await.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }
}
