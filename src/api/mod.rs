pub mod error;
pub mod health;
pub mod hub;
pub mod response;
pub mod v1;
pub mod ws;

use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::Config;
use crate::session::SessionHandle;

pub use hub::{spawn_event_pump, TelemetryHub};

#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub hub: Arc<TelemetryHub>,
}

impl AppState {
    pub fn new(session: SessionHandle) -> Self {
        Self {
            session,
            hub: Arc::new(TelemetryHub::new()),
        }
    }
}

pub fn router(state: AppState, cfg: &Config) -> Router {
    let mut router = Router::new()
        .route("/ws", get(ws::upgrade_handler))
        .route("/healthz", get(health::liveness_check))
        .route("/health", get(health::health_check))
        .nest("/api/v1", v1::router())
        .with_state(state);

    if cfg.server.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([axum::http::header::CONTENT_TYPE]);
        router = router.layer(cors);
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(64 * 1024))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    cfg.server.request_timeout_secs,
                ))),
        )
        .layer(TraceLayer::new_for_http())
}
