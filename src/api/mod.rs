pub mod handler;
pub mod state;
pub mod ws;

pub use handler::{ConnectionHandler, Flow, Phase};
pub use state::AppState;

use axum::{routing::get, Json, Router};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::protocol::PROTOCOL_VERSION;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    protocol: u16,
    online: usize,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/ws/v1", get(ws::ws_upgrade))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(axum::extract::State(state): axum::extract::State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        protocol: PROTOCOL_VERSION,
        online: state.sessions.len(),
    })
}
