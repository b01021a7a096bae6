//! HTTP surface of a relay process: liveness, health, metrics and the
//! WebSocket upgrade.

use crate::health::StoreHealth;
use crate::membership::MembershipRouter;
use crate::ws::{serve_socket, WebSocketConfig};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use relay_bus::SignedPublisher;
use relay_telemetry::encode_metrics;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

/// Application state shared across handlers
#[derive(Clone)]
pub struct GatewayState {
    pub router: Arc<MembershipRouter>,
    pub publisher: SignedPublisher,
    pub ws_config: WebSocketConfig,
    pub store_health: StoreHealth,
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn root() -> &'static str {
    "Socket Server is Running"
}

async fn health_check(State(state): State<GatewayState>) -> impl IntoResponse {
    let store_up = state.store_health.is_up();
    let (status, label) = if store_up {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        status,
        Json(json!({
            "status": label,
            "connections": state.router.connection_count(),
            "storeUp": store_up,
        })),
    )
}

async fn metrics() -> Response {
    match encode_metrics() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Identity comes from the `userId` query parameter, issued by the auth tier.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<GatewayState>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        serve_socket(
            socket,
            state.router,
            state.publisher,
            state.ws_config,
            params.user_id,
        )
        .await;
    })
}
