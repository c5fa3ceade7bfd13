//! Web server implementation

use axum::{
    extract::{ConnectInfo, State},
    middleware,
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{require_access, AccessGate, Decision};

/// Build the router.
///
/// `privileged` routes run behind [`require_access`]; `/health` and
/// `/debug/whoami` are public.
pub fn router(gate: AccessGate, privileged: Router<AccessGate>) -> Router {
    let protected_routes =
        privileged.route_layer(middleware::from_fn_with_state(gate.clone(), require_access));

    Router::new()
        .route("/health", get(health_handler))
        .route("/debug/whoami", get(whoami_handler))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(gate)
}

/// Privileged routes served by the `spacedrop` binary
pub fn default_privileged_routes() -> Router<AccessGate> {
    Router::new().route("/auth/check", get(auth_check_handler))
}

/// Bind `addr` and serve until the listener fails.
///
/// The gate must already be initialized; its policy is not reloaded.
pub async fn serve(addr: SocketAddr, gate: AccessGate) -> anyhow::Result<()> {
    info!("Spacedrop listening on http://{} (mode {})", addr, gate.mode_string());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = router(gate, default_privileged_routes());
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

async fn health_handler(State(gate): State<AccessGate>) -> impl IntoResponse {
    let cfg = gate.config();
    Json(serde_json::json!({
        "ok": true,
        "version": spacedrop_common::VERSION,
        "mode": gate.mode_string(),
        "personal_user_id": cfg.personal_id,
        "contacts_user_ids": cfg.contacts,
        "config_path": gate.config_path().map(|p| p.display().to_string()),
        "config_loaded": gate.is_config_loaded(),
    }))
}

async fn whoami_handler(
    State(gate): State<AccessGate>,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> impl IntoResponse {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    let identity = gate.identify(peer).await;
    Json(serde_json::json!({
        "src_ip": peer.map(|p| p.ip().to_string()),
        "user_id": identity.user_id,
        "source": identity.source,
    }))
}

async fn auth_check_handler(Extension(decision): Extension<Decision>) -> impl IntoResponse {
    Json(serde_json::json!({
        "ok": true,
        "user_id": decision.user_id(),
        "source": decision.identity.source,
    }))
}
