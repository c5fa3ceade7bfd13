//! Authorization middleware for Axum.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::net::SocketAddr;

use super::gate::AccessGate;

/// Detail string returned with every 403
pub const FORBIDDEN_DETAIL: &str = "Forbidden by Spacedrop auth";

/// Response sent to callers the gate rejects
pub fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({ "ok": false, "detail": FORBIDDEN_DETAIL })),
    )
        .into_response()
}

/// Peer address recorded by `into_make_service_with_connect_info`
pub fn peer_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Middleware that requires the gate to allow the caller.
///
/// Denied requests get a 403 and never reach the handler. Allowed requests
/// carry the [`Decision`](super::types::Decision) as an extension.
pub async fn require_access(
    State(gate): State<AccessGate>,
    mut request: Request,
    next: Next,
) -> Response {
    let decision = gate.authorize(peer_addr(&request)).await;
    if !decision.allowed {
        return forbidden();
    }

    request.extensions_mut().insert(decision);
    next.run(request).await
}
