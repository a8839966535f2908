//! HTTP monitoring surface: a tiny JSON status endpoint a host's load
//! balancer can poll to decide whether to keep routing traffic to this
//! replica.

use crate::Metrics;
use miette::Result;
use retrograde_core::governor::{Action, Governor};
use std::sync::Arc;

pub fn json_response(value: serde_json::Value) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let data = serde_json::to_vec(&value).unwrap_or_default();
    tiny_http::Response::from_data(data).with_header(
        tiny_http::Header::from_bytes(&b"Content-Type"[..], "application/json").unwrap(),
    )
}

pub fn overloaded_response() -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    tiny_http::Response::from_string("Service temporarily overloaded").with_status_code(503)
}

/// Build the JSON body for `GET /<prefix>/status`: the Governor's counters
/// plus the last evaluated action's type and reason, if any.
pub fn status_json(governor: &Governor, last_action: Option<&Action>) -> serde_json::Value {
    let stats = governor.statistics();
    serde_json::json!({
        "current_r": stats.current_r,
        "initial_r": stats.initial_r,
        "in_saturation": stats.in_saturation,
        "warnings": stats.warnings,
        "throttles": stats.throttles,
        "blocked_deploys": stats.blocked_deploys,
        "recovery_events": stats.recovery_events,
        "history_len": stats.history_len,
        "last_action_type": last_action.map(|a| format!("{:?}", a.action_type)),
        "last_action_reason": last_action.map(|a| a.reason.clone()),
    })
}

/// Run the status server. Blocks forever serving two routes:
///
/// - `GET /<prefix>/status` — the monitoring endpoint. Always `200` with a
///   JSON body, even while the governor is throttling, so a watcher can see
///   *that* it's throttling.
/// - `GET /<prefix>/protected` — a mock stand-in for request traffic sitting
///   behind this governor. Answers `503` with a fixed body whenever the
///   governor's last-known action was `Throttle`; this is the host-middleware
///   contract, kept off the monitoring route.
pub fn serve(
    addr: &str,
    prefix: &str,
    governor: Arc<Governor>,
    last_action: Arc<parking_lot::Mutex<Option<Action>>>,
    metrics: &Metrics,
) -> Result<()> {
    let server = tiny_http::Server::http(addr)
        .map_err(|e| miette::miette!("failed to bind status server to {addr}: {e}"))?;
    let prefix = prefix.trim_matches('/');
    let status_path = format!("/{prefix}/status");
    let protected_path = format!("/{prefix}/protected");
    let bound_addr = server.server_addr();
    println!("Status server listening at http://{bound_addr}");
    tracing::info!(%bound_addr, path = %status_path, "status server listening");

    for request in server.incoming_requests() {
        let is_get = request.method() == &tiny_http::Method::Get;
        let response = if is_get && request.url() == status_path.as_str() {
            metrics.record_status_request();
            let snapshot = last_action.lock().clone();
            json_response(status_json(&governor, snapshot.as_ref()))
        } else if is_get && request.url() == protected_path.as_str() {
            let snapshot = last_action.lock().clone();
            let throttled = matches!(
                snapshot.as_ref().map(|a| a.action_type),
                Some(retrograde_core::governor::ActionType::Throttle)
            );
            if throttled {
                overloaded_response()
            } else {
                tiny_http::Response::from_string("ok").with_status_code(200)
            }
        } else {
            tiny_http::Response::from_string("not found").with_status_code(404)
        };
        let _ = request.respond(response);
    }
    Ok(())
}
