//! HTTP surface: the WebSocket upgrade endpoint plus `/health` and `/stats`
//! (spec §6).
//!
//! Grounded in the teacher's `core/websocket.rs` upgrade-handler shape
//! (`WebSocketUpgrade` + `Path` + `Query` + `State`, rejecting pre-upgrade
//! with `ws.on_upgrade(|socket| close_with_error(...))` rather than a plain
//! HTTP error, since a WebSocket client can't read an HTTP body).

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::app::App;
use crate::auth;
use crate::connection::{self, AccessQuery};
use crate::error::Error;

pub fn router(app: App) -> Router {
	Router::new()
		.route("/health", get(get_health))
		.route("/stats", get(get_stats))
		.route("/{document_name}", get(get_document_ws))
		.layer(TraceLayer::new_for_http())
		.with_state(app)
}

async fn close_with_error(mut socket: WebSocket, code: u16, reason: &'static str) {
	let _ = socket.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
	let _ = socket.close().await;
}

/// `GET /<documentName>` (spec §6): upgrade to the document's sync WebSocket.
/// Auth failures and an unsatisfiable `?access=write` are rejected by
/// completing the upgrade and immediately closing with the relevant code —
/// a WebSocket client has no way to read a plain HTTP error body.
async fn get_document_ws(
	ws: WebSocketUpgrade,
	Path(document_name): Path<String>,
	Query(query): Query<AccessQuery>,
	headers: HeaderMap,
	State(app): State<App>,
) -> Response {
	let subprotocols = headers.get(header::SEC_WEBSOCKET_PROTOCOL).and_then(|v| v.to_str().ok());
	let Some(token) = auth::extract_token(subprotocols, query.token.as_deref()) else {
		let code = Error::AuthMissing.close_code().unwrap_or(1008);
		return ws.on_upgrade(move |socket| close_with_error(socket, code, "authentication required"));
	};

	let claims = match auth::verify_token(&app.config, &token) {
		Ok(claims) => claims,
		Err(err) => {
			let code = err.close_code().unwrap_or(1008);
			return ws.on_upgrade(move |socket| close_with_error(socket, code, "authentication failed"));
		}
	};

	let permissions = match connection::resolve_permissions(&query, &claims) {
		Ok(permissions) => permissions,
		Err(()) => {
			let code = Error::AuthInsufficientPermission.close_code().unwrap_or(1008);
			return ws.on_upgrade(move |socket| close_with_error(socket, code, "write access denied"));
		}
	};

	let mut upgrade = ws;
	if let Some(proto) = auth::chosen_subprotocol(subprotocols) {
		upgrade = upgrade.protocols([proto]);
	}

	let document_name: Box<str> = document_name.into();
	upgrade.on_upgrade(move |socket| {
		connection::handle_connection(socket, app, document_name, claims, permissions)
	})
}

/// `GET /health` (spec §6): liveness plus bus connectivity.
async fn get_health(State(app): State<App>) -> Response {
	let bus_ok = app.bus.health_check().await;
	let status = if bus_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
	(status, Json(serde_json::json!({ "status": if bus_ok { "ok" } else { "degraded" } }))).into_response()
}

/// `GET /stats` (spec §6): point-in-time counters, see [`crate::metrics`].
async fn get_stats(State(app): State<App>) -> Response {
	let documents = app.registry.len();
	let connections = app.registry.total_connections().await;
	Json(app.metrics.snapshot(documents, connections)).into_response()
}

// vim: ts=4
