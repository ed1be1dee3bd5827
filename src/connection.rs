//! Connection handler (component E, spec §4.5): per-connection state machine
//! from upgrade through teardown.
//!
//! Grounded in the teacher's `crdt/websocket.rs` connection loop (split
//! socket, `tokio::select!` over the reader and a locally-driven writer) and
//! `core/websocket.rs`'s `AccessQuery`/`resolve_access` read/write
//! negotiation, extended with the idle/handshake timeouts, lazy token-expiry
//! check, permission gating and bounded-queue backpressure spec §4.5 and §5
//! require.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::app::App;
use crate::document::Document;
use crate::metrics::ServerMetrics;
use crate::protocol::Frame;
use crate::types::{ClientId, Permission, Timestamp, UserClaims};

/// `?access=read|write` query parameter (spec §2 of SPEC_FULL's supplemented
/// features; grounded in the teacher's `AccessQuery`).
#[derive(Debug, Deserialize, Default)]
pub struct AccessQuery {
	pub access: Option<String>,
	pub token: Option<String>,
}

/// Intersect the requested access level with the token's actual permissions.
/// `Err` means a `write` access was requested but the token cannot satisfy
/// it — the caller rejects the upgrade with close code 1008 rather than
/// silently downgrading.
pub fn resolve_permissions(query: &AccessQuery, claims: &UserClaims) -> Result<Vec<Permission>, ()> {
	match query.access.as_deref() {
		Some("read") => Ok(vec![Permission::Read]),
		Some("write") => {
			if claims.has(Permission::Write) {
				Ok(claims.permissions.clone())
			} else {
				Err(())
			}
		}
		_ => Ok(claims.permissions.clone()),
	}
}

fn can_write(permissions: &[Permission]) -> bool {
	permissions.contains(&Permission::Write) || permissions.contains(&Permission::Admin)
}

/// Send one binary frame, recording per-connection traffic counters
/// (SPEC_FULL §2) alongside the write.
async fn send_binary(
	sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
	metrics: &ServerMetrics,
	frame: Vec<u8>,
) -> bool {
	metrics.connections.note_outbound(frame.len());
	sink.send(Message::Binary(frame.into())).await.is_ok()
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
enum State {
	Handshaking,
	Open,
}

/// Result of dispatching one frame (spec §4.5: `Open` is reached only once
/// both sides have exchanged updates sufficient to converge, not on any
/// successfully-decoded frame).
enum FrameOutcome {
	/// Keep the connection in its current state.
	Continue,
	/// The handshake just completed; the caller should transition to `Open`.
	Open,
	/// The connection must close immediately (send failure, or a protocol
	/// violation already reported via an explicit close frame).
	Close,
}

/// Drive one WebSocket connection for its whole lifetime: the sync handshake,
/// steady-state frame routing, and close-flush teardown (spec §4.5).
pub async fn handle_connection(
	socket: WebSocket,
	app: App,
	document_name: Box<str>,
	claims: UserClaims,
	permissions: Vec<Permission>,
) {
	let doc = app.registry.get(&document_name).await;
	let (client_id, outbound) = doc.attach(permissions.clone()).await;
	let (mut sink, mut stream) = socket.split();

	let initial = Frame::SyncStep1 { state_vector: doc.initial_state_vector() }.encode();
	if !send_binary(&mut sink, &app.metrics, initial).await {
		app.registry.release(document_name, doc, client_id);
		return;
	}

	let mut conn_state = State::Handshaking;
	let handshake_deadline = tokio::time::sleep(app.config.handshake_timeout);
	tokio::pin!(handshake_deadline);
	let idle_deadline = tokio::time::sleep(app.config.idle_timeout);
	tokio::pin!(idle_deadline);
	let mut heartbeat = tokio::time::interval(app.config.heartbeat_interval);
	heartbeat.tick().await; // first tick fires immediately; skip it

	'pump: loop {
		tokio::select! {
			_ = outbound.wait() => {
				while let Some(frame) = outbound.try_pop() {
					if !send_binary(&mut sink, &app.metrics, frame).await {
						break 'pump;
					}
				}
			}
			_ = heartbeat.tick() => {
				if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
					break 'pump;
				}
			}
			() = &mut idle_deadline => {
				send_close(&mut sink, 1000, "idle timeout").await;
				break 'pump;
			}
			() = &mut handshake_deadline, if conn_state == State::Handshaking => {
				send_close(&mut sink, 1011, "handshake timeout").await;
				break 'pump;
			}
			incoming = stream.next() => {
				let Some(incoming) = incoming else { break 'pump };
				let message = match incoming {
					Ok(message) => message,
					Err(_) => break 'pump,
				};
				idle_deadline.as_mut().reset(tokio::time::Instant::now() + app.config.idle_timeout);

				match message {
					Message::Close(_) => break 'pump,
					Message::Ping(payload) => {
						if sink.send(Message::Pong(payload)).await.is_err() {
							break 'pump;
						}
					}
					Message::Pong(_) => {}
					Message::Text(_) => {
						send_close(&mut sink, 1011, "text frames are not supported").await;
						break 'pump;
					}
					Message::Binary(bytes) => {
						app.metrics.connections.note_inbound(bytes.len());
						// Token expiry is checked lazily on each inbound frame (spec §4.5).
						if claims.is_expired(Timestamp::now()) {
							send_close(&mut sink, 1008, "token expired").await;
							break 'pump;
						}

						match Frame::decode(&bytes) {
							Err(err) => {
								if let Some(code) = err.close_code() {
									send_close(&mut sink, code, "protocol error").await;
									break 'pump;
								}
							}
							Ok(frame) => {
								match route_frame(&doc, &app, client_id, &permissions, frame, conn_state, &outbound, &mut sink).await {
									FrameOutcome::Close => break 'pump,
									FrameOutcome::Open => conn_state = State::Open,
									FrameOutcome::Continue => {}
								}
							}
						}
					}
				}
			}
		}
	}

	// Closing -> Closed (spec §4.5): flush whatever is still queued, bounded
	// by the close-flush deadline, before detaching.
	outbound.close();
	let _ = tokio::time::timeout(app.config.close_flush_deadline, async {
		while let Some(frame) = outbound.try_pop() {
			if !send_binary(&mut sink, &app.metrics, frame).await {
				break;
			}
		}
	})
	.await;
	let _ = sink.close().await;

	app.registry.release(document_name, doc, client_id);
}

/// Dispatch one decoded frame. `conn_state` gates edit-forwarding frames
/// (spec §4.5: "no edits are forwarded until Open"); only `SyncStep1`/
/// `SyncStep2` drive the handshake, so a bare `Ping`/`QueryAwareness`/
/// `Awareness` never flips `Handshaking` to `Open` on its own.
async fn route_frame(
	doc: &Arc<Document>,
	app: &App,
	client_id: ClientId,
	permissions: &[Permission],
	frame: Frame,
	conn_state: State,
	outbound: &crate::outbound::OutboundQueue,
	sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
) -> FrameOutcome {
	match frame {
		Frame::SyncStep1 { state_vector } => match doc.diff_for_client(&state_vector) {
			Ok(update) => {
				let encoded = Frame::SyncStep2 { update }.encode();
				if send_binary(sink, &app.metrics, encoded).await {
					FrameOutcome::Continue
				} else {
					FrameOutcome::Close
				}
			}
			Err(err) => {
				app.metrics.apply_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
				tracing::error!(document = %doc.name, error = %err, "failed to diff client state vector");
				FrameOutcome::Continue
			}
		},
		Frame::SyncStep2 { update } => {
			if !can_write(permissions) {
				// Permission enforcement: discard silently (spec §4.5).
				return FrameOutcome::Open;
			}
			if let Err(err) = doc.apply_local_update(&update, client_id).await {
				app.metrics.apply_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
				tracing::error!(document = %doc.name, error = %err, "update rejected");
			}
			// Receiving the client's own diff is what "both sides have
			// exchanged updates sufficient to converge" means here.
			FrameOutcome::Open
		}
		Frame::Update { update } => {
			if conn_state != State::Open {
				let err = crate::error::Error::ProtocolWrongState("handshaking");
				tracing::warn!(document = %doc.name, "update frame received before handshake completed");
				send_close(sink, err.close_code().unwrap_or(1011), "update received before handshake completed")
					.await;
				return FrameOutcome::Close;
			}
			if !can_write(permissions) {
				// Permission enforcement: discard silently (spec §4.5).
				return FrameOutcome::Continue;
			}
			if let Err(err) = doc.apply_local_update(&update, client_id).await {
				app.metrics.apply_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
				tracing::error!(document = %doc.name, error = %err, "update rejected");
			}
			FrameOutcome::Continue
		}
		Frame::Awareness { payload } => {
			if can_write(permissions) {
				if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&payload) {
					let change = doc.set_local_awareness(client_id, value);
					doc.broadcast_awareness(&change, Some(client_id)).await;
				}
			}
			FrameOutcome::Continue
		}
		Frame::QueryAwareness => {
			outbound.push(Frame::Awareness { payload: doc.encode_full_awareness() }.encode());
			FrameOutcome::Continue
		}
		Frame::Ping => {
			outbound.push(Frame::Ping.encode());
			FrameOutcome::Continue
		}
	}
}

async fn send_close(
	sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
	code: u16,
	reason: &'static str,
) {
	let _ = sink.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::app::App;
	use crate::config::Config;
	use crate::types::Timestamp;
	use std::pin::Pin;
	use std::task::{Context, Poll};

	/// Collects every frame `route_frame` sends, without touching a real socket.
	struct RecordingSink {
		sent: Vec<Message>,
	}

	impl futures_util::Sink<Message> for RecordingSink {
		type Error = axum::Error;

		fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
			Poll::Ready(Ok(()))
		}

		fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
			self.get_mut().sent.push(item);
			Ok(())
		}

		fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
			Poll::Ready(Ok(()))
		}

		fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
			Poll::Ready(Ok(()))
		}
	}

	fn sample_update() -> Vec<u8> {
		crate::crdt::tests_support::mutate_and_capture(&crate::crdt::CrdtReplica::new(), "x")
	}

	#[tokio::test]
	async fn update_before_handshake_completes_is_rejected() {
		let (app, _memory) = App::new(Config::from_env());
		let doc = app.registry.get("doc-1").await;
		let (client_id, _outbound) = doc.attach(vec![Permission::Write]).await;
		let outbound = crate::outbound::OutboundQueue::new(8, app.metrics.clone());
		let mut sink = RecordingSink { sent: Vec::new() };

		let before = doc.state_vector();
		let outcome = route_frame(
			&doc,
			&app,
			client_id,
			&[Permission::Write],
			Frame::Update { update: sample_update() },
			State::Handshaking,
			&outbound,
			&mut sink,
		)
		.await;

		assert!(matches!(outcome, FrameOutcome::Close));
		assert_eq!(doc.state_vector(), before, "the update must not be applied before Open");
		assert!(matches!(sink.sent.as_slice(), [Message::Close(Some(frame))] if frame.code == 1011));
	}

	#[tokio::test]
	async fn update_after_handshake_completes_is_applied() {
		let (app, _memory) = App::new(Config::from_env());
		let doc = app.registry.get("doc-2").await;
		let (client_id, _outbound) = doc.attach(vec![Permission::Write]).await;
		let outbound = crate::outbound::OutboundQueue::new(8, app.metrics.clone());
		let mut sink = RecordingSink { sent: Vec::new() };

		let before = doc.state_vector();
		let outcome = route_frame(
			&doc,
			&app,
			client_id,
			&[Permission::Write],
			Frame::Update { update: sample_update() },
			State::Open,
			&outbound,
			&mut sink,
		)
		.await;

		assert!(matches!(outcome, FrameOutcome::Continue));
		assert_ne!(doc.state_vector(), before, "the update should apply once Open");
	}

	#[tokio::test]
	async fn receiving_sync_step2_transitions_to_open() {
		let (app, _memory) = App::new(Config::from_env());
		let doc = app.registry.get("doc-3").await;
		let (client_id, _outbound) = doc.attach(vec![Permission::Write]).await;
		let outbound = crate::outbound::OutboundQueue::new(8, app.metrics.clone());
		let mut sink = RecordingSink { sent: Vec::new() };

		let outcome = route_frame(
			&doc,
			&app,
			client_id,
			&[Permission::Write],
			Frame::SyncStep2 { update: sample_update() },
			State::Handshaking,
			&outbound,
			&mut sink,
		)
		.await;

		assert!(matches!(outcome, FrameOutcome::Open));
	}

	fn claims(permissions: Vec<Permission>) -> UserClaims {
		UserClaims {
			user_id: "u1".into(),
			username: "alice".into(),
			permissions,
			exp: Timestamp(Timestamp::now().0 + 3600),
		}
	}

	#[test]
	fn write_access_request_is_rejected_for_read_only_token() {
		let query = AccessQuery { access: Some("write".into()), token: None };
		let user = claims(vec![Permission::Read]);
		assert!(resolve_permissions(&query, &user).is_err());
	}

	#[test]
	fn read_access_request_downgrades_a_write_token() {
		let query = AccessQuery { access: Some("read".into()), token: None };
		let user = claims(vec![Permission::Write]);
		let resolved = resolve_permissions(&query, &user).unwrap();
		assert_eq!(resolved, vec![Permission::Read]);
	}

	#[test]
	fn no_access_param_uses_the_tokens_own_permissions() {
		let query = AccessQuery::default();
		let user = claims(vec![Permission::Write]);
		let resolved = resolve_permissions(&query, &user).unwrap();
		assert_eq!(resolved, vec![Permission::Write]);
	}

	#[test]
	fn can_write_requires_write_or_admin() {
		assert!(!can_write(&[Permission::Read]));
		assert!(can_write(&[Permission::Write]));
		assert!(can_write(&[Permission::Admin]));
	}
}

// vim: ts=4
