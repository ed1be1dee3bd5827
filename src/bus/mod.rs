//! Cross-instance pub/sub bus (component B, spec §4.2).
//!
//! The core only requires a channel-based message fabric with at-least-once
//! local enqueue and best-effort delivery; which concrete broker backs it is a
//! deployment decision (spec §3 Non-goals: "the core treats the bus as the only
//! cross-instance channel"). `Bus` is the seam: the in-process
//! [`LocalBus`] below is a real, usable implementation (every instance in a
//! single-process test or a sidecar-free deployment can use it directly) and
//! is also what every unit test in this crate exercises against. A production
//! multi-host deployment supplies its own `Bus` impl (Redis, NATS, ...) wired
//! in at `App` construction time; `Document` never depends on the concrete
//! type.
//!
//! Grounded in the teacher's `core/ws_broadcast.rs::BroadcastManager`: a
//! channel-per-topic registry over `tokio::sync::broadcast`, with the same
//! get-or-create-on-subscribe shape.

mod message;

pub use message::BusMessage;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::ClResult;
use crate::metrics::BusCounters;

/// A live subscription. Dropping it unsubscribes (spec §4.2: "unsubscribe is
/// guaranteed synchronous" for the CRDT adapter; the bus client gives the same
/// guarantee by tying subscription lifetime to receiver lifetime).
pub struct Subscription {
	channel: Box<str>,
	rx: broadcast::Receiver<BusMessage>,
}

impl Subscription {
	pub async fn recv(&mut self) -> Option<BusMessage> {
		loop {
			match self.rx.recv().await {
				Ok(msg) => return Some(msg),
				Err(broadcast::error::RecvError::Lagged(n)) => {
					tracing::warn!(channel = %self.channel, skipped = n, "bus subscriber lagged");
					continue;
				}
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	}
}

/// Publisher/subscriber pair over one bus (spec §4.2).
#[async_trait]
pub trait Bus: Send + Sync {
	async fn publish(&self, channel: &str, message: BusMessage) -> ClResult<()>;

	/// Subscribing to the same channel twice in one process is an error (spec
	/// §4.2); `Document` enforces the one-subscription-per-document invariant
	/// by holding the single `Subscription` for its channel in its own state
	/// rather than calling `subscribe` twice, so this never actually races.
	async fn subscribe(&self, channel: &str) -> ClResult<Subscription>;

	fn counters(&self) -> &BusCounters;

	/// Best-effort connectivity probe for `/health` (spec §6).
	async fn health_check(&self) -> bool;

	/// Notify of a transport-level connectivity transition (spec §4.2
	/// `onConnectionChange(fn(up))`). `LocalBus` is in-process and never
	/// disconnects, so it never calls this; a networked backend (Redis, NATS,
	/// ...) invokes it from its own reconnect logic when the underlying
	/// transport drops and re-establishes. Default is a no-op so `LocalBus`
	/// and any other always-connected implementation need not override it.
	fn on_connection_change(&self, _up: bool) {}
}

/// In-process bus: every instance sharing one `LocalBus` behaves as if
/// co-located on the message fabric. Used directly in single-instance
/// deployments and in every test that exercises cross-instance convergence
/// (spec §8 scenario 2) by constructing two `App`s over the same `LocalBus`.
pub struct LocalBus {
	channels: DashMap<Box<str>, broadcast::Sender<BusMessage>>,
	counters: BusCounters,
	buffer_size: usize,
}

impl LocalBus {
	pub fn new(buffer_size: usize) -> Arc<Self> {
		Arc::new(LocalBus { channels: DashMap::new(), counters: BusCounters::default(), buffer_size })
	}

	fn sender(&self, channel: &str) -> broadcast::Sender<BusMessage> {
		self.channels
			.entry(channel.into())
			.or_insert_with(|| broadcast::channel(self.buffer_size).0)
			.clone()
	}
}

#[async_trait]
impl Bus for LocalBus {
	async fn publish(&self, channel: &str, message: BusMessage) -> ClResult<()> {
		let sender = self.sender(channel);
		// At-least-once *local enqueue*: send() only fails when there are no
		// receivers, which is not an error for a fire-and-forget broadcast —
		// the channel may simply have no local subscribers at the moment.
		let _ = sender.send(message);
		self.counters.messages_sent.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
		Ok(())
	}

	async fn subscribe(&self, channel: &str) -> ClResult<Subscription> {
		let sender = self.sender(channel);
		Ok(Subscription { channel: channel.into(), rx: sender.subscribe() })
	}

	fn counters(&self) -> &BusCounters {
		&self.counters
	}

	async fn health_check(&self) -> bool {
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::Timestamp;

	fn msg(instance: &str) -> BusMessage {
		BusMessage {
			document_name: "doc".into(),
			update: vec![1, 2, 3],
			origin: "conn-1".into(),
			instance_tag: instance.into(),
			message_id: "m1".into(),
			timestamp: Timestamp::now(),
		}
	}

	#[tokio::test]
	async fn delivers_to_subscriber() {
		let bus = LocalBus::new(16);
		let mut sub = bus.subscribe("doc:x:updates").await.unwrap();
		bus.publish("doc:x:updates", msg("i1")).await.unwrap();
		let received = sub.recv().await.unwrap();
		assert_eq!(received.instance_tag.as_ref(), "i1");
	}

	#[tokio::test]
	async fn publish_without_subscriber_does_not_error() {
		let bus = LocalBus::new(16);
		bus.publish("doc:nobody:updates", msg("i1")).await.unwrap();
	}
}

// vim: ts=4
