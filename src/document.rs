//! Document (component D, spec §4.4): owns the CRDT replica, the connection
//! set, the awareness state, the debounce timer, and the bus subscription
//! bridge for one document name.
//!
//! All state mutations — replica apply, awareness changes, connection set
//! membership, debounce bookkeeping — execute under one `tokio::sync::Mutex`
//! (the "per-Document exclusive section" of spec §5). Nothing that suspends
//! on socket I/O or a bus publish runs while that lock is held; fan-out only
//! enqueues onto each connection's [`OutboundQueue`], and publishing happens
//! after the lock is dropped.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::awareness::{AwarenessChange, AwarenessState};
use crate::bus::{Bus, BusMessage};
use crate::config::Config;
use crate::crdt::CrdtReplica;
use crate::error::ClResult;
use crate::metrics::ServerMetrics;
use crate::outbound::OutboundQueue;
use crate::protocol::Frame;
use crate::types::{ClientId, Permission, Timestamp};

struct ConnectionEntry {
	outbound: Arc<OutboundQueue>,
	permissions: Vec<Permission>,
}

/// `debounceState` of spec §3: `{ pending, firstPendingAt, timer }`.
/// `generation` replaces an explicit timer handle — each append bumps it, and
/// a scheduled flush that wakes up with a stale generation is a no-op because
/// a newer append already armed its own timer. This gives the same
/// "(re)arm the quiet-period timer" behavior without tracking cancellable
/// task handles.
#[derive(Default)]
struct DebounceState {
	pending: Vec<(Vec<u8>, ClientId)>,
	// A monotonic clock, not the (second-granularity) `Timestamp` used for
	// idle-eviction bookkeeping — `delay`/`maxDelay` are sub-second.
	first_pending_at: Option<tokio::time::Instant>,
	generation: u64,
}

struct Inner {
	connections: HashMap<ClientId, ConnectionEntry>,
	next_client_id: u32,
	debounce: DebounceState,
	last_accessed: Timestamp,
}

pub struct Document {
	pub name: Box<str>,
	replica: CrdtReplica,
	awareness: AwarenessState,
	instance_tag: Box<str>,
	bus: Arc<dyn Bus>,
	config: Arc<Config>,
	metrics: Arc<ServerMetrics>,
	inner: AsyncMutex<Inner>,
	bridge: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Document {
	pub fn new(
		name: impl Into<Box<str>>,
		bus: Arc<dyn Bus>,
		config: Arc<Config>,
		metrics: Arc<ServerMetrics>,
	) -> Self {
		Document {
			name: name.into(),
			replica: CrdtReplica::new(),
			awareness: AwarenessState::new(),
			instance_tag: config.instance_tag.clone(),
			bus,
			config,
			metrics,
			inner: AsyncMutex::new(Inner {
				connections: HashMap::new(),
				next_client_id: 1,
				debounce: DebounceState::default(),
				last_accessed: Timestamp::now(),
			}),
			bridge: parking_lot::Mutex::new(None),
		}
	}

	fn channel(&self) -> String {
		BusMessage::channel_for(&self.name)
	}

	/// Extension seam for a persistence layer (SPEC_FULL §4 Open Questions):
	/// called once right after construction, before any connection can attach
	/// or observe the replica. A deployment that adds snapshot persistence
	/// hangs its loader here without touching the registry's `get`/`release`
	/// contract. No-op in this core.
	pub async fn bootstrap(&self) {}

	/// `attach(conn) -> clientId` (spec §4.4.1). Subscribes the bus bridge on
	/// the first attach (refCount 0 -> 1).
	pub async fn attach(self: &Arc<Self>, permissions: Vec<Permission>) -> (ClientId, Arc<OutboundQueue>) {
		let outbound = Arc::new(OutboundQueue::new(self.config.outbound_queue_capacity, self.metrics.clone()));
		let mut inner = self.inner.lock().await;
		let client_id = inner.next_client_id;
		inner.next_client_id += 1;
		let was_empty = inner.connections.is_empty();
		inner.connections.insert(client_id, ConnectionEntry { outbound: outbound.clone(), permissions });
		inner.last_accessed = Timestamp::now();
		let ref_count = inner.connections.len();
		drop(inner);

		self.metrics.note_connections(ref_count as i64);
		if was_empty {
			self.start_bridge();
		}
		tracing::debug!(document = %self.name, client_id, "connection attached");
		(client_id, outbound)
	}

	/// `detach(conn)` (spec §4.4.2). Flushes any pending debounce immediately
	/// so a departing writer's updates aren't lost waiting for a timer that
	/// may now never fire for lack of future activity.
	pub async fn detach(self: &Arc<Self>, client_id: ClientId) {
		let (became_empty, flush_now) = {
			let mut inner = self.inner.lock().await;
			inner.connections.remove(&client_id);
			inner.last_accessed = Timestamp::now();
			let became_empty = inner.connections.is_empty();
			let flush_now = became_empty && !inner.debounce.pending.is_empty();
			(became_empty, flush_now)
		};

		let change = self.awareness.remove(client_id);
		if !change.is_empty() {
			self.broadcast_awareness(&change, Some(client_id)).await;
		}
		if flush_now {
			self.flush().await;
		}
		tracing::debug!(document = %self.name, client_id, became_empty, "connection detached");
	}

	pub async fn ref_count(&self) -> usize {
		self.inner.lock().await.connections.len()
	}

	pub async fn last_accessed(&self) -> Timestamp {
		self.inner.lock().await.last_accessed
	}

	/// True when this Document has no connections and no armed debounce
	/// timer — the only state in which eviction is safe (spec §4.3, §4.6).
	pub async fn is_evictable(&self) -> bool {
		let inner = self.inner.lock().await;
		inner.connections.is_empty() && inner.debounce.pending.is_empty()
	}

	/// `applyLocalUpdate(bytes, conn)` (spec §4.4.3).
	pub async fn apply_local_update(self: &Arc<Self>, bytes: &[u8], origin: ClientId) -> ClResult<()> {
		let produced = self.replica.apply(bytes)?;
		{
			let mut inner = self.inner.lock().await;
			inner.last_accessed = Timestamp::now();
		}
		for update in produced {
			self.debounce_append(update, origin).await;
		}
		Ok(())
	}

	/// `applyRemoteUpdate(bytes, origin = BUS)` (spec §4.4.4): applies then
	/// fans out locally without re-publishing or debouncing.
	pub async fn apply_remote_update(self: &Arc<Self>, bytes: &[u8]) -> ClResult<()> {
		let produced = self.replica.apply(bytes)?;
		{
			let mut inner = self.inner.lock().await;
			inner.last_accessed = Timestamp::now();
		}
		if produced.is_empty() {
			return Ok(());
		}
		let frames: Vec<Vec<u8>> =
			produced.into_iter().map(|update| Frame::Update { update }.encode()).collect();
		let inner = self.inner.lock().await;
		for entry in inner.connections.values() {
			for frame in &frames {
				entry.outbound.push(frame.clone());
			}
		}
		Ok(())
	}

	async fn debounce_append(self: &Arc<Self>, update: Vec<u8>, origin: ClientId) {
		if self.config.debounce_delay.is_zero() {
			// delay = 0 degrades to synchronous broadcast (spec §4.4).
			let merged = match CrdtReplica::merge(std::slice::from_ref(&update)) {
				Ok(bytes) => vec![bytes],
				Err(_) => vec![update],
			};
			self.fan_out_and_publish(merged, vec![origin]).await;
			return;
		}

		let (should_flush_now, generation) = {
			let mut inner = self.inner.lock().await;
			let now = tokio::time::Instant::now();
			let first_pending_at = *inner.debounce.first_pending_at.get_or_insert(now);
			inner.debounce.pending.push((update, origin));
			inner.debounce.generation += 1;
			let should_flush_now = now.duration_since(first_pending_at) >= self.config.debounce_max_delay;
			(should_flush_now, inner.debounce.generation)
		};

		let doc = self.clone();
		if should_flush_now {
			tokio::spawn(async move { doc.flush().await });
		} else {
			let delay = self.config.debounce_delay;
			tokio::spawn(async move {
				tokio::time::sleep(delay).await;
				doc.maybe_flush(generation).await;
			});
		}
	}

	async fn maybe_flush(self: &Arc<Self>, generation: u64) {
		let still_current = {
			let inner = self.inner.lock().await;
			inner.debounce.generation == generation && !inner.debounce.pending.is_empty()
		};
		if still_current {
			self.flush().await;
		}
	}

	/// Flush the debounce buffer: merge, fan out locally (excluding each
	/// pending update's origin), publish once per resulting blob (spec §4.4).
	pub async fn flush(self: &Arc<Self>) {
		let (updates, origins) = {
			let mut inner = self.inner.lock().await;
			if inner.debounce.pending.is_empty() {
				return;
			}
			let taken = std::mem::take(&mut inner.debounce.pending);
			inner.debounce.first_pending_at = None;
			let origins: Vec<ClientId> = taken.iter().map(|(_, origin)| *origin).collect();
			let bytes: Vec<Vec<u8>> = taken.into_iter().map(|(b, _)| b).collect();
			(bytes, origins)
		};

		let merged = match CrdtReplica::merge(&updates) {
			Ok(one) => vec![one],
			Err(_) => updates,
		};

		self.fan_out_and_publish(merged, origins).await;
	}

	async fn fan_out_and_publish(self: &Arc<Self>, blobs: Vec<Vec<u8>>, origins: Vec<ClientId>) {
		{
			let mut inner = self.inner.lock().await;
			inner.last_accessed = Timestamp::now();
			for (client_id, entry) in inner.connections.iter() {
				if origins.contains(client_id) {
					continue;
				}
				for blob in &blobs {
					entry.outbound.push(Frame::Update { update: blob.clone() }.encode());
				}
			}
		}

		let channel = self.channel();
		for blob in blobs {
			let message = BusMessage {
				document_name: self.name.clone(),
				update: blob,
				origin: origins.first().map(|c| c.to_string()).unwrap_or_default().into(),
				instance_tag: self.instance_tag.clone(),
				message_id: uuid::Uuid::new_v4().to_string().into(),
				timestamp: Timestamp::now(),
			};
			if let Err(err) = self.bus.publish(&channel, message).await {
				tracing::warn!(document = %self.name, error = %err, "bus publish failed");
			}
		}
	}

	/// `broadcastAwareness(changes)` (spec §4.4.5).
	pub async fn broadcast_awareness(&self, change: &AwarenessChange, originator: Option<ClientId>) {
		if change.is_empty() {
			return;
		}
		let payload = self.awareness.encode_change(change);
		let frame = Frame::Awareness { payload }.encode();
		let inner = self.inner.lock().await;
		for (client_id, entry) in inner.connections.iter() {
			if Some(*client_id) == originator {
				continue;
			}
			entry.outbound.push(frame.clone());
		}
	}

	pub fn set_local_awareness(&self, client_id: ClientId, state: Value) -> AwarenessChange {
		self.awareness.set_local(client_id, state)
	}

	pub fn encode_full_awareness(&self) -> Vec<u8> {
		self.awareness.encode_full()
	}

	/// `handshakeStreams(conn)` (spec §4.4.6): the server's own state vector,
	/// sent immediately as `SyncStep1`.
	pub fn initial_state_vector(&self) -> Vec<u8> {
		self.replica.state_vector()
	}

	/// The catch-up update computed once the client has sent its own state
	/// vector (spec §4.4.6, second half).
	pub fn diff_for_client(&self, remote_state_vector: &[u8]) -> ClResult<Vec<u8>> {
		self.replica.diff_since(remote_state_vector)
	}

	pub fn state_vector(&self) -> Vec<u8> {
		self.replica.state_vector()
	}

	fn start_bridge(self: &Arc<Self>) {
		let doc = self.clone();
		let channel = self.channel();
		let handle = tokio::spawn(async move {
			let mut sub = match doc.bus.subscribe(&channel).await {
				Ok(sub) => sub,
				Err(err) => {
					tracing::warn!(document = %doc.name, error = %err, "bus subscribe failed");
					return;
				}
			};
			while let Some(message) = sub.recv().await {
				if message.is_from_self(&doc.instance_tag) {
					doc.bus.counters().messages_suppressed_loop.fetch_add(1, Ordering::Relaxed);
					continue;
				}
				doc.bus.counters().messages_received.fetch_add(1, Ordering::Relaxed);
				if let Err(err) = doc.apply_remote_update(&message.update).await {
					doc.metrics.apply_errors.fetch_add(1, Ordering::Relaxed);
					tracing::error!(document = %doc.name, error = %err, "remote update rejected");
				}
			}
		});
		*self.bridge.lock() = Some(handle);
	}

	/// Tears down the bus bridge. Called only from the registry's eviction
	/// path once a Document has been confirmed idle past `idleEvictTTL`
	/// (spec §4.3, §4.4: "On refCount: 1 -> 0 via eviction, unsubscribe").
	pub fn shutdown(&self) {
		if let Some(handle) = self.bridge.lock().take() {
			handle.abort();
		}
	}
}


// vim: ts=4
