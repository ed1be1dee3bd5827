//! Document registry (component C, spec §4.3): name -> [`Document`], with
//! single-flight creation, reference counting via `Document::attach`/`detach`,
//! and idle eviction.
//!
//! Grounded in the teacher's `adapters/crdt-adapter-redb::doc_instances`
//! (a `DashMap<String, Arc<DocumentInstance>>` get-or-create cache), extended
//! here with a genuine single-flight slot — the teacher's `get_or_create_instance`
//! can race two inserts for the same key; spec §4.3 and §8 property 1/scenario 4
//! require exactly one construction, so this core makes the slot itself the
//! synchronization point via `tokio::sync::OnceCell`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::bus::Bus;
use crate::config::Config;
use crate::document::Document;
use crate::metrics::ServerMetrics;

type Slot = Arc<OnceCell<Arc<Document>>>;

pub struct DocumentRegistry {
	slots: DashMap<Box<str>, Slot>,
	bus: Arc<dyn Bus>,
	config: Arc<Config>,
	metrics: Arc<ServerMetrics>,
}

impl DocumentRegistry {
	pub fn new(bus: Arc<dyn Bus>, config: Arc<Config>, metrics: Arc<ServerMetrics>) -> Arc<Self> {
		Arc::new(DocumentRegistry { slots: DashMap::new(), bus, config, metrics })
	}

	/// `get(name) -> Document` (spec §4.3): single-flight. The `DashMap`
	/// entry API inserts the `OnceCell` slot under an exclusive, O(1) map
	/// lock; every caller then races to initialize that *same* cell with
	/// `get_or_init`, and only one of them actually runs the initializer —
	/// the rest simply await its result. No I/O happens while the map lock
	/// is held, satisfying spec §4.3's concurrency contract.
	pub async fn get(self: &Arc<Self>, name: &str) -> Arc<Document> {
		let slot = self.slots.entry(name.into()).or_insert_with(|| Arc::new(OnceCell::new())).clone();

		slot.get_or_init(|| async {
			tracing::debug!(document = name, "constructing new document");
			let doc = Document::new(name, self.bus.clone(), self.config.clone(), self.metrics.clone());
			doc.bootstrap().await;
			Arc::new(doc)
		})
		.await
		.clone()
	}

	/// Release one reference: detach the connection from the Document and,
	/// once it reaches `refCount = 0`, arm the idle-eviction timer (spec
	/// §4.3: "decrement refCount; when refCount hits zero, start (do not
	/// wait for) the idle-eviction timer").
	pub fn release(self: &Arc<Self>, name: Box<str>, doc: Arc<Document>, client_id: crate::types::ClientId) {
		let registry = self.clone();
		tokio::spawn(async move {
			doc.detach(client_id).await;
			if doc.ref_count().await == 0 {
				registry.schedule_eviction_check(name, doc);
			}
		});
	}

	fn schedule_eviction_check(self: &Arc<Self>, name: Box<str>, doc: Arc<Document>) {
		let registry = self.clone();
		let ttl = self.config.idle_evict_ttl;
		tokio::spawn(async move {
			tokio::time::sleep(ttl).await;
			registry.try_evict(&name, &doc).await;
		});
	}

	/// At check time: still zero refs and no pending debounce ⇒ unsubscribe
	/// and remove; otherwise cancel (spec §4.3). A concurrent `get` either
	/// observed the pre-eviction Document (if it raced before removal) or
	/// triggers a fresh construction afterward — never a half-torn-down one,
	/// because removal only happens after `shutdown()` has already detached
	/// the bus bridge.
	async fn try_evict(self: &Arc<Self>, name: &str, doc: &Arc<Document>) {
		if !doc.is_evictable().await {
			return;
		}
		// Re-check under the map: only remove the slot if it still points at
		// this exact Document (an intervening get() may have installed a new
		// slot after a prior removal raced us, though `get`'s single-flight
		// cell makes that window vanishingly unlikely in practice).
		if let Some(entry) = self.slots.get(name) {
			if let Some(current) = entry.get() {
				if !Arc::ptr_eq(current, doc) {
					return;
				}
			}
		}
		doc.shutdown();
		self.slots.remove(name);
		tracing::debug!(document = name, "evicted idle document");
	}

	pub fn len(&self) -> usize {
		self.slots.len()
	}

	pub fn is_empty(&self) -> bool {
		self.slots.is_empty()
	}

	/// `forEach(fn)` (spec §4.3): snapshot-safe iteration for metrics.
	/// `DashMap::iter` already yields a consistent, non-blocking snapshot
	/// view per shard, which is all the metrics sampler (component F) needs.
	pub async fn total_connections(&self) -> usize {
		let docs: Vec<Arc<Document>> = self
			.slots
			.iter()
			.filter_map(|entry| entry.value().get().cloned())
			.collect();
		let mut total = 0;
		for doc in docs {
			total += doc.ref_count().await;
		}
		total
	}

	/// Documents with `refCount == 0`, oldest `lastAccessed` first — the
	/// candidate order the memory manager evicts in (spec §4.6).
	pub async fn idle_candidates_oldest_first(&self) -> Vec<(Box<str>, Arc<Document>)> {
		let mut candidates = Vec::new();
		for entry in self.slots.iter() {
			if let Some(doc) = entry.value().get() {
				if doc.is_evictable().await {
					candidates.push((entry.key().clone(), doc.clone()));
				}
			}
		}
		let mut with_age = Vec::with_capacity(candidates.len());
		for (name, doc) in candidates {
			with_age.push((doc.last_accessed().await, name, doc));
		}
		with_age.sort_by_key(|(last_accessed, _, _)| *last_accessed);
		with_age.into_iter().map(|(_, name, doc)| (name, doc)).collect()
	}

	pub fn evict_now(&self, name: &str, doc: &Arc<Document>) {
		doc.shutdown();
		self.slots.remove(name);
	}

	#[cfg(test)]
	pub fn contains(&self, name: &str) -> bool {
		self.slots.contains_key(name)
	}
}


// vim: ts=4
