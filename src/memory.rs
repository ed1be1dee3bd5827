//! Memory manager (component F, spec §4.6): periodic sampling and
//! idle-document eviction under memory pressure.
//!
//! Grounded in the teacher's `adapters/rtdb-adapter-redb/src/lib.rs`
//! `spawn_eviction_task` (a `tokio::time::interval` loop spawned once at
//! boot that walks idle instances and evicts the oldest), generalized to
//! this core's `gc_threshold`/`document_cache_size` policy instead of a flat
//! idle timeout.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::config::Config;
use crate::metrics::ServerMetrics;
use crate::registry::DocumentRegistry;

/// Heap usage as the process actually measures it. Real heap instrumentation
/// (e.g. via an allocator hook) is an operational concern outside this core;
/// `sample()` is the seam a deployment wires up, defaulting to a stub that
/// never reports pressure so the loop is exercised even with nothing plugged
/// in.
pub trait HeapSampler: Send + Sync {
	fn sample(&self) -> (u64, u64);
}

pub struct NullHeapSampler;

impl HeapSampler for NullHeapSampler {
	fn sample(&self) -> (u64, u64) {
		(0, 1)
	}
}

pub struct MemoryManager {
	config: Arc<Config>,
	registry: Arc<DocumentRegistry>,
	metrics: Arc<ServerMetrics>,
	sampler: Arc<dyn HeapSampler>,
}

impl MemoryManager {
	pub fn new(config: Arc<Config>, registry: Arc<DocumentRegistry>, metrics: Arc<ServerMetrics>) -> Self {
		MemoryManager { config, registry, metrics, sampler: Arc::new(NullHeapSampler) }
	}

	pub fn with_sampler(mut self, sampler: Arc<dyn HeapSampler>) -> Self {
		self.sampler = sampler;
		self
	}

	/// Spawn the periodic sampling/eviction loop. Returns the task handle so
	/// callers (tests, graceful shutdown) can abort it.
	pub fn spawn(self) -> tokio::task::JoinHandle<()> {
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(self.config.memory_sample_interval);
			loop {
				ticker.tick().await;
				self.tick().await;
			}
		})
	}

	/// One sampling pass, exposed directly for tests (spec §4.6).
	pub async fn tick(&self) {
		let documents = self.registry.len();
		let connections = self.registry.total_connections().await;
		self.metrics.note_documents(documents as i64);
		self.metrics.note_connections(connections as i64);

		let (heap_used, heap_limit) = self.sampler.sample();
		let usage = if heap_limit == 0 { 0.0 } else { heap_used as f64 / heap_limit as f64 };
		if usage <= self.config.gc_threshold {
			return;
		}

		tracing::warn!(usage, threshold = self.config.gc_threshold, "heap pressure, evicting idle documents");
		let candidates = self.registry.idle_candidates_oldest_first().await;
		let mut remaining = documents;
		for (name, doc) in candidates {
			if remaining <= self.config.document_cache_size {
				break;
			}
			// Never evict a document with refCount > 0 or a pending debounce
			// (spec §4.6); `idle_candidates_oldest_first` already filtered on
			// `is_evictable`, but a connection may have attached since that
			// snapshot was taken, so re-check just before tearing down.
			if !doc.is_evictable().await {
				continue;
			}
			self.registry.evict_now(&name, &doc);
			remaining -= 1;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bus::LocalBus;
	use crate::types::Permission;

	struct FixedSampler {
		used: u64,
		limit: u64,
	}

	impl HeapSampler for FixedSampler {
		fn sample(&self) -> (u64, u64) {
			(self.used, self.limit)
		}
	}

	#[tokio::test]
	async fn evicts_idle_documents_when_over_gc_threshold() {
		let mut config = Config::from_env();
		config.gc_threshold = 0.5;
		config.document_cache_size = 0;
		let config = Arc::new(config);
		let metrics = Arc::new(ServerMetrics::default());
		let registry = DocumentRegistry::new(LocalBus::new(16), config.clone(), metrics.clone());

		let doc = registry.get("idle-doc").await;
		let (client_id, _queue) = doc.attach(vec![Permission::Read]).await;
		doc.detach(client_id).await;
		assert!(doc.is_evictable().await);

		let manager = MemoryManager::new(config, registry.clone(), metrics)
			.with_sampler(Arc::new(FixedSampler { used: 9, limit: 10 }));
		manager.tick().await;

		assert!(!registry.contains("idle-doc"));
	}

	#[tokio::test]
	async fn never_evicts_a_document_with_active_connections() {
		let mut config = Config::from_env();
		config.gc_threshold = 0.1;
		config.document_cache_size = 0;
		let config = Arc::new(config);
		let metrics = Arc::new(ServerMetrics::default());
		let registry = DocumentRegistry::new(LocalBus::new(16), config.clone(), metrics.clone());

		let doc = registry.get("busy-doc").await;
		let (_client_id, _queue) = doc.attach(vec![Permission::Read]).await;

		let manager = MemoryManager::new(config, registry.clone(), metrics)
			.with_sampler(Arc::new(FixedSampler { used: 9, limit: 10 }));
		manager.tick().await;

		assert!(registry.contains("busy-doc"));
	}

	#[tokio::test]
	async fn below_threshold_does_not_evict() {
		let mut config = Config::from_env();
		config.gc_threshold = 0.8;
		let config = Arc::new(config);
		let metrics = Arc::new(ServerMetrics::default());
		let registry = DocumentRegistry::new(LocalBus::new(16), config.clone(), metrics.clone());

		let doc = registry.get("quiet-doc").await;
		let (client_id, _queue) = doc.attach(vec![Permission::Read]).await;
		doc.detach(client_id).await;

		let manager = MemoryManager::new(config, registry.clone(), metrics)
			.with_sampler(Arc::new(FixedSampler { used: 1, limit: 10 }));
		manager.tick().await;

		assert!(registry.contains("quiet-doc"));
	}
}

// vim: ts=4
