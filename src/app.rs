//! Process-wide application state (spec §9: "Global singletons — constructed
//! once at boot; passed explicitly to handlers; teardown in reverse order at
//! shutdown").
//!
//! Grounded in the teacher's `core/app.rs::AppBuilder`/`App`, which is the
//! same shape: one struct holding every shared singleton, cheap to clone
//! (`Arc` internally) and threaded through axum's `State` extractor.

use std::sync::Arc;

use crate::bus::{Bus, LocalBus};
use crate::config::Config;
use crate::memory::MemoryManager;
use crate::metrics::ServerMetrics;
use crate::registry::DocumentRegistry;

#[derive(Clone)]
pub struct App(Arc<AppState>);

pub struct AppState {
	pub config: Arc<Config>,
	pub registry: Arc<DocumentRegistry>,
	pub bus: Arc<dyn Bus>,
	pub metrics: Arc<ServerMetrics>,
}

impl App {
	/// Construct the process singletons in dependency order (bus, then
	/// registry/metrics which depend on it) and wire the memory manager
	/// (component F) as a background task, mirroring
	/// `AppBuilder::new().build()` in the teacher.
	pub fn new(config: Config) -> (App, MemoryManager) {
		let config = Arc::new(config);
		let bus: Arc<dyn Bus> = LocalBus::new(config.outbound_queue_capacity);
		let metrics = Arc::new(ServerMetrics::default());
		let registry = DocumentRegistry::new(bus.clone(), config.clone(), metrics.clone());

		let state = Arc::new(AppState { config: config.clone(), registry: registry.clone(), bus, metrics });
		let memory = MemoryManager::new(config, registry, state.metrics.clone());
		(App(state), memory)
	}

	/// Construct over a caller-supplied bus (tests wiring two `App`s over one
	/// [`LocalBus`] to exercise cross-instance convergence, spec §8 scenario 2).
	pub fn with_bus(config: Config, bus: Arc<dyn Bus>) -> (App, MemoryManager) {
		let config = Arc::new(config);
		let metrics = Arc::new(ServerMetrics::default());
		let registry = DocumentRegistry::new(bus.clone(), config.clone(), metrics.clone());
		let state = Arc::new(AppState { config: config.clone(), registry: registry.clone(), bus, metrics });
		let memory = MemoryManager::new(config, registry, state.metrics.clone());
		(App(state), memory)
	}
}

impl std::ops::Deref for App {
	type Target = AppState;

	fn deref(&self) -> &AppState {
		&self.0
	}
}

// vim: ts=4
