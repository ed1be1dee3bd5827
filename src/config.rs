//! Deployment configuration, loaded from the environment.
//!
//! Follows the teacher's `env::var(...).unwrap_or(...)` idiom
//! (`basic-server/src/main.rs`) rather than a config-file parser — the teacher's
//! server crate does not carry a file-based config layer either.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
	/// This instance's unique tag, copied into every outbound bus message
	/// (spec §3 `instanceTag`) and used for loop suppression (§3 invariant 4).
	pub instance_tag: Box<str>,

	/// Address the WebSocket/HTTP listener binds to.
	pub listen: Box<str>,

	// Debounce (spec §4.4).
	pub debounce_delay: Duration,
	pub debounce_max_delay: Duration,

	// Connection lifecycle (spec §4.5, §5).
	pub outbound_queue_capacity: usize,
	pub idle_timeout: Duration,
	pub handshake_timeout: Duration,
	pub close_flush_deadline: Duration,
	pub heartbeat_interval: Duration,

	// Registry / memory manager (spec §4.3, §4.6).
	pub idle_evict_ttl: Duration,
	pub memory_sample_interval: Duration,
	pub gc_threshold: f64,
	pub document_cache_size: usize,
	/// Undo/history buffer bound (spec §4.6: "optionally truncate ... to
	/// `historyLimit` entries"). This core keeps no separate history/undo
	/// buffer to truncate — `yrs` holds one CRDT state per document, not a
	/// bounded op log — so this is accepted and defaulted for configuration
	/// compatibility but not read by the memory manager.
	pub history_limit: usize,

	// Auth (spec §6).
	pub jwt_secret: Box<str>,
	pub jwt_issuer: Box<str>,
	pub jwt_audience: Box<str>,
}

impl Config {
	/// Load configuration from the environment, falling back to the spec's
	/// stated defaults for anything unset.
	pub fn from_env() -> Self {
		Config {
			instance_tag: env_or("INSTANCE_TAG", || uuid::Uuid::new_v4().to_string()).into(),
			listen: env_string("LISTEN_ADDR", "0.0.0.0:8080").into(),

			debounce_delay: Duration::from_millis(env_num("DEBOUNCE_DELAY_MS", 300)),
			debounce_max_delay: Duration::from_millis(env_num("DEBOUNCE_MAX_DELAY_MS", 1000)),

			outbound_queue_capacity: env_num("OUTBOUND_QUEUE_CAPACITY", 256) as usize,
			idle_timeout: Duration::from_secs(env_num("IDLE_TIMEOUT_SECS", 60)),
			handshake_timeout: Duration::from_secs(env_num("HANDSHAKE_TIMEOUT_SECS", 10)),
			close_flush_deadline: Duration::from_millis(env_num("CLOSE_FLUSH_DEADLINE_MS", 250)),
			heartbeat_interval: Duration::from_secs(env_num("HEARTBEAT_INTERVAL_SECS", 30)),

			idle_evict_ttl: Duration::from_secs(env_num("IDLE_EVICT_TTL_SECS", 300)),
			memory_sample_interval: Duration::from_secs(env_num("MEMORY_SAMPLE_INTERVAL_SECS", 30)),
			gc_threshold: env_f64("GC_THRESHOLD", 0.8),
			document_cache_size: env_num("DOCUMENT_CACHE_SIZE", 100) as usize,
			history_limit: env_num("HISTORY_LIMIT", 1000) as usize,

			jwt_secret: env_string("JWT_SECRET", "development-only-secret").into(),
			jwt_issuer: env_string("JWT_ISSUER", "braid-collab").into(),
			jwt_audience: env_string("JWT_AUDIENCE", "braid-collab-clients").into(),
		}
	}
}

fn env_string(key: &str, default: &str) -> String {
	std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or(key: &str, default: impl FnOnce() -> String) -> String {
	std::env::var(key).unwrap_or_else(|_| default())
}

fn env_num(key: &str, default: u64) -> u64 {
	std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
	std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

// vim: ts=4
