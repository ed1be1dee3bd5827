//! Process-wide counters, surfaced through `/stats` (spec §6).
//!
//! Grounded in the teacher's `ws_broadcast.rs::ChannelStats` (a plain snapshot
//! struct computed on demand) but backed by atomics so hot paths never take a
//! lock just to bump a counter.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Default)]
pub struct BusCounters {
	pub messages_sent: AtomicU64,
	pub messages_received: AtomicU64,
	pub messages_suppressed_loop: AtomicU64,
}

impl BusCounters {
	pub fn snapshot(&self) -> BusCountersSnapshot {
		BusCountersSnapshot {
			messages_sent: self.messages_sent.load(Ordering::Relaxed),
			messages_received: self.messages_received.load(Ordering::Relaxed),
			messages_suppressed_loop: self.messages_suppressed_loop.load(Ordering::Relaxed),
		}
	}
}

#[derive(Serialize)]
pub struct BusCountersSnapshot {
	pub messages_sent: u64,
	pub messages_received: u64,
	pub messages_suppressed_loop: u64,
}

/// Per-connection traffic counters (SPEC_FULL §2, grounded in the teacher's
/// `CrdtConnection`/`RtdbConnection` per-connection fields), aggregated across
/// every connection this instance has ever served rather than kept per
/// connection — `/stats` reports instance-wide totals, not a live connection
/// list.
#[derive(Default)]
pub struct ConnectionCounters {
	pub bytes_in: AtomicU64,
	pub bytes_out: AtomicU64,
	pub messages_in: AtomicU64,
	pub messages_out: AtomicU64,
}

impl ConnectionCounters {
	pub fn note_inbound(&self, bytes: usize) {
		self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
		self.messages_in.fetch_add(1, Ordering::Relaxed);
	}

	pub fn note_outbound(&self, bytes: usize) {
		self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
		self.messages_out.fetch_add(1, Ordering::Relaxed);
	}

	pub fn snapshot(&self) -> ConnectionCountersSnapshot {
		ConnectionCountersSnapshot {
			bytes_in: self.bytes_in.load(Ordering::Relaxed),
			bytes_out: self.bytes_out.load(Ordering::Relaxed),
			messages_in: self.messages_in.load(Ordering::Relaxed),
			messages_out: self.messages_out.load(Ordering::Relaxed),
		}
	}
}

#[derive(Serialize)]
pub struct ConnectionCountersSnapshot {
	pub bytes_in: u64,
	pub bytes_out: u64,
	pub messages_in: u64,
	pub messages_out: u64,
}

#[derive(Default)]
pub struct ServerMetrics {
	pub bus: BusCounters,
	pub connections: ConnectionCounters,
	pub backpressure_drops: AtomicU64,
	pub apply_errors: AtomicU64,
	pub peak_documents: AtomicI64,
	pub peak_connections: AtomicI64,
}

impl ServerMetrics {
	pub fn note_documents(&self, count: i64) {
		self.peak_documents.fetch_max(count, Ordering::Relaxed);
	}

	pub fn note_connections(&self, count: i64) {
		self.peak_connections.fetch_max(count, Ordering::Relaxed);
	}

	pub fn snapshot(&self, documents: usize, connections: usize) -> StatsSnapshot {
		StatsSnapshot {
			documents,
			connections,
			backpressure_drops: self.backpressure_drops.load(Ordering::Relaxed),
			apply_errors: self.apply_errors.load(Ordering::Relaxed),
			peak_documents: self.peak_documents.load(Ordering::Relaxed),
			peak_connections: self.peak_connections.load(Ordering::Relaxed),
			bus: self.bus.snapshot(),
			traffic: self.connections.snapshot(),
		}
	}
}

#[derive(Serialize)]
pub struct StatsSnapshot {
	pub documents: usize,
	pub connections: usize,
	pub backpressure_drops: u64,
	pub apply_errors: u64,
	pub peak_documents: i64,
	pub peak_connections: i64,
	pub bus: BusCountersSnapshot,
	pub traffic: ConnectionCountersSnapshot,
}

// vim: ts=4
