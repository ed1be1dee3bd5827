//! CRDT adapter (component A, spec §4.1): a thin wrapper over `yrs`, the Rust
//! port of Yjs the teacher also depends on for its own `crdt` subsystem
//! (`crates/cloudillo-crdt/Cargo.toml`). No policy lives here — debouncing,
//! fan-out and bus bridging are all `Document`'s job (§4.4).

use parking_lot::Mutex;
use std::sync::Arc;
use yrs::{updates::decoder::Decode, ReadTxn, StateVector, Transact, Update};

use crate::error::{ClResult, Error};

/// One replica's CRDT state plus the synchronous "update produced" feed spec
/// §4.1 requires (`subscribeUpdates(fn(bytes, origin))`). `origin` is not a
/// yrs concept — it is attached by the caller (`Document`), since only the
/// caller knows which connection or bus delivery produced a given apply.
pub struct CrdtReplica {
	doc: yrs::Doc,
	produced: Arc<Mutex<Vec<Vec<u8>>>>,
	// Keeping the subscription alive keeps the observer registered; dropping
	// it unsubscribes synchronously (spec §4.1).
	_update_sub: yrs::Subscription,
}

impl CrdtReplica {
	pub fn new() -> Self {
		let doc = yrs::Doc::new();
		let produced = Arc::new(Mutex::new(Vec::new()));
		let sink = produced.clone();
		let sub = doc.observe_update_v1(move |_txn, event| {
			sink.lock().push(event.update.clone());
		});

		CrdtReplica {
			doc,
			produced: produced.clone(),
			_update_sub: sub.expect("observe_update_v1 is only called once per replica"),
		}
	}

	/// Apply update bytes from any source (local connection, bus delivery, or
	/// a debounce-flush merge). Returns every update the apply produced on the
	/// synchronous observer feed — ordinarily exactly one blob equal to (or a
	/// re-encoding of) the input, but yrs is free to coalesce.
	///
	/// On malformed bytes, returns `Error::Apply` (spec §7 `ApplyError`): the
	/// caller drops the update and keeps the connection open.
	pub fn apply(&self, bytes: &[u8]) -> ClResult<Vec<Vec<u8>>> {
		let update = Update::decode_v1(bytes).map_err(|e| Error::Apply(e.to_string()))?;
		{
			let mut txn = self.doc.transact_mut();
			txn.apply_update(update).map_err(|e| Error::Apply(e.to_string()))?;
		}
		Ok(std::mem::take(&mut *self.produced.lock()))
	}

	/// `diffSince(stateVector) -> updateBytes` (spec §4.1).
	pub fn diff_since(&self, remote_state_vector: &[u8]) -> ClResult<Vec<u8>> {
		let sv = StateVector::decode_v1(remote_state_vector)
			.map_err(|e| Error::ProtocolMalformedFrame(format!("state vector: {}", e)))?;
		let txn = self.doc.transact();
		Ok(txn.encode_state_as_update_v1(&sv))
	}

	/// `stateVector() -> bytes` (spec §4.1).
	pub fn state_vector(&self) -> Vec<u8> {
		self.doc.transact().state_vector().encode_v1()
	}

	/// Everything needed to reconstruct the replica from scratch, used for a
	/// snapshot-style catch-up.
	pub fn full_update(&self) -> Vec<u8> {
		self.doc.transact().encode_state_as_update_v1(&StateVector::default())
	}

	/// `merge(updates) -> bytes` (spec §4.1). Builds a scratch replica, applies
	/// every pending update to it, and encodes the result as one update from
	/// an empty state vector. On failure the caller (the debounce flush path,
	/// spec §4.4) falls back to treating each pending update as its own blob.
	pub fn merge(updates: &[Vec<u8>]) -> ClResult<Vec<u8>> {
		let scratch = yrs::Doc::new();
		{
			let mut txn = scratch.transact_mut();
			for bytes in updates {
				let update =
					Update::decode_v1(bytes).map_err(|e| Error::Apply(format!("merge decode: {}", e)))?;
				txn.apply_update(update).map_err(|e| Error::Apply(format!("merge apply: {}", e)))?;
			}
		}
		Ok(scratch.transact().encode_state_as_update_v1(&StateVector::default()))
	}
}

impl Default for CrdtReplica {
	fn default() -> Self {
		Self::new()
	}
}


#[cfg(test)]
mod tests {
	use super::*;

	fn sample_update(replica: &CrdtReplica, text: &str) -> Vec<u8> {
		tests_support::mutate_and_capture(replica, text)
	}

	#[test]
	fn apply_then_state_vector_reflect_the_update() {
		let source = CrdtReplica::new();
		let bytes = sample_update(&source, "hello");

		let target = CrdtReplica::new();
		let produced = target.apply(&bytes).unwrap();
		assert_eq!(produced.len(), 1);
		assert_eq!(target.state_vector(), source.state_vector());
	}

	#[test]
	fn apply_rejects_garbage_bytes() {
		let replica = CrdtReplica::new();
		let err = replica.apply(&[0xFF, 0xFF, 0xFF]).unwrap_err();
		assert!(matches!(err, Error::Apply(_)));
	}

	#[test]
	fn merge_is_equivalent_to_sequential_apply() {
		let source = CrdtReplica::new();
		let u1 = sample_update(&source, "a");
		let u2 = sample_update(&source, "b");

		let merged = CrdtReplica::merge(&[u1.clone(), u2.clone()]).unwrap();

		let sequential = CrdtReplica::new();
		sequential.apply(&u1).unwrap();
		sequential.apply(&u2).unwrap();

		let from_merge = CrdtReplica::new();
		from_merge.apply(&merged).unwrap();

		assert_eq!(from_merge.state_vector(), sequential.state_vector());
	}

	#[test]
	fn diff_since_empty_state_vector_equals_full_update() {
		let replica = CrdtReplica::new();
		sample_update(&replica, "x");
		let diff = replica.diff_since(&StateVector::default().encode_v1()).unwrap();
		let full = replica.full_update();

		let a = CrdtReplica::new();
		a.apply(&diff).unwrap();
		let b = CrdtReplica::new();
		b.apply(&full).unwrap();
		assert_eq!(a.state_vector(), b.state_vector());
	}
}

// vim: ts=4
