//! Awareness: ephemeral, non-CRDT per-client presence state (spec §3, §4.4).
//!
//! The teacher's `crdt/websocket.rs::AwarenessState` is exactly this shape
//! (user, cursor, selection, color, timestamp) encoded as JSON rather than the
//! Yjs binary awareness protocol — the teacher's own comment notes Yjs
//! awareness is opaque binary handled client-side. `yrs`'s own awareness
//! support lives behind its `sync` feature, which the teacher does not enable
//! for the base `yrs` dependency; this core follows the same path the teacher
//! actually ships and keeps awareness as an explicit, diffable JSON map rather
//! than pulling in an unused optional feature just to match a name.

use dashmap::DashMap;
use serde_json::Value;

use crate::types::ClientId;

#[derive(Clone, Debug, Default)]
pub struct AwarenessChange {
	pub added: Vec<ClientId>,
	pub updated: Vec<ClientId>,
	pub removed: Vec<ClientId>,
}

impl AwarenessChange {
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
	}
}

/// Per-document awareness table: `clientId -> opaque state blob` (spec §3).
#[derive(Default)]
pub struct AwarenessState {
	states: DashMap<ClientId, Value>,
}

impl AwarenessState {
	pub fn new() -> Self {
		Self::default()
	}

	/// Local-state set (spec §4.1's `awareness` supports "local-state set").
	/// Returns the `(added, updated, removed)` triple produced by this single
	/// change, for the caller to fan out (spec §4.4's awareness broadcast).
	pub fn set_local(&self, client_id: ClientId, state: Value) -> AwarenessChange {
		let existed = self.states.insert(client_id, state).is_some();
		if existed {
			AwarenessChange { added: vec![], updated: vec![client_id], removed: vec![] }
		} else {
			AwarenessChange { added: vec![client_id], updated: vec![], removed: vec![] }
		}
	}

	/// Clears one client's entry (spec §4.4 `detach`: "clear conn's awareness
	/// entry, which triggers a 'removed' awareness broadcast").
	pub fn remove(&self, client_id: ClientId) -> AwarenessChange {
		if self.states.remove(&client_id).is_some() {
			AwarenessChange { added: vec![], updated: vec![], removed: vec![client_id] }
		} else {
			AwarenessChange::default()
		}
	}

	/// Full state-vector-equivalent snapshot, used to answer
	/// `QueryAwareness` (spec §6) and the post-handshake sync.
	pub fn full_state(&self) -> Vec<(ClientId, Value)> {
		self.states.iter().map(|e| (*e.key(), e.value().clone())).collect()
	}

	pub fn encode_full(&self) -> Vec<u8> {
		encode_states(&self.full_state())
	}

	pub fn encode_change(&self, change: &AwarenessChange) -> Vec<u8> {
		let ids: Vec<ClientId> =
			change.added.iter().chain(change.updated.iter()).copied().collect();
		let mut states: Vec<(ClientId, Value)> = ids
			.into_iter()
			.filter_map(|id| self.states.get(&id).map(|s| (id, s.clone())))
			.collect();
		for id in &change.removed {
			states.push((*id, Value::Null));
		}
		encode_states(&states)
	}
}

fn encode_states(states: &[(ClientId, Value)]) -> Vec<u8> {
	let obj: serde_json::Map<String, Value> =
		states.iter().map(|(id, v)| (id.to_string(), v.clone())).collect();
	serde_json::to_vec(&Value::Object(obj)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn set_local_reports_added_then_updated() {
		let awareness = AwarenessState::new();
		let added = awareness.set_local(1, json!({"name": "alice"}));
		assert_eq!(added.added, vec![1]);

		let updated = awareness.set_local(1, json!({"name": "alice2"}));
		assert_eq!(updated.updated, vec![1]);
	}

	#[test]
	fn remove_reports_removed_only_if_present() {
		let awareness = AwarenessState::new();
		assert!(awareness.remove(5).is_empty());

		awareness.set_local(5, json!({}));
		let change = awareness.remove(5);
		assert_eq!(change.removed, vec![5]);
	}
}

// vim: ts=4
