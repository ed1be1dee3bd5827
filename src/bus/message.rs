//! Wire form of a bus message (spec §3 `BusMessage`, §6 pub/sub channel).

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Payload published on `doc:<documentName>:updates`. JSON-encoded per spec
/// §6; a production deployment free to swap this for a compact binary form is
/// noted in spec §9 as an implementation choice, but every instance must agree
/// on one, so this core picks JSON (matches the teacher's `ws_bus.rs`
/// `BusMessage`, which is also JSON-over-the-channel).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BusMessage {
	pub document_name: Box<str>,
	#[serde(with = "update_bytes")]
	pub update: Vec<u8>,
	/// Opaque tag identifying the local origin connection that produced this
	/// update, carried only for diagnostics — it does not participate in
	/// convergence (spec §3 invariant 3).
	pub origin: Box<str>,
	pub instance_tag: Box<str>,
	pub message_id: Box<str>,
	pub timestamp: Timestamp,
}

impl BusMessage {
	pub fn channel_for(document_name: &str) -> String {
		format!("doc:{}:updates", document_name)
	}

	/// Loop suppression (spec §3 invariant 4, §4.2): a message whose
	/// `instance_tag` equals the receiver's own must not be applied or
	/// re-published.
	pub fn is_from_self(&self, own_instance_tag: &str) -> bool {
		self.instance_tag.as_ref() == own_instance_tag
	}
}

/// CRDT updates are binary; serde_json can't hold raw bytes efficiently, so we
/// base64-encode them for the JSON wire form (same approach the teacher takes
/// for binary awareness payloads in `crdt/websocket.rs`, which falls back to
/// UTF-8/JSON only where the payload actually is text).
mod update_bytes {
	use base64::{engine::general_purpose::STANDARD, Engine};
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
		s.serialize_str(&STANDARD.encode(bytes))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
		let encoded = String::deserialize(d)?;
		STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_through_json() {
		let msg = BusMessage {
			document_name: "doc-1".into(),
			update: vec![0, 1, 2, 255],
			origin: "conn-7".into(),
			instance_tag: "inst-a".into(),
			message_id: "m-1".into(),
			timestamp: Timestamp::now(),
		};
		let json = serde_json::to_string(&msg).unwrap();
		let back: BusMessage = serde_json::from_str(&json).unwrap();
		assert_eq!(back.update, msg.update);
		assert_eq!(back.instance_tag, msg.instance_tag);
	}

	#[test]
	fn loop_suppression_matches_own_instance_tag() {
		let msg = BusMessage {
			document_name: "d".into(),
			update: vec![],
			origin: "c".into(),
			instance_tag: "inst-a".into(),
			message_id: "m".into(),
			timestamp: Timestamp::now(),
		};
		assert!(msg.is_from_self("inst-a"));
		assert!(!msg.is_from_self("inst-b"));
	}
}

// vim: ts=4
