//! Common types shared across the sync core.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Monotonic-ish wall clock timestamp, seconds since epoch.
///
/// Mirrors the teacher's `Timestamp` newtype: a thin wrapper rather than a raw
/// `u64` so call sites read as time, not byte counts.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub fn now() -> Self {
		let secs = SystemTime::now()
			.duration_since(SystemTime::UNIX_EPOCH)
			.unwrap_or_default()
			.as_secs();
		Timestamp(secs as i64)
	}

	pub fn age_secs(&self, now: Timestamp) -> i64 {
		(now.0 - self.0).max(0)
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Per-connection client identifier, assigned once at attach and unique within
/// its Document for the lifetime of the attachment (spec §3, Connection.clientId).
pub type ClientId = u32;

/// A permission a connecting user's token may carry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
	Read,
	Write,
	Admin,
}

impl Permission {
	pub fn as_str(self) -> &'static str {
		match self {
			Permission::Read => "read",
			Permission::Write => "write",
			Permission::Admin => "admin",
		}
	}
}

/// Claims extracted from a verified bearer token (spec §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserClaims {
	pub user_id: Box<str>,
	pub username: Box<str>,
	pub permissions: Vec<Permission>,
	pub exp: Timestamp,
}

impl UserClaims {
	pub fn has(&self, perm: Permission) -> bool {
		self.permissions.contains(&perm) || self.permissions.contains(&Permission::Admin)
	}

	pub fn is_expired(&self, now: Timestamp) -> bool {
		now.0 >= self.exp.0
	}
}

// vim: ts=4
