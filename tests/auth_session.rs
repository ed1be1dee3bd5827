//! Token lifecycle (spec §6): a short-lived token verifies while still valid,
//! then the same claims are recognized as expired once their `exp` has
//! passed — the lazy, per-frame check `connection::handle_connection` runs
//! without re-verifying the signature on every message.

mod support;

use std::time::Duration;

use braid_collab::auth::{issue_token, verify_token};
use braid_collab::types::{Permission, Timestamp};

#[tokio::test]
async fn a_token_issued_with_a_short_ttl_expires_mid_session() {
	let config = support::test_config();
	let token = issue_token(&config, "u1", "alice", &[Permission::Write], 1).unwrap();

	let claims = verify_token(&config, &token).unwrap();
	assert!(!claims.is_expired(Timestamp::now()));

	tokio::time::sleep(Duration::from_millis(2100)).await;
	assert!(claims.is_expired(Timestamp::now()), "claims must be recognized as expired after exp passes");

	// A fresh verification attempt against the now-expired token is rejected
	// outright too, matching the upgrade-time check in routes::get_document_ws.
	assert!(verify_token(&config, &token).is_err());
}

#[tokio::test]
async fn write_permission_implies_read_access_is_never_granted_implicitly() {
	let config = support::test_config();
	let token = issue_token(&config, "u2", "bob", &[Permission::Read], 3600).unwrap();
	let claims = verify_token(&config, &token).unwrap();

	assert!(claims.has(Permission::Read));
	assert!(!claims.has(Permission::Write));
}
