//! Bearer token extraction and HMAC-SHA256 JWT verification (spec §6).
//!
//! Grounded in the teacher's `core/route_auth.rs`, which signs/verifies an
//! HS256 JWT with `jsonwebtoken` the same way; extended here with the
//! `iss`/`aud` claims and the `permissions` list spec §6 requires.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL, Engine};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{ClResult, Error};
use crate::types::{Permission, Timestamp, UserClaims};

#[derive(Debug, Deserialize, Serialize)]
struct Claims {
	user_id: Box<str>,
	username: Box<str>,
	permissions: Vec<String>,
	iss: Box<str>,
	aud: Box<str>,
	iat: i64,
	exp: i64,
}

/// The two places a bearer token may travel, in the priority order spec §6
/// mandates: the `auth.<base64url-token>` WebSocket subprotocol first, then the
/// `token` query parameter.
pub fn extract_token(subprotocols: Option<&str>, query_token: Option<&str>) -> Option<Box<str>> {
	if let Some(protocols) = subprotocols {
		for candidate in protocols.split(',').map(str::trim) {
			if let Some(encoded) = candidate.strip_prefix("auth.") {
				if let Ok(decoded) = BASE64_URL.decode(encoded) {
					if let Ok(token) = String::from_utf8(decoded) {
						return Some(token.into());
					}
				}
			}
		}
	}

	query_token.map(|t| t.into())
}

/// The `auth.*` subprotocol entry the server should echo back per spec §6,
/// if the client offered exactly one.
pub fn chosen_subprotocol(subprotocols: Option<&str>) -> Option<String> {
	subprotocols
		.into_iter()
		.flat_map(|p| p.split(','))
		.map(str::trim)
		.find(|p| p.starts_with("auth."))
		.map(str::to_string)
}

/// Verify a token's signature and expiry, and parse its claims (spec §6).
pub fn verify_token(config: &Config, token: &str) -> ClResult<UserClaims> {
	let mut validation = Validation::new(Algorithm::HS256);
	validation.set_issuer(&[config.jwt_issuer.as_ref()]);
	validation.set_audience(&[config.jwt_audience.as_ref()]);

	let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
	let data = decode::<Claims>(token, &decoding_key, &validation)?;
	let claims = data.claims;

	let permissions = claims
		.permissions
		.iter()
		.filter_map(|p| match p.as_str() {
			"read" => Some(Permission::Read),
			"write" => Some(Permission::Write),
			"admin" => Some(Permission::Admin),
			_ => None,
		})
		.collect();

	let user = UserClaims {
		user_id: claims.user_id,
		username: claims.username,
		permissions,
		exp: Timestamp(claims.exp),
	};

	if user.is_expired(Timestamp::now()) {
		return Err(Error::AuthExpired);
	}

	Ok(user)
}

/// Issue a token. Exposed for tests and local tooling; production deployments
/// mint tokens out-of-band (spec §1, the token-minting authority is an external
/// collaborator).
pub fn issue_token(
	config: &Config,
	user_id: &str,
	username: &str,
	permissions: &[Permission],
	ttl_secs: i64,
) -> ClResult<String> {
	let now = Timestamp::now();
	let claims = Claims {
		user_id: user_id.into(),
		username: username.into(),
		permissions: permissions.iter().map(|p| p.as_str().to_string()).collect(),
		iss: config.jwt_issuer.clone(),
		aud: config.jwt_audience.clone(),
		iat: now.0,
		exp: now.0 + ttl_secs,
	};

	let token = jsonwebtoken::encode(
		&jsonwebtoken::Header::new(Algorithm::HS256),
		&claims,
		&jsonwebtoken::EncodingKey::from_secret(config.jwt_secret.as_bytes()),
	)?;

	Ok(token)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_config() -> Config {
		let mut c = Config::from_env();
		c.jwt_secret = "test-secret".into();
		c.jwt_issuer = "test-issuer".into();
		c.jwt_audience = "test-aud".into();
		c
	}

	#[test]
	fn round_trips_a_valid_token() {
		let config = test_config();
		let token = issue_token(&config, "u1", "alice", &[Permission::Write], 3600).unwrap();
		let claims = verify_token(&config, &token).unwrap();
		assert_eq!(claims.user_id.as_ref(), "u1");
		assert!(claims.has(Permission::Write));
	}

	#[test]
	fn rejects_expired_token() {
		let config = test_config();
		let token = issue_token(&config, "u1", "alice", &[Permission::Read], -10).unwrap();
		let err = verify_token(&config, &token).unwrap_err();
		assert!(matches!(err, Error::AuthExpired));
	}

	#[test]
	fn extracts_subprotocol_token_in_priority_over_query() {
		let encoded = BASE64_URL.encode(b"secret-token");
		let header = format!("auth.{}, other-proto", encoded);
		let extracted = extract_token(Some(&header), Some("ignored"));
		assert_eq!(extracted.as_deref(), Some("secret-token"));
	}

	#[test]
	fn falls_back_to_query_token() {
		let extracted = extract_token(None, Some("qtoken"));
		assert_eq!(extracted.as_deref(), Some("qtoken"));
	}
}

// vim: ts=4
