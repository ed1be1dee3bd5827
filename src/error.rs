//! Error taxonomy (spec §7).

pub type ClResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	// AuthError — closes with 1008, never retried.
	AuthMissing,
	AuthMalformed,
	AuthExpired,
	AuthWrongIssuerOrAudience,
	AuthInsufficientPermission,

	// ProtocolError — close 1011, logged at warn.
	ProtocolMalformedFrame(String),
	ProtocolUnknownChannel(u8),
	ProtocolWrongState(&'static str),

	// ApplyError — logged at error, connection stays open.
	Apply(String),

	// BusTransientError — logged, publish retried once by the bus client itself.
	BusTransient(String),

	Internal(String),
	Io(std::io::Error),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{:?}", self)
	}
}

impl std::error::Error for Error {}

/// Close code to use when tearing down a connection for this error, if any
/// (spec §6 Close codes / §7 taxonomy). `None` means the error does not itself
/// terminate the connection (e.g. `ApplyError`, `BusTransientError`).
impl Error {
	pub fn close_code(&self) -> Option<u16> {
		match self {
			Error::AuthMissing
			| Error::AuthMalformed
			| Error::AuthExpired
			| Error::AuthWrongIssuerOrAudience
			| Error::AuthInsufficientPermission => Some(1008),
			Error::ProtocolMalformedFrame(_)
			| Error::ProtocolUnknownChannel(_)
			| Error::ProtocolWrongState(_) => Some(1011),
			Error::Internal(_) | Error::Io(_) => Some(1011),
			Error::Apply(_) | Error::BusTransient(_) => None,
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Error::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		Error::ProtocolMalformedFrame(format!("json: {}", err))
	}
}

impl From<jsonwebtoken::errors::Error> for Error {
	fn from(err: jsonwebtoken::errors::Error) -> Self {
		use jsonwebtoken::errors::ErrorKind;
		match err.kind() {
			ErrorKind::ExpiredSignature => Error::AuthExpired,
			ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => Error::AuthWrongIssuerOrAudience,
			_ => Error::AuthMalformed,
		}
	}
}

impl From<tokio::task::JoinError> for Error {
	fn from(err: tokio::task::JoinError) -> Self {
		Error::Internal(format!("task join error: {}", err))
	}
}

// vim: ts=4
