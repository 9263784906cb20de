//! Module containing error types used in Ferry

use std::fmt;
use std::io;

use err_derive::Error;

/// Side of the replication pipe on which a gateway error was raised.
///
/// The retry runner and the outcome settlement use this tag: transient
/// target errors trigger destination host failover, permanent source
/// errors skip the entry without a FAILED publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
	Source,
	Target,
}

impl fmt::Display for Origin {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Origin::Source => write!(f, "source"),
			Origin::Target => write!(f, "target"),
		}
	}
}

/// Regroup all Ferry errors
#[derive(Debug, Error)]
pub enum Error {
	#[error(display = "IO error: {}", _0)]
	Io(#[error(source)] #[error(from)] io::Error),

	#[error(display = "HTTP error: {}", _0)]
	Http(#[error(source)] #[error(from)] http::Error),

	#[error(display = "Hyper error: {}", _0)]
	Hyper(#[error(source)] #[error(from)] hyper::Error),

	#[error(display = "JSON error: {}", _0)]
	Json(#[error(source)] #[error(from)] serde_json::Error),

	#[error(display = "Invalid TOML: {}", _0)]
	Toml(#[error(source)] #[error(from)] toml::de::Error),

	// ---- Replication error taxonomy ----
	/// Network timeouts, 5xx, throttling. The only retryable kind.
	#[error(display = "transient {} error: {}", _0, _1)]
	Transient(Origin, String),

	/// The source rejected us outright (NoSuchEntity, AccessDenied, BadRole).
	#[error(display = "source rejected request: {}", _0)]
	PermanentSource(String),

	/// The source object does not exist (anymore).
	#[error(display = "object not found: {}/{}", bucket, key)]
	ObjNotFound { bucket: String, key: String },

	/// The source content changed under us, or the entry no longer
	/// describes a replicable state.
	#[error(display = "invalid object state: {}", _0)]
	InvalidObjectState(String),

	/// A replication rule precondition did not hold for this entry.
	#[error(display = "replication precondition failed: {}", _0)]
	PreconditionFailed(String),

	/// The destination rejected the write with a non-retryable error.
	#[error(display = "destination rejected request: {}", _0)]
	PermanentTarget(String),

	/// A log record that cannot be decoded into a queue entry.
	#[error(display = "malformed queue entry: {}", _0)]
	Malformed(String),

	/// The worker is shutting down; the entry must be redelivered.
	#[error(display = "replication worker is shutting down")]
	Shutdown,

	#[error(display = "{}", _0)]
	Message(String),
}

impl Error {
	pub fn transient(origin: Origin, msg: impl fmt::Display) -> Self {
		Error::Transient(origin, msg.to_string())
	}

	/// Whether the retry runner may re-attempt the failed call
	pub fn retryable(&self) -> bool {
		matches!(self, Error::Transient(..))
	}

	/// Which side of the pipe raised this error, when known
	pub fn origin(&self) -> Option<Origin> {
		match self {
			Error::Transient(origin, _) => Some(*origin),
			Error::PermanentSource(_) | Error::ObjNotFound { .. } => Some(Origin::Source),
			Error::PermanentTarget(_) => Some(Origin::Target),
			_ => None,
		}
	}
}

impl From<&str> for Error {
	fn from(v: &str) -> Error {
		Error::Message(v.to_string())
	}
}

impl From<String> for Error {
	fn from(v: String) -> Error {
		Error::Message(v)
	}
}

/// Trait to map error to the Ferry error type, with context
pub trait ErrorContext<T, E> {
	fn err_context<C: std::borrow::Borrow<str>>(self, ctx: C) -> Result<T, Error>;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
	E: fmt::Display,
{
	#[inline]
	fn err_context<C: std::borrow::Borrow<str>>(self, ctx: C) -> Result<T, Error> {
		self.map_err(|e| Error::Message(format!("{}\n{}", ctx.borrow(), e)))
	}
}

/// Trait to map any option to the Ferry error type
pub trait OkOrMessage {
	type S;
	fn ok_or_message<M: Into<String>>(self, message: M) -> Result<Self::S, Error>;
}

impl<T> OkOrMessage for Option<T> {
	type S = T;
	fn ok_or_message<M: Into<String>>(self, message: M) -> Result<T, Error> {
		self.ok_or_else(|| Error::Message(message.into()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_classification() {
		let e = Error::transient(Origin::Target, "connection reset");
		assert!(e.retryable());
		assert_eq!(e.origin(), Some(Origin::Target));

		let e = Error::PermanentTarget("unsupported storage class".into());
		assert!(!e.retryable());
		assert_eq!(e.origin(), Some(Origin::Target));

		let e = Error::ObjNotFound {
			bucket: "b".into(),
			key: "k".into(),
		};
		assert!(!e.retryable());
		assert_eq!(e.origin(), Some(Origin::Source));

		assert_eq!(Error::Shutdown.origin(), None);
	}
}
