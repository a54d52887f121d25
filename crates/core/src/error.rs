//! Error types shared across the session layer.

use std::time::Duration;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ScribeError>;

/// Failures surfaced by the session layer.
///
/// Protocol-level failures are returned to the specific caller that issued
/// the command; they never abort the bridge or other in-flight commands.
#[derive(Debug, Error)]
pub enum ScribeError {
	/// A command was sent on a closed or absent connection.
	#[error("connection to {0} is not open")]
	ConnectionNotOpen(String),

	/// No correlated response arrived within the command timeout.
	#[error("command {method} timed out after {timeout:?}")]
	CommandTimeout { method: String, timeout: Duration },

	/// The connection closed while a command was awaiting its response.
	#[error("connection closed before a response arrived")]
	ConnectionClosed,

	/// The remote side answered a command with an error frame.
	#[error("protocol error {code}: {message}")]
	Protocol { code: i64, message: String },

	/// Transport-level send/handshake failure.
	#[error("transport error: {0}")]
	Transport(String),

	/// A response resolved but its payload did not have the expected shape.
	#[error("unexpected response shape for {method}: {detail}")]
	UnexpectedResponse { method: String, detail: String },
}
