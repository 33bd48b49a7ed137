//! Error types for the target registry and its event sources.

use thiserror::Error;

/// Result type alias for registry and runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while tracking targets.
#[derive(Debug, Error)]
pub enum Error {
	/// A predicate wait exceeded its deadline.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// The connection closed while the operation was pending.
	#[error("Disconnected: {0}")]
	Disconnected(String),

	/// The event source attached the same target twice.
	#[error("Duplicate initialization of target {target_id}")]
	DuplicateInitialization { target_id: String },

	/// The target was destroyed before the operation could complete.
	#[error("Target closed: {target_id}. {context}")]
	TargetClosed { target_id: String, context: String },

	/// Failed to establish a connection to the event source.
	#[error("Failed to connect: {0}")]
	ConnectionFailed(String),

	/// Transport-level error (pipe or WebSocket communication).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Protocol-level error (malformed or unexpected message).
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// Error response returned by the browser.
	#[error("{method} failed ({code}): {message}")]
	Remote {
		/// Command that failed.
		method: String,
		/// Protocol error code.
		code: i64,
		/// Human-readable error message.
		message: String,
	},

	/// Invalid argument provided to a method.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// Channel closed unexpectedly.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Shorthand for a [`Error::Disconnected`] with the standard message.
	pub fn disconnected() -> Self {
		Error::Disconnected("connection to the browser was closed".to_string())
	}

	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_))
	}

	/// Returns true if the connection is gone.
	pub fn is_disconnected(&self) -> bool {
		matches!(self, Error::Disconnected(_) | Error::ChannelClosed)
	}

	/// Returns true if this is a target closed error.
	pub fn is_target_closed(&self) -> bool {
		match self {
			Error::TargetClosed { .. } => true,
			Error::Remote { message, .. } => message.contains("No target with given id"),
			_ => false,
		}
	}
}
