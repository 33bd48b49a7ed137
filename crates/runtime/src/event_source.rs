//! The command half of the event source boundary.
//!
//! An event source delivers [`Notification`]s over an ordered channel and
//! accepts the commands below. The registry never talks to a transport
//! directly, so any implementation (a DevTools connection, an in-memory
//! script) can drive it.

use std::future::Future;
use std::pin::Pin;

use targetry_protocol::{BrowserVersion, Notification};
use tokio::sync::mpsc;

use crate::error::Result;

/// Boxed future returned by [`EventSource`] commands.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Ordered notification stream of one connection.
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

/// Sending half of a [`NotificationReceiver`].
pub type NotificationSender = mpsc::UnboundedSender<Notification>;

/// Commands the registry issues to its event source.
pub trait EventSource: Send + Sync {
	/// Turns target discovery on or off.
	///
	/// Enabling discovery makes the source report every existing target
	/// with a `created` notification.
	fn discover(&self, enabled: bool) -> SourceFuture<'_, ()>;

	/// Attaches a session to a target and returns the session id.
	///
	/// The matching `attached` notification is delivered on the stream.
	fn attach(&self, target_id: &str) -> SourceFuture<'_, String>;

	/// Creates a page target, optionally inside an isolated context.
	fn create(&self, context_id: Option<&str>, url: Option<&str>) -> SourceFuture<'_, String>;

	/// Closes a target.
	fn close(&self, target_id: &str) -> SourceFuture<'_, ()>;

	/// Creates an isolated browser context and returns its id.
	fn create_context(&self) -> SourceFuture<'_, String>;

	/// Disposes an isolated browser context and all of its targets.
	fn dispose_context(&self, context_id: &str) -> SourceFuture<'_, ()>;

	/// Returns browser build information.
	fn version(&self) -> SourceFuture<'_, BrowserVersion>;

	/// Closes the connection. The notification stream ends afterwards.
	fn disconnect(&self) -> SourceFuture<'_, ()>;

	/// Opaque connection descriptor, when the source has one.
	fn ws_endpoint(&self) -> Option<String> {
		None
	}

	/// Browser process id, when the source launched or knows it.
	fn process_id(&self) -> Option<u32> {
		None
	}
}
