//! DevTools JSON-RPC connection acting as an event source.
//!
//! This module implements the request/response correlation layer on top of a
//! transport. It handles:
//! - Generating unique request IDs
//! - Correlating responses with pending requests
//! - Distinguishing events from responses
//! - Translating browser-level `Target.*` events into [`Notification`]s
//!
//! # Message Flow
//!
//! 1. The registry calls a command such as [`EventSource::attach`]
//! 2. Connection generates a unique ID and creates a oneshot channel
//! 3. Request is serialized and queued for the writer task
//! 4. The caller awaits the oneshot receiver
//! 5. The dispatch loop receives the response from the transport
//! 6. Response is correlated by ID and sent via the oneshot channel
//!
//! Events never wait for a caller: they are pushed into an unbounded
//! notification channel in arrival order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::task::{Context, Poll};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use targetry_protocol::{BrowserVersion, Notification};
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::{Notify, mpsc, oneshot};

use crate::error::{Error, Result};
use crate::event_source::{EventSource, NotificationReceiver, NotificationSender, SourceFuture};
use crate::transport::{Transport, TransportParts, TransportReceiver, WebSocketTransport};

/// Command sent to the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
	/// Unique request ID for correlating responses
	pub id: u32,
	/// Domain-qualified method name, e.g. `Target.attachToTarget`
	pub method: String,
	/// Method parameters as JSON object
	pub params: Value,
	/// Session the command is addressed to; browser-level when absent
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Response to a [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	/// Request ID this response correlates to
	pub id: u32,
	/// Success result (mutually exclusive with error)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	/// Error result (mutually exclusive with result)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorPayload>,
}

/// Protocol error details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	/// Numeric JSON-RPC error code
	pub code: i64,
	/// Error message
	pub message: String,
	/// Additional detail
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

/// Event pushed by the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
	/// Event method name
	pub method: String,
	/// Event parameters as JSON object
	#[serde(default)]
	pub params: Value,
	/// Session that emitted the event; browser-level when absent
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Discriminated union of protocol messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	/// Response message (has `id` field)
	Response(Response),
	/// Event message (no `id` field)
	Event(Event),
	/// Unknown message type (forward-compatible catch-all)
	Unknown(Value),
}

struct PendingRequest {
	method: String,
	tx: oneshot::Sender<Result<Value>>,
}

/// Pending request callbacks keyed by request ID.
type CallbackMap = Arc<DashMap<u32, PendingRequest>>;

/// RAII guard ensuring callback cleanup when a request future is dropped.
struct CancelGuard {
	id: u32,
	callbacks: CallbackMap,
	completed: bool,
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if !self.completed && self.callbacks.remove(&self.id).is_some() {
			tracing::debug!(id = self.id, "CancelGuard: removed orphaned callback");
		}
	}
}

/// Future returned by [`Connection::send_command`] with automatic cancellation cleanup.
struct ResponseFuture {
	rx: oneshot::Receiver<Result<Value>>,
	guard: CancelGuard,
}

impl Future for ResponseFuture {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.completed = true;
				Poll::Ready(result.map_err(|_| Error::disconnected()).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// JSON-RPC connection to a browser's DevTools endpoint.
///
/// Manages request/response correlation and forwards target lifecycle
/// events to the notification channel returned by [`Connection::new`].
pub struct Connection {
	/// Sequential request ID counter
	last_id: AtomicU32,
	/// Pending request callbacks keyed by request ID
	callbacks: CallbackMap,
	/// Channel for sending outbound messages to the writer task
	outbound_tx: mpsc::UnboundedSender<Value>,
	/// Transport sender (taken by run() to start writer task)
	transport_sender: TokioMutex<Option<Box<dyn Transport>>>,
	/// Receiver half of transport (taken by run())
	transport_receiver: TokioMutex<Option<Box<dyn TransportReceiver>>>,
	/// Receiver for incoming messages from transport
	message_rx: TokioMutex<Option<mpsc::UnboundedReceiver<Value>>>,
	/// Receiver for outbound messages (taken by run() to start writer task)
	outbound_rx: TokioMutex<Option<mpsc::UnboundedReceiver<Value>>>,
	/// Notification sink; dropped when the connection closes
	notifications: Mutex<Option<NotificationSender>>,
	/// Set once the dispatch loop has ended or disconnect was requested
	closed: AtomicBool,
	/// Wakes the dispatch loop on [`EventSource::disconnect`]
	shutdown_requested: Notify,
	ws_endpoint: Option<String>,
	process_id: Option<u32>,
}

impl Connection {
	/// Creates a connection over the given transport.
	///
	/// Returns the connection and the ordered notification stream it feeds.
	/// Nothing is read until [`run`](Self::run) is started.
	pub fn new(parts: TransportParts) -> (Arc<Self>, NotificationReceiver) {
		Self::with_descriptor(parts, None, None)
	}

	/// Creates a connection that also reports its endpoint and browser pid.
	pub fn with_descriptor(
		parts: TransportParts,
		ws_endpoint: Option<String>,
		process_id: Option<u32>,
	) -> (Arc<Self>, NotificationReceiver) {
		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = parts;

		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (notification_tx, notification_rx) = mpsc::unbounded_channel();

		let connection = Arc::new(Self {
			last_id: AtomicU32::new(0),
			callbacks: Arc::new(DashMap::new()),
			outbound_tx,
			transport_sender: TokioMutex::new(Some(sender)),
			transport_receiver: TokioMutex::new(Some(receiver)),
			message_rx: TokioMutex::new(Some(message_rx)),
			outbound_rx: TokioMutex::new(Some(outbound_rx)),
			notifications: Mutex::new(Some(notification_tx)),
			closed: AtomicBool::new(false),
			shutdown_requested: Notify::new(),
			ws_endpoint,
			process_id,
		});

		(connection, notification_rx)
	}

	/// Connects to a DevTools WebSocket endpoint and starts the dispatch loop.
	///
	/// # Errors
	///
	/// Returns [`Error::ConnectionFailed`] if the WebSocket handshake fails.
	pub async fn connect(ws_endpoint: &str) -> Result<(Arc<Self>, NotificationReceiver)> {
		let parts = WebSocketTransport::connect(ws_endpoint).await?;
		let (connection, notifications) = Self::with_descriptor(parts, Some(ws_endpoint.to_string()), None);

		let runner = Arc::clone(&connection);
		tokio::spawn(async move { runner.run().await });

		Ok((connection, notifications))
	}

	/// Returns `true` once the connection has closed.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Sends a command and awaits its raw result.
	pub async fn send_command(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value> {
		if self.is_closed() {
			return Err(Error::disconnected());
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst);
		tracing::debug!(id, method, "Sending command");

		let (tx, rx) = oneshot::channel();
		self.callbacks.insert(
			id,
			PendingRequest {
				method: method.to_string(),
				tx,
			},
		);

		let guard = CancelGuard {
			id,
			callbacks: Arc::clone(&self.callbacks),
			completed: false,
		};

		// shutdown() may have drained the map between the first check and the insert
		if self.is_closed() {
			return Err(Error::disconnected());
		}

		let request = Request {
			id,
			method: method.to_string(),
			params,
			session_id: session_id.map(str::to_string),
		};

		if self.outbound_tx.send(serde_json::to_value(&request)?).is_err() {
			tracing::error!("Failed to queue message: outbound channel closed");
			return Err(Error::disconnected());
		}

		ResponseFuture { rx, guard }.await
	}

	/// Sends a browser-level command with typed params and result.
	pub async fn send<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R> {
		let params = serde_json::to_value(params)?;
		let result = self.send_command(method, params, None).await?;
		serde_json::from_value(result).map_err(Into::into)
	}

	/// Runs the message dispatch loop until the transport closes.
	///
	/// On exit every pending command fails with [`Error::Disconnected`] and
	/// the notification stream ends.
	pub async fn run(self: &Arc<Self>) {
		let taken = (
			self.transport_receiver.lock().await.take(),
			self.transport_sender.lock().await.take(),
			self.outbound_rx.lock().await.take(),
			self.message_rx.lock().await.take(),
		);
		let (Some(transport_receiver), Some(mut transport_sender), Some(mut outbound_rx), Some(mut message_rx)) =
			taken
		else {
			tracing::error!("Connection::run called more than once");
			return;
		};

		let reader_handle = tokio::spawn(async move {
			if let Err(e) = transport_receiver.run().await {
				tracing::error!("Transport read error: {}", e);
			}
		});

		let writer_handle = tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				if let Err(e) = transport_sender.send(message).await {
					tracing::error!("Transport write error: {}", e);
					break;
				}
			}
			let _ = transport_sender.close().await;
		});

		loop {
			let message_value = tokio::select! {
				message = message_rx.recv() => match message {
					Some(value) => value,
					None => break,
				},
				_ = self.shutdown_requested.notified() => break,
			};
			match serde_json::from_value::<Message>(message_value) {
				Ok(message) => {
					if let Err(e) = self.dispatch_internal(message) {
						tracing::error!("Error dispatching message: {}", e);
					}
				}
				Err(e) => {
					tracing::error!("Failed to parse message: {}", e);
				}
			}
		}

		self.shutdown();
		writer_handle.abort();
		reader_handle.abort();
		tracing::debug!("Connection dispatch loop finished");
	}

	/// Dispatch an incoming message (test-only public version)
	#[cfg(test)]
	pub fn dispatch(&self, message: Message) -> Result<()> {
		self.dispatch_internal(message)
	}

	fn dispatch_internal(&self, message: Message) -> Result<()> {
		match message {
			Message::Response(response) => {
				let (_, pending) = self.callbacks.remove(&response.id).ok_or_else(|| {
					Error::ProtocolError(format!("Cannot find request to respond: id={}", response.id))
				})?;

				let result = match response.error {
					Some(error) => Err(Error::Remote {
						method: pending.method,
						code: error.code,
						message: error.message,
					}),
					None => Ok(response.result.unwrap_or(Value::Null)),
				};

				let _ = pending.tx.send(result);
				Ok(())
			}
			Message::Event(event) => {
				if let Some(session_id) = &event.session_id {
					tracing::trace!(session_id, method = %event.method, "Session event (ignored)");
					return Ok(());
				}

				let Some(notification) = Notification::from_cdp(&event.method, event.params)? else {
					tracing::trace!(method = %event.method, "Non-target event (ignored)");
					return Ok(());
				};

				match self.notifications.lock().as_ref() {
					Some(tx) => {
						let _ = tx.send(notification);
					}
					None => tracing::debug!("Notification after close (ignored)"),
				}
				Ok(())
			}
			Message::Unknown(value) => {
				tracing::debug!(
					"Unknown message type (forward-compatible, ignored): {}",
					serde_json::to_string(&value).unwrap_or_else(|_| "<serialization failed>".to_string())
				);
				Ok(())
			}
		}
	}

	/// Marks the connection closed, fails pending commands and ends the stream.
	fn shutdown(&self) {
		self.closed.store(true, Ordering::SeqCst);
		self.notifications.lock().take();

		let ids: Vec<u32> = self.callbacks.iter().map(|entry| *entry.key()).collect();
		for id in ids {
			if let Some((_, pending)) = self.callbacks.remove(&id) {
				let _ = pending.tx.send(Err(Error::disconnected()));
			}
		}
	}
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachResult {
	session_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTargetResult {
	target_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateContextResult {
	browser_context_id: String,
}

impl EventSource for Connection {
	fn discover(&self, enabled: bool) -> SourceFuture<'_, ()> {
		Box::pin(async move {
			let _: Value = self.send("Target.setDiscoverTargets", json!({ "discover": enabled })).await?;
			Ok(())
		})
	}

	fn attach(&self, target_id: &str) -> SourceFuture<'_, String> {
		let params = json!({ "targetId": target_id, "flatten": true });
		Box::pin(async move {
			let result: AttachResult = self.send("Target.attachToTarget", params).await?;
			Ok(result.session_id)
		})
	}

	fn create(&self, context_id: Option<&str>, url: Option<&str>) -> SourceFuture<'_, String> {
		let mut params = json!({ "url": url.unwrap_or(targetry_protocol::BLANK_PAGE_URL) });
		if let Some(context_id) = context_id {
			params["browserContextId"] = Value::String(context_id.to_string());
		}
		Box::pin(async move {
			let result: CreateTargetResult = self.send("Target.createTarget", params).await?;
			Ok(result.target_id)
		})
	}

	fn close(&self, target_id: &str) -> SourceFuture<'_, ()> {
		let params = json!({ "targetId": target_id });
		Box::pin(async move {
			let _: Value = self.send("Target.closeTarget", params).await?;
			Ok(())
		})
	}

	fn create_context(&self) -> SourceFuture<'_, String> {
		Box::pin(async move {
			let result: CreateContextResult = self.send("Target.createBrowserContext", json!({})).await?;
			Ok(result.browser_context_id)
		})
	}

	fn dispose_context(&self, context_id: &str) -> SourceFuture<'_, ()> {
		let params = json!({ "browserContextId": context_id });
		Box::pin(async move {
			let _: Value = self.send("Target.disposeBrowserContext", params).await?;
			Ok(())
		})
	}

	fn version(&self) -> SourceFuture<'_, BrowserVersion> {
		Box::pin(self.send("Browser.getVersion", json!({})))
	}

	fn disconnect(&self) -> SourceFuture<'_, ()> {
		Box::pin(async move {
			self.shutdown();
			self.shutdown_requested.notify_one();
			Ok(())
		})
	}

	fn ws_endpoint(&self) -> Option<String> {
		self.ws_endpoint.clone()
	}

	fn process_id(&self) -> Option<u32> {
		self.process_id
	}
}

#[cfg(test)]
mod tests;
