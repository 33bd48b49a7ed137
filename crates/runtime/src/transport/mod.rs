//! Transports carrying DevTools JSON messages.
//!
//! Two transports are provided:
//!
//! - [`PipeTransport`]: JSON frames terminated by a NUL byte, as spoken by a
//!   browser started with `--remote-debugging-pipe`
//! - [`WebSocketTransport`]: one JSON document per text frame
//!
//! Each transport is split into a sending half ([`Transport`]) and a reading
//! half ([`TransportReceiver`]) that forwards parsed messages into an
//! unbounded channel, bundled together as [`TransportParts`].

use std::future::Future;
use std::pin::Pin;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};

/// Boxed future returned by transport halves.
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Sending half of a transport.
pub trait Transport: Send {
	/// Writes one message.
	fn send(&mut self, message: Value) -> TransportFuture<'_>;

	/// Flushes and closes the outgoing side.
	fn close(&mut self) -> TransportFuture<'_>;
}

/// Reading half of a transport.
pub trait TransportReceiver: Send {
	/// Reads messages until the peer closes, forwarding each to the channel.
	fn run(self: Box<Self>) -> TransportFuture<'static>;
}

/// Both halves of a transport plus the channel its reader feeds.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// NUL-delimited JSON transport over a pair of byte streams.
pub struct PipeTransport<W, R> {
	sender: PipeTransportSender<W>,
	receiver: PipeTransportReceiver<R>,
}

/// Writing half of a [`PipeTransport`].
pub struct PipeTransportSender<W> {
	writer: W,
}

/// Reading half of a [`PipeTransport`].
pub struct PipeTransportReceiver<R> {
	reader: BufReader<R>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<W, R> PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	/// Creates a transport writing to `writer` and reading from `reader`.
	///
	/// Returns the transport and the receiver of parsed incoming messages.
	pub fn new(writer: W, reader: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let transport = Self {
			sender: PipeTransportSender { writer },
			receiver: PipeTransportReceiver {
				reader: BufReader::new(reader),
				message_tx,
			},
		};
		(transport, message_rx)
	}

	/// Splits the transport into its halves.
	pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
		(self.sender, self.receiver)
	}

	/// Bundles the halves with the channel returned by [`new`](Self::new).
	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		TransportParts {
			sender: Box::new(self.sender),
			receiver: Box::new(self.receiver),
			message_rx,
		}
	}

	/// Runs the reading half in place.
	pub async fn run(&mut self) -> Result<()> {
		self.receiver.read_loop().await
	}
}

impl<W> PipeTransportSender<W>
where
	W: AsyncWrite + Unpin + Send,
{
	/// Writes one NUL-terminated JSON frame.
	pub async fn write_frame(&mut self, message: Value) -> Result<()> {
		let mut frame = serde_json::to_vec(&message)?;
		frame.push(0);
		self.writer
			.write_all(&frame)
			.await
			.map_err(|e| Error::TransportError(format!("Failed to write frame: {e}")))?;
		self.writer
			.flush()
			.await
			.map_err(|e| Error::TransportError(format!("Failed to flush frame: {e}")))
	}
}

impl<W> Transport for PipeTransportSender<W>
where
	W: AsyncWrite + Unpin + Send,
{
	fn send(&mut self, message: Value) -> TransportFuture<'_> {
		Box::pin(self.write_frame(message))
	}

	fn close(&mut self) -> TransportFuture<'_> {
		Box::pin(async move {
			self.writer
				.shutdown()
				.await
				.map_err(|e| Error::TransportError(format!("Failed to close pipe: {e}")))
		})
	}
}

impl<R> PipeTransportReceiver<R>
where
	R: AsyncRead + Unpin + Send,
{
	async fn read_loop(&mut self) -> Result<()> {
		let mut frame = Vec::new();
		loop {
			frame.clear();
			let read = self
				.reader
				.read_until(0, &mut frame)
				.await
				.map_err(|e| Error::TransportError(format!("Failed to read frame: {e}")))?;

			if read == 0 {
				return Ok(());
			}
			if frame.last() != Some(&0) {
				return Err(Error::TransportError(format!(
					"Incomplete frame: stream ended after {read} bytes without terminator"
				)));
			}
			frame.pop();

			let message: Value = serde_json::from_slice(&frame)
				.map_err(|e| Error::ProtocolError(format!("Invalid JSON frame: {e}")))?;

			if self.message_tx.send(message).is_err() {
				tracing::debug!("Message receiver dropped, stopping pipe reader");
				return Ok(());
			}
		}
	}
}

impl<R> TransportReceiver for PipeTransportReceiver<R>
where
	R: AsyncRead + Unpin + Send + 'static,
{
	fn run(mut self: Box<Self>) -> TransportFuture<'static> {
		Box::pin(async move { self.read_loop().await })
	}
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// JSON-over-WebSocket transport.
pub struct WebSocketTransport;

/// Writing half of a [`WebSocketTransport`].
pub struct WebSocketTransportSender {
	sink: SplitSink<WsStream, WsMessage>,
}

/// Reading half of a [`WebSocketTransport`].
pub struct WebSocketTransportReceiver {
	stream: SplitStream<WsStream>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl WebSocketTransport {
	/// Connects to a DevTools WebSocket endpoint.
	///
	/// # Errors
	///
	/// Returns [`Error::ConnectionFailed`] if the handshake fails.
	pub async fn connect(url: &str) -> Result<TransportParts> {
		let (socket, _response) = tokio_tungstenite::connect_async(url)
			.await
			.map_err(|e| Error::ConnectionFailed(format!("{url}: {e}")))?;
		tracing::debug!(url, "WebSocket connected");

		let (sink, stream) = socket.split();
		let (message_tx, message_rx) = mpsc::unbounded_channel();

		Ok(TransportParts {
			sender: Box::new(WebSocketTransportSender { sink }),
			receiver: Box::new(WebSocketTransportReceiver { stream, message_tx }),
			message_rx,
		})
	}
}

impl Transport for WebSocketTransportSender {
	fn send(&mut self, message: Value) -> TransportFuture<'_> {
		Box::pin(async move {
			let text = serde_json::to_string(&message)?;
			self.sink
				.send(WsMessage::Text(text))
				.await
				.map_err(|e| Error::TransportError(format!("WebSocket send failed: {e}")))
		})
	}

	fn close(&mut self) -> TransportFuture<'_> {
		Box::pin(async move {
			self.sink
				.close()
				.await
				.map_err(|e| Error::TransportError(format!("WebSocket close failed: {e}")))
		})
	}
}

impl TransportReceiver for WebSocketTransportReceiver {
	fn run(mut self: Box<Self>) -> TransportFuture<'static> {
		Box::pin(async move {
			while let Some(frame) = self.stream.next().await {
				let frame = frame.map_err(|e| Error::TransportError(format!("WebSocket read failed: {e}")))?;
				let message: Value = match frame {
					WsMessage::Text(text) => serde_json::from_str(&text)?,
					WsMessage::Binary(bytes) => serde_json::from_slice(&bytes)?,
					WsMessage::Close(_) => break,
					_ => continue,
				};
				if self.message_tx.send(message).is_err() {
					tracing::debug!("Message receiver dropped, stopping WebSocket reader");
					break;
				}
			}
			Ok(())
		})
	}
}
