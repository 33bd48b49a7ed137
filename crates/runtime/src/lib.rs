//! Targetry Runtime - event source boundary, connection and transports
//!
//! This crate provides the low-level infrastructure the target registry sits
//! on:
//!
//! - **Event source**: the [`EventSource`] command trait and the ordered
//!   [`NotificationReceiver`] stream the registry consumes
//! - **Transport**: Bidirectional communication over a pipe or WebSocket
//! - **Connection**: JSON-RPC request/response correlation and translation of
//!   DevTools `Target.*` events into notifications
//! - **Errors**: the shared [`Error`] taxonomy
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  targetry   │  Registry, contexts, waits
//! └──────┬──────┘
//!        │ consumes EventSource + NotificationReceiver
//! ┌──────▼───────────┐
//! │ targetry-runtime │  This crate
//! │  ┌────────┐      │
//! │  │ Conn   │      │  JSON-RPC correlation
//! │  └────────┘      │
//! │  ┌────────┐      │
//! │  │ Trans  │      │  Pipe/WebSocket transport
//! │  └────────┘      │
//! └──────────────────┘
//! ```

pub mod connection;
pub mod error;
pub mod event_source;
pub mod transport;

pub use connection::{Connection, ErrorPayload, Event, Message, Request, Response};
pub use error::{Error, Result};
pub use event_source::{EventSource, NotificationReceiver, NotificationSender, SourceFuture};
pub use transport::{
	PipeTransport, PipeTransportReceiver, PipeTransportSender, Transport, TransportParts, TransportReceiver,
	WebSocketTransport, WebSocketTransportReceiver, WebSocketTransportSender,
};
