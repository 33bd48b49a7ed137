//! Event plumbing for target lifecycle notifications.
//!
//! - [`TargetEvent`] - a public `targetcreated`/`targetchanged`/`targetdestroyed` event
//! - [`EventBus`] - internal dispatcher combining a broadcast channel with predicate waiters
//! - [`EventStream`] - wrapper around [`broadcast::Receiver`] with lag handling
//! - [`TargetEmitter`] - one fan-out point (a context or the browser aggregate):
//!   listener table, then waiters, then stream subscribers
//!
//! # Waiters
//!
//! Waiters are checked before the broadcast, so `wait_for_target` has
//! guaranteed delivery even when stream subscribers lag. A waiter is either
//! [`Delivery::Claim`] (an event is handed to the earliest matching claimer
//! only) or [`Delivery::Shared`] (every matching shared waiter observes it).
//!
//! [`broadcast::Receiver`]: tokio::sync::broadcast::Receiver

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use crate::handlers::{self, ListenerMap, Subscription};
use crate::target::Target;
use crate::{Error, Result};

/// Kind of a public target event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetEventKind {
	Created,
	Changed,
	Destroyed,
}

impl TargetEventKind {
	/// Returns the conventional event name.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Created => "targetcreated",
			Self::Changed => "targetchanged",
			Self::Destroyed => "targetdestroyed",
		}
	}
}

impl fmt::Display for TargetEventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A public target lifecycle event.
#[derive(Debug, Clone)]
pub enum TargetEvent {
	Created(Target),
	Changed(Target),
	Destroyed(Target),
}

impl TargetEvent {
	pub fn kind(&self) -> TargetEventKind {
		match self {
			Self::Created(_) => TargetEventKind::Created,
			Self::Changed(_) => TargetEventKind::Changed,
			Self::Destroyed(_) => TargetEventKind::Destroyed,
		}
	}

	pub fn target(&self) -> &Target {
		match self {
			Self::Created(target) | Self::Changed(target) | Self::Destroyed(target) => target,
		}
	}

	pub fn into_target(self) -> Target {
		match self {
			Self::Created(target) | Self::Changed(target) | Self::Destroyed(target) => target,
		}
	}
}

/// How an event is handed to matching waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
	/// The earliest registered matching claimer receives the event; later
	/// claimers keep waiting.
	Claim,
	/// Every matching shared waiter receives the event.
	Shared,
}

type WaiterId = u64;

struct WaiterEntry<E> {
	id: WaiterId,
	delivery: Delivery,
	predicate: Box<dyn Fn(&E) -> bool + Send + Sync>,
	complete_tx: oneshot::Sender<E>,
}

struct WaiterTable<E> {
	next_id: WaiterId,
	closed: bool,
	entries: Vec<WaiterEntry<E>>,
}

/// Outcome of [`EventBus::register_waiter_unless`].
pub(crate) enum WaiterRegistration<E> {
	/// The snapshot check already produced a value.
	Ready(E),
	/// A waiter was registered.
	Pending(PendingWaiter<E>),
	/// The bus was closed; no waiter was registered.
	Closed,
}

/// Internal event bus combining broadcast channels with predicate-based waiters.
pub(crate) struct EventBus<E: Clone + Send + 'static> {
	tx: broadcast::Sender<E>,
	waiters: Arc<Mutex<WaiterTable<E>>>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
	/// Creates a new [`EventBus`] with the specified broadcast channel capacity.
	pub fn new(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity.max(1));
		Self {
			tx,
			waiters: Arc::new(Mutex::new(WaiterTable {
				next_id: 1,
				closed: false,
				entries: Vec::new(),
			})),
		}
	}

	/// Emits an event to matching waiters, then to all stream subscribers.
	///
	/// Shared waiters that match are all completed. Claimers are tried in
	/// registration order and the first whose receiver is still alive takes
	/// the event.
	pub fn emit(&self, event: E) {
		{
			let mut table = self.waiters.lock();
			let mut claimed = false;
			let mut i = 0;
			while i < table.entries.len() {
				let entry = &table.entries[i];
				if entry.complete_tx.is_closed() {
					table.entries.remove(i);
					continue;
				}
				let wants = match entry.delivery {
					Delivery::Shared => true,
					Delivery::Claim => !claimed,
				};
				if wants && (entry.predicate)(&event) {
					let entry = table.entries.remove(i);
					let delivered = entry.complete_tx.send(event.clone()).is_ok();
					if entry.delivery == Delivery::Claim && delivered {
						claimed = true;
					}
				} else {
					i += 1;
				}
			}
		}
		let _ = self.tx.send(event);
	}

	/// Subscribes to the event stream. Events emitted before subscription are
	/// not received.
	pub fn subscribe(&self) -> broadcast::Receiver<E> {
		self.tx.subscribe()
	}

	/// Registers a waiter for the first matching event.
	#[cfg(test)]
	pub fn register_waiter<F>(&self, predicate: F, delivery: Delivery) -> Option<PendingWaiter<E>>
	where
		F: Fn(&E) -> bool + Send + Sync + 'static,
	{
		match self.register_waiter_unless(|| None, predicate, delivery) {
			WaiterRegistration::Pending(waiter) => Some(waiter),
			WaiterRegistration::Ready(_) | WaiterRegistration::Closed => None,
		}
	}

	/// Runs `check` and, if it yields nothing, registers a waiter, both
	/// under the waiter lock.
	///
	/// An emit cannot interleave between the check and the registration, so
	/// a value is never missed by both.
	pub fn register_waiter_unless<C, F>(&self, check: C, predicate: F, delivery: Delivery) -> WaiterRegistration<E>
	where
		C: FnOnce() -> Option<E>,
		F: Fn(&E) -> bool + Send + Sync + 'static,
	{
		let mut table = self.waiters.lock();
		if table.closed {
			return WaiterRegistration::Closed;
		}
		if let Some(ready) = check() {
			return WaiterRegistration::Ready(ready);
		}

		let id = table.next_id;
		table.next_id += 1;
		let (complete_tx, complete_rx) = oneshot::channel();
		table.entries.push(WaiterEntry {
			id,
			delivery,
			predicate: Box::new(predicate),
			complete_tx,
		});

		WaiterRegistration::Pending(PendingWaiter {
			id,
			rx: complete_rx,
			table: Arc::downgrade(&self.waiters),
			done: false,
		})
	}

	/// Drops every waiter and refuses new ones. Pending waiters resolve with
	/// [`Error::Disconnected`].
	pub fn close(&self) {
		let mut table = self.waiters.lock();
		table.closed = true;
		table.entries.clear();
	}

	/// Returns the number of registered waiters.
	#[cfg(test)]
	pub fn waiter_count(&self) -> usize {
		self.waiters.lock().entries.len()
	}
}

/// A registered waiter. Resolves with the matching event; dropping it
/// before completion removes the registration.
pub(crate) struct PendingWaiter<E> {
	id: WaiterId,
	rx: oneshot::Receiver<E>,
	table: Weak<Mutex<WaiterTable<E>>>,
	done: bool,
}

impl<E> Future for PendingWaiter<E> {
	type Output = Result<E>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.done = true;
				Poll::Ready(result.map_err(|_| Error::disconnected()))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

impl<E> Drop for PendingWaiter<E> {
	fn drop(&mut self) {
		if self.done {
			return;
		}
		if let Some(table) = self.table.upgrade() {
			let id = self.id;
			table.lock().entries.retain(|entry| entry.id != id);
		}
	}
}

/// Ergonomic wrapper around [`broadcast::Receiver`] with automatic lag handling.
///
/// Lagging receivers log a warning and keep receiving instead of failing.
///
/// [`broadcast::Receiver`]: tokio::sync::broadcast::Receiver
pub struct EventStream<E: Clone + Send + 'static> {
	rx: broadcast::Receiver<E>,
}

impl<E: Clone + Send + 'static> EventStream<E> {
	pub(crate) fn new(rx: broadcast::Receiver<E>) -> Self {
		Self { rx }
	}

	/// Receives the next event.
	///
	/// Returns `None` once the owning registry is gone.
	pub async fn recv(&mut self) -> Option<E> {
		loop {
			match self.rx.recv().await {
				Ok(event) => return Some(event),
				Err(broadcast::error::RecvError::Lagged(n)) => {
					tracing::warn!(dropped = n, "Event stream lagged, dropped events");
				}
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	}

	/// Attempts to receive an event without blocking.
	pub fn try_recv(&mut self) -> Option<E> {
		loop {
			match self.rx.try_recv() {
				Ok(event) => return Some(event),
				Err(broadcast::error::TryRecvError::Lagged(n)) => {
					tracing::warn!(dropped = n, "Event stream lagged, dropped events");
				}
				Err(broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed) => return None,
			}
		}
	}
}

/// Fan-out point for one scope: listeners first, then waiters and streams.
pub(crate) struct TargetEmitter {
	listeners: ListenerMap,
	bus: EventBus<TargetEvent>,
}

impl TargetEmitter {
	pub fn new(capacity: usize) -> Self {
		Self {
			listeners: handlers::listener_map(),
			bus: EventBus::new(capacity),
		}
	}

	pub fn emit(&self, event: TargetEvent) {
		handlers::notify_listeners(&self.listeners, &event);
		self.bus.emit(event);
	}

	pub fn on<F>(&self, kind: TargetEventKind, listener: F) -> Subscription
	where
		F: Fn(&Target) + Send + Sync + 'static,
	{
		handlers::add_listener(&self.listeners, kind, false, listener)
	}

	pub fn once<F>(&self, kind: TargetEventKind, listener: F) -> Subscription
	where
		F: Fn(&Target) + Send + Sync + 'static,
	{
		handlers::add_listener(&self.listeners, kind, true, listener)
	}

	pub fn events(&self) -> EventStream<TargetEvent> {
		EventStream::new(self.bus.subscribe())
	}

	pub fn bus(&self) -> &EventBus<TargetEvent> {
		&self.bus
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[derive(Clone, Debug, PartialEq)]
	struct TestEvent {
		id: u32,
	}

	#[tokio::test]
	async fn event_bus_broadcast() {
		let bus: EventBus<TestEvent> = EventBus::new(16);
		let mut rx1 = bus.subscribe();
		let mut rx2 = bus.subscribe();

		bus.emit(TestEvent { id: 1 });

		assert_eq!(rx1.recv().await.unwrap().id, 1);
		assert_eq!(rx2.recv().await.unwrap().id, 1);
	}

	#[tokio::test]
	async fn waiter_receives_matching_event() {
		let bus: EventBus<TestEvent> = EventBus::new(16);
		let waiter = bus.register_waiter(|e: &TestEvent| e.id == 2, Delivery::Claim).unwrap();

		bus.emit(TestEvent { id: 1 });
		assert_eq!(bus.waiter_count(), 1);

		bus.emit(TestEvent { id: 2 });
		assert_eq!(waiter.await.unwrap().id, 2);
		assert_eq!(bus.waiter_count(), 0);
	}

	#[tokio::test]
	async fn claim_hands_event_to_earliest_waiter_only() {
		let bus: EventBus<TestEvent> = EventBus::new(16);
		let first = bus.register_waiter(|_: &TestEvent| true, Delivery::Claim).unwrap();
		let second = bus.register_waiter(|_: &TestEvent| true, Delivery::Claim).unwrap();

		bus.emit(TestEvent { id: 1 });
		assert_eq!(bus.waiter_count(), 1);
		bus.emit(TestEvent { id: 2 });

		assert_eq!(first.await.unwrap().id, 1);
		assert_eq!(second.await.unwrap().id, 2);
	}

	#[tokio::test]
	async fn shared_waiters_all_observe_event() {
		let bus: EventBus<TestEvent> = EventBus::new(16);
		let claimer = bus.register_waiter(|_: &TestEvent| true, Delivery::Claim).unwrap();
		let shared = bus.register_waiter(|e: &TestEvent| e.id == 1, Delivery::Shared).unwrap();

		bus.emit(TestEvent { id: 1 });

		assert_eq!(claimer.await.unwrap().id, 1);
		assert_eq!(shared.await.unwrap().id, 1);
	}

	#[tokio::test]
	async fn dropped_claimer_does_not_swallow_event() {
		let bus: EventBus<TestEvent> = EventBus::new(16);
		let abandoned = bus.register_waiter(|_: &TestEvent| true, Delivery::Claim).unwrap();
		let live = bus.register_waiter(|_: &TestEvent| true, Delivery::Claim).unwrap();
		drop(abandoned);
		assert_eq!(bus.waiter_count(), 1);

		bus.emit(TestEvent { id: 7 });
		assert_eq!(live.await.unwrap().id, 7);
	}

	#[tokio::test]
	async fn register_unless_returns_ready_value() {
		let bus: EventBus<TestEvent> = EventBus::new(16);
		let registration = bus.register_waiter_unless(|| Some(TestEvent { id: 3 }), |_| true, Delivery::Claim);
		assert!(matches!(registration, WaiterRegistration::Ready(TestEvent { id: 3 })));
		assert_eq!(bus.waiter_count(), 0);
	}

	#[tokio::test]
	async fn close_fails_pending_waiters() {
		let bus: EventBus<TestEvent> = EventBus::new(16);
		let waiter = bus.register_waiter(|_: &TestEvent| true, Delivery::Claim).unwrap();

		bus.close();

		assert!(waiter.await.unwrap_err().is_disconnected());
		assert!(matches!(
			bus.register_waiter_unless(|| None, |_: &TestEvent| true, Delivery::Claim),
			WaiterRegistration::Closed
		));
	}

	#[tokio::test]
	async fn timed_out_waiter_is_removed() {
		let bus: EventBus<TestEvent> = EventBus::new(16);
		let waiter = bus.register_waiter(|_: &TestEvent| true, Delivery::Claim).unwrap();

		let result = tokio::time::timeout(Duration::from_millis(10), waiter).await;
		assert!(result.is_err());
		assert_eq!(bus.waiter_count(), 0);
	}

	#[tokio::test]
	async fn event_stream_receives_events() {
		let bus = Arc::new(EventBus::<TestEvent>::new(16));
		let mut stream = EventStream::new(bus.subscribe());

		let bus_ref = Arc::clone(&bus);
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(10)).await;
			bus_ref.emit(TestEvent { id: 42 });
		});

		assert_eq!(stream.recv().await.unwrap().id, 42);
	}

	#[tokio::test]
	async fn event_stream_survives_lag() {
		let bus: EventBus<TestEvent> = EventBus::new(2);
		let mut stream = EventStream::new(bus.subscribe());

		for id in 0..5 {
			bus.emit(TestEvent { id });
		}

		assert_eq!(stream.try_recv().unwrap().id, 3);
		assert_eq!(stream.try_recv().unwrap().id, 4);
		assert!(stream.try_recv().is_none());
	}
}
