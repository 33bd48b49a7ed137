//! Listener table for target lifecycle events.
//!
//! Listeners live in an [`IndexMap`] keyed by [`HandlerId`], giving O(1)
//! removal and a deterministic fan-out order (registration order). Each
//! registration returns a [`Subscription`] that removes the listener when
//! dropped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::events::{TargetEvent, TargetEventKind};
use crate::target::Target;

/// Unique identifier for listeners.
pub type HandlerId = u64;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a new globally-unique handler ID.
pub fn next_handler_id() -> HandlerId {
	NEXT_HANDLER_ID.fetch_add(1, Ordering::SeqCst)
}

/// Synchronous listener callback receiving the affected target.
pub type ListenerFn = Arc<dyn Fn(&Target) + Send + Sync>;

/// A registered listener.
pub(crate) struct ListenerEntry {
	pub kind: TargetEventKind,
	pub once: bool,
	pub listener: ListenerFn,
}

/// Listener storage: [`IndexMap`] for O(1) removal with stable insertion order.
pub(crate) type ListenerMap = Arc<Mutex<IndexMap<HandlerId, ListenerEntry>>>;

/// Creates an empty listener table.
pub(crate) fn listener_map() -> ListenerMap {
	Arc::new(Mutex::new(IndexMap::new()))
}

/// Registers a listener and returns its subscription.
pub(crate) fn add_listener<F>(map: &ListenerMap, kind: TargetEventKind, once: bool, listener: F) -> Subscription
where
	F: Fn(&Target) + Send + Sync + 'static,
{
	let id = next_handler_id();
	map.lock().insert(
		id,
		ListenerEntry {
			kind,
			once,
			listener: Arc::new(listener),
		},
	);
	Subscription::from_listener_map(id, map)
}

/// Invokes every listener registered for the event's kind.
///
/// Matching entries are snapshotted (and `once` entries removed) under the
/// lock; callbacks then run with no lock held, so a listener may register or
/// remove listeners. A panicking listener is logged and skipped.
pub(crate) fn notify_listeners(map: &ListenerMap, event: &TargetEvent) {
	let kind = event.kind();
	let matching: Vec<ListenerFn> = {
		let mut map = map.lock();
		let ids: Vec<HandlerId> = map
			.iter()
			.filter(|(_, entry)| entry.kind == kind)
			.map(|(id, _)| *id)
			.collect();

		let mut matching = Vec::with_capacity(ids.len());
		for id in ids {
			let once = map.get(&id).is_some_and(|entry| entry.once);
			let listener = if once {
				map.shift_remove(&id).map(|entry| entry.listener)
			} else {
				map.get(&id).map(|entry| Arc::clone(&entry.listener))
			};
			matching.extend(listener);
		}
		matching
	};

	let target = event.target();
	for listener in matching {
		if catch_unwind(AssertUnwindSafe(|| listener(target))).is_err() {
			tracing::error!(target_id = %target.id(), event = %kind, "Target listener panicked");
		}
	}
}

/// RAII handle that unregisters a listener on drop.
///
/// Holds a weak reference to the listener table, so dropping after the
/// owning browser is gone is safe (becomes a no-op).
pub struct Subscription {
	id: HandlerId,
	dropper: Option<Arc<dyn Fn(HandlerId) + Send + Sync>>,
}

impl Subscription {
	/// Creates a subscription with a custom dropper function.
	pub fn new(id: HandlerId, dropper: Arc<dyn Fn(HandlerId) + Send + Sync>) -> Self {
		Self {
			id,
			dropper: Some(dropper),
		}
	}

	pub(crate) fn from_listener_map(id: HandlerId, listeners: &ListenerMap) -> Self {
		let weak: Weak<Mutex<IndexMap<HandlerId, ListenerEntry>>> = Arc::downgrade(listeners);
		let dropper = Arc::new(move |id: HandlerId| {
			if let Some(map) = weak.upgrade() {
				map.lock().shift_remove(&id);
			}
		});
		Self::new(id, dropper)
	}

	/// Returns this subscription's handler ID.
	pub fn id(&self) -> HandlerId {
		self.id
	}

	/// Explicitly unsubscribes. Equivalent to dropping.
	pub fn unsubscribe(mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}

	/// Keeps the listener registered for the lifetime of its owner.
	pub fn detach(mut self) {
		self.dropper = None;
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("active", &self.dropper.is_some())
			.finish()
	}
}
