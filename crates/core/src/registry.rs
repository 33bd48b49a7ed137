//! The per-connection target registry.
//!
//! The registry owns every [`Target`] of one connection, keyed by id in
//! insertion order. It consumes the ordered notification stream of an
//! [`EventSource`] on a single coordination task and decides visibility:
//!
//! 1. `created` inserts a target in the pending state. Targets that need a
//!    session are attached in the background; other types are promoted
//!    immediately.
//! 2. `attached` promotes a pending target to initialized and emits
//!    `targetcreated`, first to the owning context, then browser-wide.
//! 3. `changed` updates URL and title in place. Changes to pending targets
//!    are folded silently.
//! 4. `destroyed` emits `targetdestroyed` for visible targets and removes
//!    the target. Its id is never admitted again.
//!
//! Public events are emitted synchronously while the notification is being
//! processed, so observers see them in notification order.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use targetry_protocol::{BrowserOptions, Notification, TargetChange, TargetInfo, WorkerAttribution};
use targetry_runtime::{EventSource, NotificationReceiver};
use tokio::sync::watch;

use crate::context::ContextId;
use crate::events::{TargetEmitter, TargetEvent};
use crate::page::{PageFactory, PageHandle};
use crate::target::{Lifecycle, Target};
use crate::{Error, Result};

/// A breach of the event source contract, recorded for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractViolation {
	/// A second `attached` arrived for an already initialized target.
	DuplicateInitialization { target_id: String, session_id: String },
}

impl fmt::Display for ContractViolation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::DuplicateInitialization { target_id, session_id } => {
				write!(f, "target {target_id} attached again (session {session_id}) after initialization")
			}
		}
	}
}

/// Authority over the targets of one connection.
pub struct Registry {
	targets: RwLock<IndexMap<Arc<str>, Target>>,
	destroyed: Mutex<HashSet<Arc<str>>>,
	sessions: DashMap<String, Arc<str>>,
	browser_events: TargetEmitter,
	contexts: Mutex<IndexMap<ContextId, Arc<TargetEmitter>>>,
	disposed_contexts: Mutex<HashSet<ContextId>>,
	violations: Mutex<Vec<ContractViolation>>,
	closed: watch::Sender<bool>,
	destroyed_seq: watch::Sender<u64>,
	source: Arc<dyn EventSource>,
	factory: Arc<dyn PageFactory>,
	options: BrowserOptions,
}

impl Registry {
	/// Creates an empty registry issuing commands to `source`.
	pub fn new(source: Arc<dyn EventSource>, factory: Arc<dyn PageFactory>, options: BrowserOptions) -> Arc<Self> {
		let capacity = options.event_capacity;
		let mut contexts = IndexMap::new();
		contexts.insert(ContextId::default_context(), Arc::new(TargetEmitter::new(capacity)));
		let (closed, _) = watch::channel(false);
		let (destroyed_seq, _) = watch::channel(0);

		Arc::new(Self {
			targets: RwLock::new(IndexMap::new()),
			destroyed: Mutex::new(HashSet::new()),
			sessions: DashMap::new(),
			browser_events: TargetEmitter::new(capacity),
			contexts: Mutex::new(contexts),
			disposed_contexts: Mutex::new(HashSet::new()),
			violations: Mutex::new(Vec::new()),
			closed,
			destroyed_seq,
			source,
			factory,
			options,
		})
	}

	/// Drains `notifications` through [`dispatch`](Self::dispatch) until the
	/// stream ends, then closes the registry.
	pub async fn run(self: Arc<Self>, mut notifications: NotificationReceiver) {
		while let Some(notification) = notifications.recv().await {
			if let Err(error) = self.dispatch(notification) {
				if error.is_disconnected() {
					break;
				}
			}
		}
		tracing::debug!("Notification stream ended");
		self.close();
	}

	/// Applies one notification.
	///
	/// # Errors
	///
	/// - [`Error::Disconnected`] once the registry is closed
	/// - [`Error::DuplicateInitialization`] if a target is attached twice
	pub fn dispatch(self: &Arc<Self>, notification: Notification) -> Result<()> {
		if self.is_closed() {
			return Err(Error::disconnected());
		}
		match notification {
			Notification::Created { info } => self.on_created(info),
			Notification::Changed { change } => self.on_changed(&change),
			Notification::Destroyed { target_id } => self.on_destroyed(&target_id),
			Notification::Attached { session_id, target_id } => return self.on_attached(session_id, &target_id),
			Notification::Detached { session_id } => self.on_detached(&session_id),
		}
		Ok(())
	}

	fn on_created(self: &Arc<Self>, info: TargetInfo) {
		let target_id = info.target_id.as_str();
		if self.destroyed.lock().contains(target_id) {
			tracing::debug!(target_id, "Ignoring creation of destroyed target");
			return;
		}

		let existing = self.targets.read().get(target_id).cloned();
		if existing.is_some() {
			self.on_changed(&TargetChange::from(info));
			return;
		}

		let context_id = self.context_for(&info);
		self.register_context(context_id.clone());
		let target = Target::new(&info, context_id, Arc::downgrade(self));
		self.targets.write().insert(target.id_arc(), target.clone());
		tracing::debug!(
			target_id,
			target_type = %info.target_type,
			context = %target.context_id(),
			"Target reported"
		);

		if !info.target_type.requires_attach() {
			self.promote(&target);
		} else if self.options.auto_attach {
			self.spawn_attach(target.id_arc());
		}
	}

	fn on_attached(self: &Arc<Self>, session_id: String, target_id: &str) -> Result<()> {
		let Some(target) = self.targets.read().get(target_id).cloned() else {
			if self.destroyed.lock().contains(target_id) {
				tracing::debug!(target_id, session_id = %session_id, "Ignoring attach to destroyed target");
			} else {
				tracing::warn!(target_id, session_id = %session_id, "Ignoring attach to unknown target");
			}
			return Ok(());
		};

		match target.lifecycle() {
			Lifecycle::Pending => {}
			Lifecycle::Initialized if !target.target_type().requires_attach() => {
				self.bind_session(&target, session_id);
				return Ok(());
			}
			Lifecycle::Initialized | Lifecycle::Destroyed { .. } => {
				tracing::error!(target_id, session_id = %session_id, "Target initialized twice");
				self.violations.lock().push(ContractViolation::DuplicateInitialization {
					target_id: target_id.to_string(),
					session_id,
				});
				return Err(Error::DuplicateInitialization {
					target_id: target_id.to_string(),
				});
			}
		}

		self.bind_session(&target, session_id);
		self.promote(&target);
		Ok(())
	}

	fn on_changed(&self, change: &TargetChange) {
		let Some(target) = self.targets.read().get(change.target_id.as_str()).cloned() else {
			tracing::debug!(target_id = %change.target_id, "Ignoring change of unknown target");
			return;
		};
		if target.apply_change(change) && target.is_initialized() {
			tracing::debug!(target_id = %change.target_id, url = %target.url(), "Target changed");
			self.emit(TargetEvent::Changed(target));
		}
	}

	fn on_destroyed(&self, target_id: &str) {
		self.destroyed.lock().insert(Arc::from(target_id));
		self.destroyed_seq.send_modify(|seq| *seq += 1);

		let Some(target) = self.targets.read().get(target_id).cloned() else {
			tracing::debug!(target_id, "Ignoring destruction of unknown target");
			return;
		};

		let was_initialized = target.mark_destroyed();
		self.sessions.retain(|_, id| id.as_ref() != target_id);
		if was_initialized {
			tracing::debug!(target_id, "Target destroyed");
			self.emit(TargetEvent::Destroyed(target.clone()));
		} else {
			tracing::debug!(target_id, "Target destroyed before initialization");
		}
		self.targets.write().shift_remove(target_id);

		if let Some(Some(handle)) = target.handle_cell().get() {
			handle.on_target_destroyed();
		}
	}

	fn on_detached(&self, session_id: &str) {
		let Some((_, target_id)) = self.sessions.remove(session_id) else {
			return;
		};
		if let Some(target) = self.targets.read().get(&target_id) {
			target.set_session(None);
		}
		tracing::debug!(target_id = %target_id, session_id, "Session detached");
	}

	fn bind_session(&self, target: &Target, session_id: String) {
		self.sessions.insert(session_id.clone(), target.id_arc());
		target.set_session(Some(session_id));
	}

	fn promote(self: &Arc<Self>, target: &Target) {
		if target.mark_initialized() != Lifecycle::Pending {
			return;
		}
		tracing::debug!(target_id = %target.id(), target_type = %target.target_type(), "Target initialized");
		self.emit(TargetEvent::Created(target.clone()));

		if target.target_type().is_page_like() && self.options.eager_page_materialization {
			spawn_materialize(target.clone());
		}
	}

	/// Emits to the owning context, then browser-wide.
	fn emit(&self, event: TargetEvent) {
		let context = self.contexts.lock().get(event.target().context_id()).cloned();
		if let Some(context) = context {
			context.emit(event.clone());
		}
		self.browser_events.emit(event);
	}

	fn context_for(&self, info: &TargetInfo) -> ContextId {
		if info.target_type.is_worker() && self.options.worker_attribution == WorkerAttribution::Opener {
			let opener = info
				.opener_id
				.as_deref()
				.and_then(|opener_id| self.targets.read().get(opener_id).cloned());
			if let Some(opener) = opener {
				return opener.context_id().clone();
			}
		}
		ContextId::from_reported(
			info.browser_context_id.as_deref(),
			self.options.default_context_id.as_deref(),
		)
	}

	fn spawn_attach(&self, target_id: Arc<str>) {
		let Ok(runtime) = tokio::runtime::Handle::try_current() else {
			tracing::warn!(target_id = %target_id, "No async runtime, cannot attach to target");
			return;
		};
		let source = Arc::clone(&self.source);
		runtime.spawn(async move {
			match source.attach(&target_id).await {
				Ok(session_id) => {
					tracing::debug!(target_id = %target_id, session_id = %session_id, "Attach command completed");
				}
				Err(error) if error.is_target_closed() || error.is_disconnected() => {
					tracing::debug!(target_id = %target_id, error = %error, "Target went away before attach");
				}
				Err(error) => {
					tracing::warn!(target_id = %target_id, error = %error, "Failed to attach to target");
				}
			}
		});
	}

	/// Returns the handle of `target`, building it once.
	pub(crate) async fn resolve_handle(&self, target: &Target) -> Result<Option<Arc<dyn PageHandle>>> {
		let cell = target.handle_cell();
		if let Some(handle) = cell.get() {
			return Ok(handle.clone());
		}
		if self.is_closed() {
			return Err(Error::disconnected());
		}
		match target.lifecycle() {
			Lifecycle::Initialized => {}
			Lifecycle::Destroyed { .. } => {
				return Err(Error::TargetClosed {
					target_id: target.id().to_string(),
					context: "The target was destroyed before its page was created".to_string(),
				});
			}
			Lifecycle::Pending => {
				return Err(Error::InvalidArgument(format!("target {} is not initialized", target.id())));
			}
		}

		let mut closed = self.closed.subscribe();
		let factory = Arc::clone(&self.factory);
		let build = cell.get_or_try_init(|| {
			let target = target.clone();
			async move {
				tracing::debug!(target_id = %target.id(), "Creating page handle");
				if target.target_type().is_worker() {
					factory.create_worker(target).await
				} else {
					factory.create_page(target).await
				}
			}
		});

		tokio::select! {
			handle = build => handle.cloned(),
			_ = closed.wait_for(|closed| *closed) => Err(Error::disconnected()),
		}
	}

	/// Returns visible targets in insertion order, optionally restricted to
	/// one context.
	pub fn targets(&self, context: Option<&ContextId>) -> Vec<Target> {
		self.targets
			.read()
			.values()
			.filter(|target| target.is_initialized())
			.filter(|target| context.is_none_or(|id| target.context_id() == id))
			.cloned()
			.collect()
	}

	/// Returns true if a target with this id was ever destroyed.
	pub(crate) fn was_destroyed(&self, target_id: &str) -> bool {
		self.destroyed.lock().contains(target_id)
	}

	/// Subscribes to destruction notices; the value changes on every
	/// `destroyed` notification.
	pub(crate) fn destroyed_signal(&self) -> watch::Receiver<u64> {
		self.destroyed_seq.subscribe()
	}

	/// Returns the visible target with the given id.
	pub fn target(&self, target_id: &str) -> Option<Target> {
		self.targets
			.read()
			.get(target_id)
			.filter(|target| target.is_initialized())
			.cloned()
	}

	/// Returns the target bound to a session.
	pub fn target_for_session(&self, session_id: &str) -> Option<Target> {
		let target_id = self.sessions.get(session_id).map(|entry| Arc::clone(entry.value()))?;
		self.target(&target_id)
	}

	/// Returns the live contexts known to this registry, default first.
	pub fn contexts(&self) -> Vec<ContextId> {
		let disposed = self.disposed_contexts.lock();
		self.contexts
			.lock()
			.keys()
			.filter(|id| !disposed.contains(*id))
			.cloned()
			.collect()
	}

	pub(crate) fn register_context(&self, id: ContextId) {
		self.context_emitter(&id);
	}

	/// Hides a disposed context from [`contexts`](Self::contexts).
	///
	/// Its emitter stays registered, so listeners still observe the
	/// `targetdestroyed` events of its remaining targets and pending waits
	/// still fail when the registry closes.
	pub(crate) fn mark_context_disposed(&self, id: &ContextId) {
		self.disposed_contexts.lock().insert(id.clone());
	}

	/// Returns the emitter of a context, creating it on first use.
	pub(crate) fn context_emitter(&self, id: &ContextId) -> Arc<TargetEmitter> {
		let mut contexts = self.contexts.lock();
		let emitter = contexts
			.entry(id.clone())
			.or_insert_with(|| Arc::new(TargetEmitter::new(self.options.event_capacity)));
		if self.is_closed() {
			emitter.bus().close();
		}
		Arc::clone(emitter)
	}

	pub(crate) fn browser_emitter(&self) -> &TargetEmitter {
		&self.browser_events
	}

	/// Moves the registry to its terminal state.
	///
	/// Pending waits and page resolutions fail with
	/// [`Error::Disconnected`]; further notifications are rejected.
	pub fn close(&self) {
		if self.closed.send_replace(true) {
			return;
		}
		tracing::debug!(targets = self.targets.read().len(), "Registry closed");
		self.browser_events.bus().close();
		for emitter in self.contexts.lock().values() {
			emitter.bus().close();
		}
	}

	/// Returns true once [`close`](Self::close) has run.
	pub fn is_closed(&self) -> bool {
		*self.closed.borrow()
	}

	/// Returns the contract violations recorded so far.
	pub fn violations(&self) -> Vec<ContractViolation> {
		self.violations.lock().clone()
	}

	/// Returns the event source commands are issued to.
	pub fn source(&self) -> &Arc<dyn EventSource> {
		&self.source
	}

	/// Returns the options this registry was created with.
	pub fn options(&self) -> &BrowserOptions {
		&self.options
	}
}

impl fmt::Debug for Registry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Registry")
			.field("targets", &self.targets.read().len())
			.field("contexts", &self.contexts.lock().len())
			.field("closed", &self.is_closed())
			.finish()
	}
}

fn spawn_materialize(target: Target) {
	let Ok(runtime) = tokio::runtime::Handle::try_current() else {
		return;
	};
	runtime.spawn(async move {
		if let Err(error) = target.page().await {
			tracing::debug!(target_id = %target.id(), error = %error, "Eager page creation failed");
		}
	});
}
