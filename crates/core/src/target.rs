//! Target handles.
//!
//! A [`Target`] is a cheap, cloneable handle to one tab, worker, or other
//! browser-reported entity. Identity, type, context and opener are fixed at
//! creation. URL, title and session are updated in place by the registry.
//! The handle keeps only a weak reference to its registry, so holding a
//! target never keeps a connection alive.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use targetry_protocol::{TargetChange, TargetInfo, TargetType};
use tokio::sync::OnceCell;

use crate::context::{BrowserContext, ContextId};
use crate::page::PageHandle;
use crate::registry::Registry;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
	/// Reported but not yet set up; invisible.
	Pending,
	/// Visible.
	Initialized,
	/// Removed. `was_initialized` records whether it was ever visible.
	Destroyed { was_initialized: bool },
}

struct TargetState {
	url: String,
	title: String,
	session_id: Option<String>,
	lifecycle: Lifecycle,
}

struct TargetInner {
	id: Arc<str>,
	target_type: TargetType,
	context_id: ContextId,
	opener_id: Option<Arc<str>>,
	state: RwLock<TargetState>,
	handle: OnceCell<Option<Arc<dyn PageHandle>>>,
	registry: Weak<Registry>,
}

/// A browser target.
///
/// Two handles are equal when they refer to the same target object.
#[derive(Clone)]
pub struct Target {
	inner: Arc<TargetInner>,
}

impl Target {
	pub(crate) fn new(info: &TargetInfo, context_id: ContextId, registry: Weak<Registry>) -> Self {
		Self {
			inner: Arc::new(TargetInner {
				id: Arc::from(info.target_id.as_str()),
				target_type: info.target_type,
				context_id,
				opener_id: info.opener_id.as_deref().map(Arc::from),
				state: RwLock::new(TargetState {
					url: info.url.clone(),
					title: info.title.clone(),
					session_id: None,
					lifecycle: Lifecycle::Pending,
				}),
				handle: OnceCell::new(),
				registry,
			}),
		}
	}

	/// A target with no registry behind it.
	#[cfg(test)]
	pub(crate) fn detached_for_tests(info: TargetInfo) -> Self {
		Self::new(&info, ContextId::default_context(), Weak::new())
	}

	/// Returns the target id.
	pub fn id(&self) -> &str {
		&self.inner.id
	}

	pub(crate) fn id_arc(&self) -> Arc<str> {
		Arc::clone(&self.inner.id)
	}

	/// Returns the target type.
	pub fn target_type(&self) -> TargetType {
		self.inner.target_type
	}

	/// Returns the last reported URL.
	pub fn url(&self) -> String {
		self.inner.state.read().url.clone()
	}

	/// Returns the last reported title.
	pub fn title(&self) -> String {
		self.inner.state.read().title.clone()
	}

	/// Returns the id of the target that opened this one, if any.
	pub fn opener_id(&self) -> Option<&str> {
		self.inner.opener_id.as_deref()
	}

	/// Returns the id of the context this target belongs to.
	pub fn context_id(&self) -> &ContextId {
		&self.inner.context_id
	}

	/// Returns the session attached to this target, if any.
	pub fn session_id(&self) -> Option<String> {
		self.inner.state.read().session_id.clone()
	}

	/// Returns true once the target has been removed from its registry.
	pub fn is_destroyed(&self) -> bool {
		matches!(self.lifecycle(), Lifecycle::Destroyed { .. })
	}

	pub(crate) fn is_initialized(&self) -> bool {
		self.lifecycle() == Lifecycle::Initialized
	}

	pub(crate) fn lifecycle(&self) -> Lifecycle {
		self.inner.state.read().lifecycle
	}

	/// Returns the target that opened this one.
	///
	/// `None` if there is no opener or it is no longer visible.
	pub fn opener(&self) -> Option<Target> {
		let opener_id = self.inner.opener_id.as_deref()?;
		self.inner.registry.upgrade()?.target(opener_id)
	}

	/// Returns the context this target belongs to.
	///
	/// `None` once the registry is gone.
	pub fn browser_context(&self) -> Option<BrowserContext> {
		let registry = self.inner.registry.upgrade()?;
		Some(BrowserContext::new(self.inner.context_id.clone(), registry))
	}

	/// Returns the page handle of a page-like target, building it on first
	/// use.
	///
	/// Resolves to `None` for targets that are not page-like.
	///
	/// # Errors
	///
	/// - [`Error::TargetClosed`] if the target was destroyed before a handle
	///   was built
	/// - [`Error::Disconnected`] if the connection closes first
	pub async fn page(&self) -> Result<Option<Arc<dyn PageHandle>>> {
		if !self.inner.target_type.is_page_like() {
			return Ok(None);
		}
		self.resolve_handle().await
	}

	/// Returns the worker handle of a worker target, building it on first
	/// use. Resolves to `None` for other target types.
	pub async fn worker(&self) -> Result<Option<Arc<dyn PageHandle>>> {
		if !self.inner.target_type.is_worker() {
			return Ok(None);
		}
		self.resolve_handle().await
	}

	async fn resolve_handle(&self) -> Result<Option<Arc<dyn PageHandle>>> {
		if let Some(handle) = self.inner.handle.get() {
			return Ok(handle.clone());
		}
		let registry = self.inner.registry.upgrade().ok_or_else(Error::disconnected)?;
		registry.resolve_handle(self).await
	}

	pub(crate) fn handle_cell(&self) -> &OnceCell<Option<Arc<dyn PageHandle>>> {
		&self.inner.handle
	}

	pub(crate) fn set_session(&self, session_id: Option<String>) {
		self.inner.state.write().session_id = session_id;
	}

	/// Applies a change; returns true if anything differed.
	pub(crate) fn apply_change(&self, change: &TargetChange) -> bool {
		let mut state = self.inner.state.write();
		let mut changed = false;
		if let Some(url) = change.url.as_ref().filter(|url| **url != state.url) {
			state.url = url.clone();
			changed = true;
		}
		if let Some(title) = change.title.as_ref().filter(|title| **title != state.title) {
			state.title = title.clone();
			changed = true;
		}
		changed
	}

	/// Moves a pending target to initialized. Returns the previous state.
	pub(crate) fn mark_initialized(&self) -> Lifecycle {
		let mut state = self.inner.state.write();
		let previous = state.lifecycle;
		if previous == Lifecycle::Pending {
			state.lifecycle = Lifecycle::Initialized;
		}
		previous
	}

	/// Marks the target destroyed. Returns true if it had been visible.
	pub(crate) fn mark_destroyed(&self) -> bool {
		let mut state = self.inner.state.write();
		let was_initialized = match state.lifecycle {
			Lifecycle::Pending => false,
			Lifecycle::Initialized => true,
			Lifecycle::Destroyed { was_initialized } => was_initialized,
		};
		state.lifecycle = Lifecycle::Destroyed { was_initialized };
		state.session_id = None;
		was_initialized
	}
}

impl PartialEq for Target {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

impl Eq for Target {}

impl fmt::Debug for Target {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.inner.state.read();
		f.debug_struct("Target")
			.field("id", &self.inner.id)
			.field("type", &self.inner.target_type)
			.field("url", &state.url)
			.field("context", &self.inner.context_id)
			.field("lifecycle", &state.lifecycle)
			.finish()
	}
}
