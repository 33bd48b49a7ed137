//! Browser contexts.
//!
//! A context groups targets: the browser's default context plus any number
//! of isolated ones. Contexts store nothing themselves; every query is a
//! filtered view of the registry.

use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use targetry_protocol::{BLANK_PAGE_URL, WaitForTargetOptions};

use crate::events::{EventStream, TargetEvent, TargetEventKind};
use crate::handlers::Subscription;
use crate::page::PageHandle;
use crate::registry::Registry;
use crate::target::Target;
use crate::wait::TargetMatcher;
use crate::{Error, Result};

/// Identifier of a browser context.
///
/// The default context has no protocol id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(Option<Arc<str>>);

impl ContextId {
	/// The browser's default context.
	pub fn default_context() -> Self {
		Self(None)
	}

	/// An isolated context. An empty id names the default context.
	pub fn isolated(id: impl AsRef<str>) -> Self {
		match id.as_ref() {
			"" => Self::default_context(),
			id => Self(Some(Arc::from(id))),
		}
	}

	/// Maps a reported context id to a context, folding the configured
	/// default id into the default context.
	pub(crate) fn from_reported(reported: Option<&str>, default_id: Option<&str>) -> Self {
		match reported {
			None => Self::default_context(),
			Some(id) if Some(id) == default_id => Self::default_context(),
			Some(id) => Self::isolated(id),
		}
	}

	pub fn is_default(&self) -> bool {
		self.0.is_none()
	}

	/// Returns the protocol id, `None` for the default context.
	pub fn as_str(&self) -> Option<&str> {
		self.0.as_deref()
	}
}

impl Default for ContextId {
	fn default() -> Self {
		Self::default_context()
	}
}

impl fmt::Display for ContextId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str().unwrap_or("default"))
	}
}

/// A view of one context of a connected browser.
#[derive(Clone)]
pub struct BrowserContext {
	id: ContextId,
	registry: Arc<Registry>,
}

impl BrowserContext {
	pub(crate) fn new(id: ContextId, registry: Arc<Registry>) -> Self {
		Self { id, registry }
	}

	pub fn id(&self) -> &ContextId {
		&self.id
	}

	pub fn is_default(&self) -> bool {
		self.id.is_default()
	}

	/// Returns the visible targets of this context in creation order.
	pub fn targets(&self) -> Vec<Target> {
		self.registry.targets(Some(&self.id))
	}

	/// Returns the page handles of this context's page-like targets.
	///
	/// Handles are resolved concurrently and returned in target order.
	/// Targets destroyed while resolving are skipped.
	pub async fn pages(&self) -> Result<Vec<Arc<dyn PageHandle>>> {
		collect_pages(self.targets()).await
	}

	/// Opens a blank page in this context and returns its handle once the
	/// target is initialized.
	pub async fn new_page(&self) -> Result<Arc<dyn PageHandle>> {
		let source = Arc::clone(self.registry.source());
		let target_id = source.create(self.id.as_str(), Some(BLANK_PAGE_URL)).await?;
		tracing::debug!(target_id = %target_id, context = %self.id, "Page created");

		let target = self.registry.wait_for_id(&target_id).await?;
		target.page().await?.ok_or_else(|| {
			Error::ProtocolError(format!("target {target_id} of type {} has no page", target.target_type()))
		})
	}

	/// Waits for a target of this context satisfying `matcher`.
	pub async fn wait_for_target<M: TargetMatcher>(&self, matcher: M, options: WaitForTargetOptions) -> Result<Target> {
		self.registry.wait_for_target(Some(&self.id), matcher, options).await
	}

	/// Registers a listener for a target event of this context.
	pub fn on<F>(&self, kind: TargetEventKind, listener: F) -> Subscription
	where
		F: Fn(&Target) + Send + Sync + 'static,
	{
		self.registry.context_emitter(&self.id).on(kind, listener)
	}

	/// Registers a listener that fires at most once.
	pub fn once<F>(&self, kind: TargetEventKind, listener: F) -> Subscription
	where
		F: Fn(&Target) + Send + Sync + 'static,
	{
		self.registry.context_emitter(&self.id).once(kind, listener)
	}

	/// Removes a listener.
	pub fn remove_listener(&self, subscription: Subscription) {
		subscription.unsubscribe();
	}

	/// Returns a stream of this context's target events.
	pub fn events(&self) -> EventStream<TargetEvent> {
		self.registry.context_emitter(&self.id).events()
	}

	/// Disposes an isolated context and its targets.
	///
	/// # Errors
	///
	/// [`Error::InvalidArgument`] for the default context.
	pub async fn close(&self) -> Result<()> {
		let Some(id) = self.id.as_str() else {
			return Err(Error::InvalidArgument("the default context cannot be closed".to_string()));
		};
		self.registry.source().dispose_context(id).await?;
		self.registry.mark_context_disposed(&self.id);
		tracing::debug!(context = %self.id, "Context disposed");
		Ok(())
	}
}

impl fmt::Debug for BrowserContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BrowserContext").field("id", &self.id).finish()
	}
}

/// Resolves the page handles of the page-like targets among `targets`.
pub(crate) async fn collect_pages(targets: Vec<Target>) -> Result<Vec<Arc<dyn PageHandle>>> {
	let page_targets: Vec<Target> = targets
		.into_iter()
		.filter(|target| target.target_type().is_page_like())
		.collect();
	let resolved = join_all(page_targets.iter().map(Target::page)).await;

	let mut pages = Vec::with_capacity(resolved.len());
	for result in resolved {
		match result {
			Ok(Some(page)) => pages.push(page),
			Ok(None) => {}
			Err(error) if error.is_target_closed() => {}
			Err(error) => return Err(error),
		}
	}
	Ok(pages)
}
