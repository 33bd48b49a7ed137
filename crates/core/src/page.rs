//! Automation handles attached to targets.
//!
//! The registry does not drive pages itself. When a page-like (or worker)
//! target is first asked for its handle, the registry calls the configured
//! [`PageFactory`] exactly once and caches the result on the target. Handles
//! are type-erased behind [`PageHandle`]; callers downcast to the concrete
//! type their factory produces.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use downcast_rs::{DowncastSync, impl_downcast};

use crate::Result;
use crate::target::Target;

/// A page or worker automation object owned by a [`PageFactory`].
pub trait PageHandle: DowncastSync + fmt::Debug {
	/// Called once when the owning target is destroyed.
	fn on_target_destroyed(&self) {}
}

impl_downcast!(sync PageHandle);

/// Boxed future resolving to an optional handle.
pub type HandleFuture = Pin<Box<dyn Future<Output = Result<Option<Arc<dyn PageHandle>>>> + Send>>;

/// Builds automation handles for initialized targets.
///
/// Each method is invoked at most once per target; concurrent callers share
/// the result. Returning `Ok(None)` means the target has no handle.
pub trait PageFactory: Send + Sync {
	/// Builds the handle of a page-like target.
	fn create_page(&self, target: Target) -> HandleFuture;

	/// Builds the handle of a worker target.
	fn create_worker(&self, target: Target) -> HandleFuture {
		let _ = target;
		Box::pin(async { Ok(None) })
	}
}

/// Default handle: the target and the session bound to it.
///
/// Commands for the page are sent on the connection with this session id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPage {
	target_id: String,
	session_id: Option<String>,
	is_worker: bool,
}

impl SessionPage {
	pub fn target_id(&self) -> &str {
		&self.target_id
	}

	pub fn session_id(&self) -> Option<&str> {
		self.session_id.as_deref()
	}

	pub fn is_worker(&self) -> bool {
		self.is_worker
	}
}

impl PageHandle for SessionPage {}

/// [`PageFactory`] producing [`SessionPage`] handles for pages and workers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionPageFactory;

impl SessionPageFactory {
	fn build(target: &Target, is_worker: bool) -> HandleFuture {
		let handle = SessionPage {
			target_id: target.id().to_string(),
			session_id: target.session_id(),
			is_worker,
		};
		Box::pin(async move { Ok(Some(Arc::new(handle) as Arc<dyn PageHandle>)) })
	}
}

impl PageFactory for SessionPageFactory {
	fn create_page(&self, target: Target) -> HandleFuture {
		Self::build(&target, false)
	}

	fn create_worker(&self, target: Target) -> HandleFuture {
		Self::build(&target, true)
	}
}
