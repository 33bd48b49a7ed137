//! Predicate waits over the registry.
//!
//! A wait first checks the currently visible targets and, if none matches,
//! registers a waiter for future `targetcreated` events. Both steps happen
//! under the scope's waiter lock, so a target promoted concurrently is seen
//! by exactly one of them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use targetry_protocol::{TargetType, WaitForTargetOptions};

use crate::context::ContextId;
use crate::events::{Delivery, TargetEvent, TargetEventKind, WaiterRegistration};
use crate::registry::Registry;
use crate::target::Target;
use crate::{Error, Result};

/// Anything that can decide whether a target satisfies a wait.
///
/// Implemented for closures `Fn(&Target) -> bool` and for
/// [`TargetPredicate`].
pub trait TargetMatcher: Send + Sync + 'static {
	fn matches(&self, target: &Target) -> bool;
}

impl<F> TargetMatcher for F
where
	F: Fn(&Target) -> bool + Send + Sync + 'static,
{
	fn matches(&self, target: &Target) -> bool {
		self(target)
	}
}

/// A reusable, composable target predicate.
#[derive(Clone)]
pub struct TargetPredicate {
	description: String,
	test: Arc<dyn Fn(&Target) -> bool + Send + Sync>,
}

impl TargetPredicate {
	/// Wraps a closure.
	pub fn new<F>(description: impl Into<String>, test: F) -> Self
	where
		F: Fn(&Target) -> bool + Send + Sync + 'static,
	{
		Self {
			description: description.into(),
			test: Arc::new(test),
		}
	}

	/// Matches targets of the given type.
	pub fn type_is(target_type: TargetType) -> Self {
		Self::new(format!("type == {target_type}"), move |target| target.target_type() == target_type)
	}

	/// Matches targets whose URL equals `url`.
	pub fn url_is(url: impl Into<String>) -> Self {
		let url = url.into();
		Self::new(format!("url == {url}"), move |target| target.url() == url)
	}

	/// Matches targets whose URL matches a glob pattern.
	///
	/// An invalid pattern falls back to exact matching.
	pub fn url_matches(pattern: &str) -> Self {
		let compiled = glob::Pattern::new(pattern)
			.or_else(|_| glob::Pattern::new(&glob::Pattern::escape(pattern)))
			.ok();
		let literal = pattern.to_string();
		Self::new(format!("url ~ {pattern}"), move |target| {
			let url = target.url();
			match &compiled {
				Some(compiled) => compiled.matches(&url),
				None => url == literal,
			}
		})
	}

	/// Matches targets opened by the target with the given id.
	pub fn opener_is(opener_id: impl Into<String>) -> Self {
		let opener_id = opener_id.into();
		Self::new(format!("opener == {opener_id}"), move |target| {
			target.opener_id() == Some(opener_id.as_str())
		})
	}

	/// Matches the target with the given id.
	pub fn id_is(target_id: impl Into<String>) -> Self {
		let target_id = target_id.into();
		Self::new(format!("id == {target_id}"), move |target| target.id() == target_id)
	}

	/// Matches targets satisfying both predicates.
	pub fn and(self, other: TargetPredicate) -> Self {
		let description = format!("{} && {}", self.description, other.description);
		Self::new(description, move |target| self.matches(target) && other.matches(target))
	}
}

impl TargetMatcher for TargetPredicate {
	fn matches(&self, target: &Target) -> bool {
		(self.test)(target)
	}
}

impl fmt::Debug for TargetPredicate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("TargetPredicate").field(&self.description).finish()
	}
}

impl Registry {
	/// Waits for a visible target satisfying `matcher`.
	///
	/// Returns an existing match immediately. Otherwise resolves with the
	/// first target created afterwards that matches and is not handed to an
	/// earlier pending wait of the same scope. `scope` restricts the wait to
	/// one context; `None` waits browser-wide.
	///
	/// # Errors
	///
	/// - [`Error::Timeout`] if the deadline passes first
	/// - [`Error::Disconnected`] if the registry closes first
	pub async fn wait_for_target<M: TargetMatcher>(
		&self,
		scope: Option<&ContextId>,
		matcher: M,
		options: WaitForTargetOptions,
	) -> Result<Target> {
		let timeout_ms = options.timeout_ms.unwrap_or(self.options().default_timeout_ms);
		self.wait_with(scope, matcher, timeout_ms, Delivery::Claim).await
	}

	/// Waits, without a deadline, until the target with `target_id` is
	/// visible. Never competes with other waits for the event.
	///
	/// # Errors
	///
	/// - [`Error::TargetClosed`] if the target is destroyed first, including
	///   before the wait started
	/// - [`Error::Disconnected`] if the registry closes first
	pub(crate) async fn wait_for_id(&self, target_id: &str) -> Result<Target> {
		// Subscribed before the first check so no destruction slips between.
		let mut destroyed = self.destroyed_signal();
		let wanted = target_id.to_string();
		let wait = self.wait_with(None, move |target: &Target| target.id() == wanted, 0, Delivery::Shared);
		tokio::pin!(wait);

		loop {
			if self.was_destroyed(target_id) {
				tracing::debug!(target_id, "Target destroyed while waiting for it");
				return Err(Error::TargetClosed {
					target_id: target_id.to_string(),
					context: "The target was destroyed before it was initialized".to_string(),
				});
			}
			tokio::select! {
				biased;
				result = &mut wait => return result,
				changed = destroyed.changed() => {
					if changed.is_err() {
						return Err(Error::disconnected());
					}
				}
			}
		}
	}

	async fn wait_with<M: TargetMatcher>(
		&self,
		scope: Option<&ContextId>,
		matcher: M,
		timeout_ms: u64,
		delivery: Delivery,
	) -> Result<Target> {
		if self.is_closed() {
			return Err(Error::disconnected());
		}

		let context_emitter;
		let bus = match scope {
			Some(id) => {
				context_emitter = self.context_emitter(id);
				context_emitter.bus()
			}
			None => self.browser_emitter().bus(),
		};

		let matcher = Arc::new(matcher);
		let event_matcher = Arc::clone(&matcher);
		let registration = bus.register_waiter_unless(
			|| {
				self.targets(scope)
					.into_iter()
					.find(|target| matcher.matches(target))
					.map(TargetEvent::Created)
			},
			move |event: &TargetEvent| {
				event.kind() == TargetEventKind::Created && event_matcher.matches(event.target())
			},
			delivery,
		);

		let waiter = match registration {
			WaiterRegistration::Ready(event) => return Ok(event.into_target()),
			WaiterRegistration::Closed => return Err(Error::disconnected()),
			WaiterRegistration::Pending(waiter) => waiter,
		};

		let event = if timeout_ms == 0 {
			waiter.await?
		} else {
			tokio::time::timeout(Duration::from_millis(timeout_ms), waiter)
				.await
				.map_err(|_| {
					tracing::debug!(timeout_ms, "Target wait timed out");
					Error::Timeout(format!("Waiting for target failed: timeout {timeout_ms}ms exceeded"))
				})??
		};
		Ok(event.into_target())
	}
}
