//! Option structs for registry configuration and waits.
//!
//! Both structs deserialize from camelCase JSON so they can be embedded in a
//! host application's configuration file, and both expose builder methods.

use serde::{Deserialize, Serialize};

/// Default timeout in milliseconds for target waits.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default capacity of the broadcast channel behind each event stream.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// URL of the page opened by `new_page`.
pub const BLANK_PAGE_URL: &str = "about:blank";

/// How worker targets are assigned to a browser context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerAttribution {
	/// Use the context id the event source reports for the worker.
	#[default]
	Reported,
	/// Use the context of the worker's opener when it is known.
	Opener,
}

/// Configuration for a browser connection and its target registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserOptions {
	/// Timeout applied to waits that do not specify one.
	pub default_timeout_ms: u64,
	/// Attach to page and worker targets as soon as they are reported.
	pub auto_attach: bool,
	/// Start building page handles as soon as a page target initializes.
	pub eager_page_materialization: bool,
	/// Context id the browser uses for its default context, if it reports one.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub default_context_id: Option<String>,
	/// Context attribution for worker targets.
	pub worker_attribution: WorkerAttribution,
	/// Capacity of the broadcast channel behind event streams.
	pub event_capacity: usize,
}

impl Default for BrowserOptions {
	fn default() -> Self {
		Self {
			default_timeout_ms: DEFAULT_TIMEOUT_MS,
			auto_attach: true,
			eager_page_materialization: true,
			default_context_id: None,
			worker_attribution: WorkerAttribution::default(),
			event_capacity: DEFAULT_EVENT_CAPACITY,
		}
	}
}

impl BrowserOptions {
	/// Creates options with default values.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the default wait timeout.
	pub fn default_timeout_ms(mut self, timeout_ms: u64) -> Self {
		self.default_timeout_ms = timeout_ms;
		self
	}

	/// Enables or disables automatic attachment.
	pub fn auto_attach(mut self, enabled: bool) -> Self {
		self.auto_attach = enabled;
		self
	}

	/// Enables or disables eager page handle construction.
	pub fn eager_page_materialization(mut self, enabled: bool) -> Self {
		self.eager_page_materialization = enabled;
		self
	}

	/// Sets the id the browser reports for its default context.
	pub fn default_context_id(mut self, id: impl Into<String>) -> Self {
		self.default_context_id = Some(id.into());
		self
	}

	/// Sets how workers are attributed to contexts.
	pub fn worker_attribution(mut self, attribution: WorkerAttribution) -> Self {
		self.worker_attribution = attribution;
		self
	}

	/// Sets the broadcast channel capacity.
	pub fn event_capacity(mut self, capacity: usize) -> Self {
		self.event_capacity = capacity.max(1);
		self
	}
}

/// Options for `wait_for_target`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitForTargetOptions {
	/// Maximum wait in milliseconds; `0` waits without a deadline.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub timeout_ms: Option<u64>,
}

impl WaitForTargetOptions {
	/// Creates new default options.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the timeout.
	pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
		self.timeout_ms = Some(timeout_ms);
		self
	}
}
