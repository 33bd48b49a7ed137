//! The connection-level facade.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use targetry_protocol::{BrowserOptions, BrowserVersion, TargetType, WaitForTargetOptions};
use targetry_runtime::{Connection, EventSource, NotificationReceiver};
use tokio::task::JoinHandle;

use crate::Result;
use crate::context::{BrowserContext, ContextId, collect_pages};
use crate::events::{EventStream, TargetEvent, TargetEventKind};
use crate::handlers::Subscription;
use crate::page::{PageFactory, PageHandle, SessionPageFactory};
use crate::registry::{ContractViolation, Registry};
use crate::target::Target;
use crate::wait::TargetMatcher;

/// Process information of a connected browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowserProcess {
	pub pid: u32,
}

/// A connected browser.
///
/// Owns the target registry and the task feeding it. Cloning yields another
/// handle to the same connection.
#[derive(Clone)]
pub struct Browser {
	registry: Arc<Registry>,
	run_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Browser {
	/// Starts tracking targets of `source` with [`SessionPage`] handles.
	///
	/// Spawns the coordination task draining `notifications` and enables
	/// target discovery, so existing targets are reported immediately.
	///
	/// [`SessionPage`]: crate::SessionPage
	pub async fn connect(
		source: Arc<dyn EventSource>,
		notifications: NotificationReceiver,
		options: BrowserOptions,
	) -> Result<Self> {
		Self::connect_with_factory(source, notifications, Arc::new(SessionPageFactory), options).await
	}

	/// Like [`connect`](Self::connect), building handles with `factory`.
	pub async fn connect_with_factory(
		source: Arc<dyn EventSource>,
		notifications: NotificationReceiver,
		factory: Arc<dyn PageFactory>,
		options: BrowserOptions,
	) -> Result<Self> {
		let registry = Registry::new(source, factory, options);
		let run_task = tokio::spawn(Arc::clone(&registry).run(notifications));

		if let Err(error) = registry.source().discover(true).await {
			tracing::error!(error = %error, "Failed to enable target discovery");
			registry.close();
			run_task.abort();
			return Err(error);
		}

		tracing::debug!(ws_endpoint = ?registry.source().ws_endpoint(), "Browser connected");
		Ok(Self {
			registry,
			run_task: Arc::new(Mutex::new(Some(run_task))),
		})
	}

	/// Connects to a DevTools WebSocket endpoint.
	pub async fn connect_websocket(ws_endpoint: &str, options: BrowserOptions) -> Result<Self> {
		let (connection, notifications) = Connection::connect(ws_endpoint).await?;
		Self::connect(connection, notifications, options).await
	}

	/// Returns all visible targets in creation order.
	pub fn targets(&self) -> Vec<Target> {
		self.registry.targets(None)
	}

	/// Returns the browser target, if the source reports one.
	pub fn target(&self) -> Option<Target> {
		self.targets()
			.into_iter()
			.find(|target| target.target_type() == TargetType::Browser)
	}

	/// Returns the page handles of every context.
	pub async fn pages(&self) -> Result<Vec<Arc<dyn PageHandle>>> {
		collect_pages(self.targets()).await
	}

	pub fn default_context(&self) -> BrowserContext {
		BrowserContext::new(ContextId::default_context(), Arc::clone(&self.registry))
	}

	/// Returns the known contexts, default first.
	pub fn contexts(&self) -> Vec<BrowserContext> {
		self.registry
			.contexts()
			.into_iter()
			.map(|id| BrowserContext::new(id, Arc::clone(&self.registry)))
			.collect()
	}

	/// Creates an isolated context.
	pub async fn new_context(&self) -> Result<BrowserContext> {
		let id = self.registry.source().create_context().await?;
		let id = ContextId::isolated(id);
		self.registry.register_context(id.clone());
		tracing::debug!(context = %id, "Context created");
		Ok(BrowserContext::new(id, Arc::clone(&self.registry)))
	}

	/// Opens a blank page in the default context.
	pub async fn new_page(&self) -> Result<Arc<dyn PageHandle>> {
		self.default_context().new_page().await
	}

	/// Waits for a target in any context.
	pub async fn wait_for_target<M: TargetMatcher>(&self, matcher: M, options: WaitForTargetOptions) -> Result<Target> {
		self.registry.wait_for_target(None, matcher, options).await
	}

	/// Registers a listener for target events of every context.
	pub fn on<F>(&self, kind: TargetEventKind, listener: F) -> Subscription
	where
		F: Fn(&Target) + Send + Sync + 'static,
	{
		self.registry.browser_emitter().on(kind, listener)
	}

	pub fn once<F>(&self, kind: TargetEventKind, listener: F) -> Subscription
	where
		F: Fn(&Target) + Send + Sync + 'static,
	{
		self.registry.browser_emitter().once(kind, listener)
	}

	pub fn remove_listener(&self, subscription: Subscription) {
		subscription.unsubscribe();
	}

	/// Returns a stream of target events of every context.
	pub fn events(&self) -> EventStream<TargetEvent> {
		self.registry.browser_emitter().events()
	}

	pub async fn version(&self) -> Result<BrowserVersion> {
		self.registry.source().version().await
	}

	pub async fn user_agent(&self) -> Result<String> {
		Ok(self.version().await?.user_agent)
	}

	pub fn ws_endpoint(&self) -> Option<String> {
		self.registry.source().ws_endpoint()
	}

	pub fn process(&self) -> Option<BrowserProcess> {
		self.registry.source().process_id().map(|pid| BrowserProcess { pid })
	}

	pub fn is_connected(&self) -> bool {
		!self.registry.is_closed()
	}

	/// Returns the contract violations the registry recorded.
	pub fn violations(&self) -> Vec<ContractViolation> {
		self.registry.violations()
	}

	pub fn registry(&self) -> &Arc<Registry> {
		&self.registry
	}

	/// Closes the connection without closing the browser.
	///
	/// Pending waits and page resolutions fail with
	/// [`Error::Disconnected`](crate::Error::Disconnected).
	pub async fn disconnect(&self) -> Result<()> {
		let result = self.registry.source().disconnect().await;
		self.registry.close();
		if let Some(task) = self.run_task.lock().take() {
			task.abort();
		}
		tracing::debug!("Browser disconnected");
		result
	}
}

impl fmt::Debug for Browser {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Browser")
			.field("registry", &self.registry)
			.field("connected", &self.is_connected())
			.finish()
	}
}
