//! A scriptable, in-memory event source.
//!
//! [`MemoryEventSource`] behaves like a small browser: commands are recorded
//! and answered locally, and the notifications a real browser would send in
//! response are pushed onto the stream. Tests and embedders can also push
//! arbitrary notifications to script edge cases.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use targetry_protocol::{BLANK_PAGE_URL, BrowserVersion, Notification, TargetChange, TargetInfo, TargetType};
use targetry_runtime::{EventSource, NotificationReceiver, NotificationSender, SourceFuture};
use tokio::sync::mpsc;

use crate::{Error, Result};

/// A command received by a [`MemoryEventSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCommand {
	Discover(bool),
	Attach(String),
	Create { context_id: Option<String>, url: Option<String> },
	Close(String),
	CreateContext,
	DisposeContext(String),
	Version,
	Disconnect,
}

struct CreatedTarget {
	target_id: String,
	context_id: Option<String>,
}

/// In-memory [`EventSource`].
pub struct MemoryEventSource {
	tx: Mutex<Option<NotificationSender>>,
	disconnected: AtomicBool,
	auto_attach_on_create: AtomicBool,
	next_target: AtomicU64,
	next_session: AtomicU64,
	next_context: AtomicU64,
	commands: Mutex<Vec<SourceCommand>>,
	live_targets: Mutex<Vec<CreatedTarget>>,
	version: BrowserVersion,
}

impl MemoryEventSource {
	/// Creates a source and the notification stream it feeds.
	pub fn new() -> (Arc<Self>, NotificationReceiver) {
		let (tx, rx) = mpsc::unbounded_channel();
		let source = Arc::new(Self {
			tx: Mutex::new(Some(tx)),
			disconnected: AtomicBool::new(false),
			auto_attach_on_create: AtomicBool::new(false),
			next_target: AtomicU64::new(1),
			next_session: AtomicU64::new(1),
			next_context: AtomicU64::new(1),
			commands: Mutex::new(Vec::new()),
			live_targets: Mutex::new(Vec::new()),
			version: BrowserVersion {
				protocol_version: "1.3".to_string(),
				product: "MemoryBrowser/1.0".to_string(),
				revision: "0".to_string(),
				user_agent: "Mozilla/5.0 (targetry) MemoryBrowser/1.0".to_string(),
				js_version: "0".to_string(),
			},
		});
		(source, rx)
	}

	/// Makes `create` push `attached` right after `created`, like a browser
	/// with auto-attach enabled.
	///
	/// Pair with `BrowserOptions::auto_attach(false)`, otherwise the
	/// registry's own attach initializes the target a second time.
	pub fn set_auto_attach_on_create(&self, enabled: bool) {
		self.auto_attach_on_create.store(enabled, Ordering::SeqCst);
	}

	/// Pushes a notification. Returns false once the stream has ended.
	pub fn emit(&self, notification: Notification) -> bool {
		match self.tx.lock().as_ref() {
			Some(tx) => tx.send(notification).is_ok(),
			None => false,
		}
	}

	/// Pushes `created`.
	pub fn created(&self, info: TargetInfo) -> bool {
		self.emit(Notification::created(info))
	}

	/// Pushes `changed`.
	pub fn changed(&self, change: TargetChange) -> bool {
		self.emit(Notification::changed(change))
	}

	/// Pushes `destroyed`.
	pub fn destroyed(&self, target_id: impl Into<String>) -> bool {
		self.emit(Notification::destroyed(target_id))
	}

	/// Pushes `attached` with a fresh session id and returns the id.
	pub fn attached(&self, target_id: impl Into<String>) -> String {
		let session_id = self.next_session_id();
		self.emit(Notification::attached(session_id.clone(), target_id));
		session_id
	}

	/// Ends the notification stream without recording a command, as a
	/// crashed browser would.
	pub fn hang_up(&self) {
		self.disconnected.store(true, Ordering::SeqCst);
		self.tx.lock().take();
	}

	/// Returns the commands received so far.
	pub fn commands(&self) -> Vec<SourceCommand> {
		self.commands.lock().clone()
	}

	fn record(&self, command: SourceCommand) -> Result<()> {
		self.commands.lock().push(command);
		if self.disconnected.load(Ordering::SeqCst) {
			return Err(Error::disconnected());
		}
		Ok(())
	}

	fn next_session_id(&self) -> String {
		format!("session-{}", self.next_session.fetch_add(1, Ordering::SeqCst))
	}
}

impl EventSource for MemoryEventSource {
	fn discover(&self, enabled: bool) -> SourceFuture<'_, ()> {
		Box::pin(async move { self.record(SourceCommand::Discover(enabled)) })
	}

	fn attach(&self, target_id: &str) -> SourceFuture<'_, String> {
		let target_id = target_id.to_string();
		Box::pin(async move {
			self.record(SourceCommand::Attach(target_id.clone()))?;
			Ok(self.attached(target_id))
		})
	}

	fn create(&self, context_id: Option<&str>, url: Option<&str>) -> SourceFuture<'_, String> {
		let context_id = context_id.map(str::to_string);
		let url = url.map(str::to_string);
		Box::pin(async move {
			self.record(SourceCommand::Create {
				context_id: context_id.clone(),
				url: url.clone(),
			})?;

			let target_id = format!("target-{}", self.next_target.fetch_add(1, Ordering::SeqCst));
			let mut info = TargetInfo::new(target_id.clone(), TargetType::Page, url.as_deref().unwrap_or(BLANK_PAGE_URL));
			info.browser_context_id = context_id.clone();
			self.live_targets.lock().push(CreatedTarget {
				target_id: target_id.clone(),
				context_id,
			});

			self.created(info);
			if self.auto_attach_on_create.load(Ordering::SeqCst) {
				self.attached(target_id.clone());
			}
			Ok(target_id)
		})
	}

	fn close(&self, target_id: &str) -> SourceFuture<'_, ()> {
		let target_id = target_id.to_string();
		Box::pin(async move {
			self.record(SourceCommand::Close(target_id.clone()))?;
			self.live_targets.lock().retain(|target| target.target_id != target_id);
			self.destroyed(target_id);
			Ok(())
		})
	}

	fn create_context(&self) -> SourceFuture<'_, String> {
		Box::pin(async move {
			self.record(SourceCommand::CreateContext)?;
			Ok(format!("context-{}", self.next_context.fetch_add(1, Ordering::SeqCst)))
		})
	}

	fn dispose_context(&self, context_id: &str) -> SourceFuture<'_, ()> {
		let context_id = context_id.to_string();
		Box::pin(async move {
			self.record(SourceCommand::DisposeContext(context_id.clone()))?;
			let doomed: Vec<String> = {
				let mut live = self.live_targets.lock();
				let (doomed, kept) = live
					.drain(..)
					.partition::<Vec<_>, _>(|target| target.context_id.as_deref() == Some(context_id.as_str()));
				*live = kept;
				doomed.into_iter().map(|target| target.target_id).collect()
			};
			for target_id in doomed {
				self.destroyed(target_id);
			}
			Ok(())
		})
	}

	fn version(&self) -> SourceFuture<'_, BrowserVersion> {
		Box::pin(async move {
			self.record(SourceCommand::Version)?;
			Ok(self.version.clone())
		})
	}

	fn disconnect(&self) -> SourceFuture<'_, ()> {
		Box::pin(async move {
			self.commands.lock().push(SourceCommand::Disconnect);
			self.hang_up();
			Ok(())
		})
	}

	fn ws_endpoint(&self) -> Option<String> {
		Some("memory://".to_string())
	}
}
