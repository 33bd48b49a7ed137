//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use targetry::{Browser, BrowserOptions, MemoryEventSource, SessionPage, Subscription, TargetEventKind};
use tracing_subscriber::EnvFilter;

/// Installs a test log subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,targetry=debug")))
		.with_test_writer()
		.compact()
		.try_init();
}

/// Connects a browser to a fresh in-memory source.
pub async fn connect(options: BrowserOptions) -> (Browser, Arc<MemoryEventSource>) {
	init_tracing();
	let (source, notifications) = MemoryEventSource::new();
	let browser = Browser::connect(source.clone(), notifications, options)
		.await
		.expect("connect to memory source");
	(browser, source)
}

/// Options with manual attachment, for scripting `attached` by hand.
pub fn manual() -> BrowserOptions {
	BrowserOptions::new().auto_attach(false).eager_page_materialization(false)
}

/// Gives the coordination task time to drain queued notifications.
pub async fn settle() {
	for _ in 0..10 {
		tokio::task::yield_now().await;
	}
	tokio::time::sleep(Duration::from_millis(20)).await;
}

pub fn page_target_id(page: &Arc<dyn targetry::PageHandle>) -> String {
	page.clone()
		.downcast_arc::<SessionPage>()
		.map(|page| page.target_id().to_string())
		.expect("session page handle")
}

/// Records browser-wide target events as `(kind, target id)` pairs.
#[derive(Default)]
pub struct EventLog {
	events: Arc<Mutex<Vec<(TargetEventKind, String)>>>,
	subscriptions: Vec<Subscription>,
}

impl EventLog {
	pub fn attach(browser: &Browser) -> Self {
		let events = Arc::new(Mutex::new(Vec::new()));
		let subscriptions = [TargetEventKind::Created, TargetEventKind::Changed, TargetEventKind::Destroyed]
			.into_iter()
			.map(|kind| {
				let events = Arc::clone(&events);
				browser.on(kind, move |target| events.lock().push((kind, target.id().to_string())))
			})
			.collect();
		Self { events, subscriptions }
	}

	pub fn events(&self) -> Vec<(TargetEventKind, String)> {
		self.events.lock().clone()
	}

	pub fn for_target(&self, target_id: &str) -> Vec<TargetEventKind> {
		self.events
			.lock()
			.iter()
			.filter(|(_, id)| id == target_id)
			.map(|(kind, _)| *kind)
			.collect()
	}
}
