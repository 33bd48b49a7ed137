// Integration tests for target admission, visibility and event ordering
// through a connected Browser and the in-memory event source.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use common::{EventLog, connect, manual, page_target_id, settle};
use targetry::{
	BrowserOptions, ContractViolation, Notification, SourceCommand, TargetChange, TargetEventKind,
	TargetInfo, TargetPredicate, TargetType, WaitForTargetOptions,
};

fn wait() -> WaitForTargetOptions {
	WaitForTargetOptions::new().timeout_ms(5_000)
}

#[tokio::test]
async fn test_connect_enables_discovery() {
	let (_browser, source) = connect(BrowserOptions::new()).await;
	assert_eq!(source.commands(), vec![SourceCommand::Discover(true)]);
}

#[tokio::test]
async fn test_auto_attached_page_becomes_visible_once() {
	let (browser, source) = connect(BrowserOptions::new()).await;
	let log = EventLog::attach(&browser);

	source.created(TargetInfo::new("T1", TargetType::Page, "about:blank"));
	let target = browser
		.wait_for_target(TargetPredicate::id_is("T1"), wait())
		.await
		.unwrap();
	settle().await;

	assert_eq!(target.session_id().as_deref(), Some("session-1"));
	assert_eq!(log.for_target("T1"), vec![TargetEventKind::Created]);
	assert_eq!(browser.targets(), vec![target]);
	assert!(source.commands().contains(&SourceCommand::Attach("T1".into())));
}

#[tokio::test]
async fn test_full_event_sequence_is_ordered() {
	let (browser, source) = connect(manual()).await;
	let log = EventLog::attach(&browser);
	let mut stream = browser.events();

	source.created(TargetInfo::new("T1", TargetType::Page, "about:blank"));
	source.changed(TargetChange::new("T1").url("https://folded.example/"));
	source.attached("T1");
	source.changed(TargetChange::new("T1").url("https://one.example/"));
	source.changed(TargetChange::new("T1").title("One"));
	source.destroyed("T1");
	source.changed(TargetChange::new("T1").url("https://late.example/"));
	settle().await;

	assert_eq!(
		log.for_target("T1"),
		vec![
			TargetEventKind::Created,
			TargetEventKind::Changed,
			TargetEventKind::Changed,
			TargetEventKind::Destroyed,
		]
	);

	let mut kinds = Vec::new();
	while let Some(event) = stream.try_recv() {
		assert_eq!(event.target().id(), "T1");
		kinds.push(event.kind());
	}
	assert_eq!(kinds, log.for_target("T1"));
	assert!(browser.targets().is_empty());
}

#[tokio::test]
async fn test_destroyed_before_attach_is_never_visible() {
	let (browser, source) = connect(manual()).await;
	let log = EventLog::attach(&browser);

	source.created(TargetInfo::new("T1", TargetType::Page, "about:blank"));
	source.destroyed("T1");
	source.attached("T1");
	settle().await;

	assert!(log.events().is_empty());
	assert!(browser.targets().is_empty());
	assert!(browser.violations().is_empty());
}

#[tokio::test]
async fn test_targets_match_created_minus_destroyed() {
	let (browser, source) = connect(manual()).await;
	let log = EventLog::attach(&browser);

	for id in ["A", "B", "C", "D"] {
		source.created(TargetInfo::new(id, TargetType::Page, "about:blank"));
	}
	for id in ["A", "C", "D"] {
		source.attached(id);
	}
	source.destroyed("C");
	source.destroyed("B");
	settle().await;

	let visible: Vec<String> = browser.targets().iter().map(|t| t.id().to_string()).collect();
	let mut expected = Vec::new();
	for (kind, id) in log.events() {
		match kind {
			TargetEventKind::Created => expected.push(id),
			TargetEventKind::Destroyed => expected.retain(|existing| *existing != id),
			TargetEventKind::Changed => {}
		}
	}
	assert_eq!(visible, expected);
	assert_eq!(visible, ["A", "D"]);
}

#[tokio::test]
async fn test_duplicate_initialization_is_recorded() {
	let (browser, source) = connect(manual()).await;
	let log = EventLog::attach(&browser);

	source.created(TargetInfo::new("T1", TargetType::Page, "about:blank"));
	source.attached("T1");
	source.attached("T1");
	settle().await;

	assert_eq!(log.for_target("T1"), vec![TargetEventKind::Created]);
	let violations = browser.violations();
	assert_eq!(violations.len(), 1);
	assert!(matches!(
		&violations[0],
		ContractViolation::DuplicateInitialization { target_id, .. } if target_id == "T1"
	));
	assert!(browser.is_connected());
}

#[tokio::test]
async fn test_blank_page_appears_in_default_context() {
	let (browser, source) = connect(BrowserOptions::new()).await;

	source.created(TargetInfo::new("P1", TargetType::Page, "about:blank"));
	browser
		.wait_for_target(TargetPredicate::id_is("P1"), wait())
		.await
		.unwrap();

	let context = browser.default_context();
	let pages = context.pages().await.unwrap();
	assert_eq!(pages.len(), 1);
	assert_eq!(page_target_id(&pages[0]), "P1");
	assert_eq!(context.targets()[0].url(), "about:blank");
}

#[tokio::test]
async fn test_pages_skip_non_page_targets() {
	let (browser, source) = connect(manual()).await;
	source.created(TargetInfo::new("B", TargetType::Browser, ""));
	source.created(TargetInfo::new("W", TargetType::ServiceWorker, "https://a/sw.js"));
	source.created(TargetInfo::new("P", TargetType::Page, "https://a/"));
	source.attached("W");
	source.attached("P");
	settle().await;

	assert_eq!(browser.targets().len(), 3);
	assert_eq!(browser.target().unwrap().id(), "B");
	let pages = browser.pages().await.unwrap();
	assert_eq!(pages.len(), 1);
	assert_eq!(page_target_id(&pages[0]), "P");

	let worker = browser.targets().into_iter().find(|t| t.id() == "W").unwrap();
	assert!(worker.page().await.unwrap().is_none());
	assert!(worker.worker().await.unwrap().is_some());
}

#[tokio::test]
async fn test_opener_is_cleared_when_opener_is_destroyed() {
	let (browser, source) = connect(manual()).await;
	source.created(TargetInfo::new("A", TargetType::Page, "https://a/"));
	source.attached("A");
	source.created(TargetInfo::new("B", TargetType::Page, "https://b/").opener("A"));
	source.attached("B");
	settle().await;

	let b = browser.targets().into_iter().find(|t| t.id() == "B").unwrap();
	assert_eq!(b.opener().unwrap().id(), "A");

	source.destroyed("A");
	settle().await;
	assert!(b.opener().is_none());
	assert_eq!(b.opener_id(), Some("A"));
}

#[tokio::test]
async fn test_listener_sees_consistent_snapshot() {
	let (browser, source) = connect(manual()).await;
	let seen = Arc::new(Mutex::new(Vec::new()));

	let observer = browser.clone();
	let seen_clone = Arc::clone(&seen);
	let _sub = browser.on(TargetEventKind::Created, move |target| {
		let visible = observer.targets().iter().any(|t| t == target);
		seen_clone.lock().push(visible);
	});

	source.created(TargetInfo::new("T1", TargetType::Page, "about:blank"));
	source.attached("T1");
	settle().await;

	assert_eq!(*seen.lock(), vec![true]);
}

#[tokio::test]
async fn test_once_listener_and_removal() {
	let (browser, source) = connect(manual()).await;
	let hits = Arc::new(AtomicUsize::new(0));

	let once_hits = Arc::clone(&hits);
	let _once = browser.once(TargetEventKind::Created, move |_| {
		once_hits.fetch_add(1, Ordering::SeqCst);
	});
	let removed_hits = Arc::clone(&hits);
	let removed = browser.on(TargetEventKind::Created, move |_| {
		removed_hits.fetch_add(100, Ordering::SeqCst);
	});
	browser.remove_listener(removed);

	for id in ["B1", "B2"] {
		source.created(TargetInfo::new(id, TargetType::Browser, ""));
	}
	settle().await;

	assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stream_end_disconnects_pending_operations() {
	let (browser, source) = connect(manual()).await;
	let waiting = {
		let browser = browser.clone();
		tokio::spawn(async move {
			browser
				.wait_for_target(TargetPredicate::type_is(TargetType::Page), WaitForTargetOptions::new().timeout_ms(0))
				.await
		})
	};
	settle().await;

	source.hang_up();

	let result = tokio::time::timeout(Duration::from_secs(5), waiting).await.unwrap().unwrap();
	assert!(result.unwrap_err().is_disconnected());
	assert!(!browser.is_connected());
	assert!(
		browser
			.registry()
			.dispatch(Notification::created(TargetInfo::new("X", TargetType::Page, "")))
			.unwrap_err()
			.is_disconnected()
	);
}

#[tokio::test]
async fn test_disconnect_fails_new_page() {
	let (browser, source) = connect(BrowserOptions::new()).await;
	browser.disconnect().await.unwrap();

	assert!(!browser.is_connected());
	assert!(browser.new_page().await.unwrap_err().is_disconnected());
	assert!(source.commands().contains(&SourceCommand::Disconnect));
}
