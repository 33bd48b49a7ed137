//! Targetry: target lifecycle tracking for DevTools-protocol browsers.
//!
//! A connected [`Browser`] keeps a registry of every target (tab, worker,
//! extension page, the browser itself) reported by its event source. A
//! target becomes visible only once its session is set up, at which point a
//! `targetcreated` event fires exactly once; `targetchanged` and
//! `targetdestroyed` follow in notification order.
//!
//! # Example
//!
//! ```ignore
//! use targetry::{Browser, BrowserOptions, TargetEventKind, TargetPredicate, TargetType, WaitForTargetOptions};
//!
//! let browser = Browser::connect_websocket("ws://127.0.0.1:9222/devtools/browser/...", BrowserOptions::new()).await?;
//!
//! let _sub = browser.on(TargetEventKind::Created, |target| {
//!     println!("{} {}", target.target_type(), target.url());
//! });
//!
//! let popup = browser
//!     .wait_for_target(TargetPredicate::type_is(TargetType::Page), WaitForTargetOptions::new().timeout_ms(5_000))
//!     .await?;
//! let page = popup.page().await?;
//! ```

mod browser;
mod context;
mod events;
mod handlers;
mod memory;
mod page;
mod registry;
mod target;
mod wait;

pub use browser::{Browser, BrowserProcess};
pub use context::{BrowserContext, ContextId};
pub use events::{EventStream, TargetEvent, TargetEventKind};
pub use handlers::{HandlerId, Subscription};
pub use memory::{MemoryEventSource, SourceCommand};
pub use page::{HandleFuture, PageFactory, PageHandle, SessionPage, SessionPageFactory};
pub use registry::{ContractViolation, Registry};
pub use target::Target;
pub use targetry_protocol::{
	BLANK_PAGE_URL, BrowserOptions, BrowserVersion, DEFAULT_TIMEOUT_MS, Notification, TargetChange, TargetInfo,
	TargetType, WaitForTargetOptions, WorkerAttribution,
};
pub use targetry_runtime::{Connection, Error, EventSource, NotificationReceiver, NotificationSender, Result};
pub use wait::{TargetMatcher, TargetPredicate};
