//! Core protocol types used across the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of browsing or execution context a target represents.
///
/// Unknown protocol strings deserialize to [`TargetType::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
	/// A top-level tab or popup.
	Page,
	/// An extension background page.
	BackgroundPage,
	/// An embedded webview.
	Webview,
	/// The browser process itself.
	Browser,
	/// A service worker.
	ServiceWorker,
	/// A shared worker.
	SharedWorker,
	/// A dedicated worker.
	Worker,
	/// Anything else the browser reports.
	#[serde(other)]
	Other,
}

impl TargetType {
	/// Returns `true` for targets backed by a page handle.
	pub fn is_page_like(self) -> bool {
		matches!(self, Self::Page | Self::BackgroundPage | Self::Webview)
	}

	/// Returns `true` for worker targets.
	pub fn is_worker(self) -> bool {
		matches!(self, Self::ServiceWorker | Self::SharedWorker | Self::Worker)
	}

	/// Returns `true` if the target must be attached before it is usable.
	///
	/// Targets that need no session (the browser itself, unknown kinds)
	/// complete setup as soon as they are reported.
	pub fn requires_attach(self) -> bool {
		self.is_page_like() || self.is_worker()
	}

	/// Returns the protocol string for this type.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Page => "page",
			Self::BackgroundPage => "background_page",
			Self::Webview => "webview",
			Self::Browser => "browser",
			Self::ServiceWorker => "service_worker",
			Self::SharedWorker => "shared_worker",
			Self::Worker => "worker",
			Self::Other => "other",
		}
	}
}

impl fmt::Display for TargetType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Description of a target as reported by the event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
	/// Opaque identifier, unique for the lifetime of the connection.
	pub target_id: String,
	/// Target kind.
	#[serde(rename = "type")]
	pub target_type: TargetType,
	/// Page title, empty until the browser reports one.
	#[serde(default)]
	pub title: String,
	/// Current URL.
	#[serde(default)]
	pub url: String,
	/// Whether some client is already attached.
	#[serde(default)]
	pub attached: bool,
	/// Target that opened this one (popups, `window.open`).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub opener_id: Option<String>,
	/// Browser context the target lives in.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub browser_context_id: Option<String>,
}

impl TargetInfo {
	/// Creates a new target description with an empty title.
	pub fn new(target_id: impl Into<String>, target_type: TargetType, url: impl Into<String>) -> Self {
		Self {
			target_id: target_id.into(),
			target_type,
			title: String::new(),
			url: url.into(),
			attached: false,
			opener_id: None,
			browser_context_id: None,
		}
	}

	/// Sets the opener target id.
	pub fn opener(mut self, opener_id: impl Into<String>) -> Self {
		self.opener_id = Some(opener_id.into());
		self
	}

	/// Sets the browser context id.
	pub fn context(mut self, context_id: impl Into<String>) -> Self {
		self.browser_context_id = Some(context_id.into());
		self
	}

	/// Sets the title.
	pub fn title(mut self, title: impl Into<String>) -> Self {
		self.title = title.into();
		self
	}
}

/// Mutable fields of a target carried by a `changed` notification.
///
/// Fields left as `None` keep their current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetChange {
	/// Target being updated.
	pub target_id: String,
	/// New URL.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
	/// New title.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
}

impl TargetChange {
	/// Creates an empty change for `target_id`.
	pub fn new(target_id: impl Into<String>) -> Self {
		Self {
			target_id: target_id.into(),
			url: None,
			title: None,
		}
	}

	/// Sets the new URL.
	pub fn url(mut self, url: impl Into<String>) -> Self {
		self.url = Some(url.into());
		self
	}

	/// Sets the new title.
	pub fn title(mut self, title: impl Into<String>) -> Self {
		self.title = Some(title.into());
		self
	}
}

impl From<TargetInfo> for TargetChange {
	fn from(info: TargetInfo) -> Self {
		Self {
			target_id: info.target_id,
			url: Some(info.url),
			title: Some(info.title),
		}
	}
}

/// Browser build information returned by `Browser.getVersion`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserVersion {
	/// Protocol version, e.g. `"1.3"`.
	#[serde(default)]
	pub protocol_version: String,
	/// Product name and version, e.g. `"HeadlessChrome/120.0.6099.0"`.
	#[serde(default)]
	pub product: String,
	/// Product revision.
	#[serde(default)]
	pub revision: String,
	/// Default user agent.
	#[serde(default)]
	pub user_agent: String,
	/// JavaScript engine version.
	#[serde(default)]
	pub js_version: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_target_type_from_protocol_string() {
		let ty: TargetType = serde_json::from_str("\"service_worker\"").unwrap();
		assert_eq!(ty, TargetType::ServiceWorker);

		let ty: TargetType = serde_json::from_str("\"auction_worklet\"").unwrap();
		assert_eq!(ty, TargetType::Other);
	}

	#[test]
	fn test_target_type_classification() {
		assert!(TargetType::Page.requires_attach());
		assert!(TargetType::SharedWorker.requires_attach());
		assert!(!TargetType::Browser.requires_attach());
		assert!(!TargetType::Other.requires_attach());
		assert!(TargetType::Webview.is_page_like());
		assert!(!TargetType::ServiceWorker.is_page_like());
	}

	#[test]
	fn test_target_info_deserialization() {
		let json = r#"{
			"targetId": "T1",
			"type": "page",
			"title": "",
			"url": "about:blank",
			"attached": false,
			"openerId": "T0",
			"browserContextId": "C1",
			"canAccessOpener": false
		}"#;
		let info: TargetInfo = serde_json::from_str(json).unwrap();
		assert_eq!(info.target_id, "T1");
		assert_eq!(info.target_type, TargetType::Page);
		assert_eq!(info.opener_id.as_deref(), Some("T0"));
		assert_eq!(info.browser_context_id.as_deref(), Some("C1"));
	}

	#[test]
	fn test_target_info_minimal_fields() {
		let json = r#"{"targetId": "W", "type": "worker"}"#;
		let info: TargetInfo = serde_json::from_str(json).unwrap();
		assert_eq!(info.url, "");
		assert!(info.opener_id.is_none());
	}

	#[test]
	fn test_change_from_info_carries_url_and_title() {
		let info = TargetInfo::new("T1", TargetType::Page, "https://example.com").title("Example");
		let change = TargetChange::from(info);
		assert_eq!(change.url.as_deref(), Some("https://example.com"));
		assert_eq!(change.title.as_deref(), Some("Example"));
	}
}
