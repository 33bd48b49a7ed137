//! Ordered notifications delivered by an event source.
//!
//! An event source reports target lifecycle changes as a single ordered
//! stream of [`Notification`] values. DevTools `Target.*` events map onto
//! this stream via [`Notification::from_cdp`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{TargetChange, TargetInfo};

/// A single target lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
	/// A target came into existence.
	Created {
		/// Initial description.
		info: TargetInfo,
	},
	/// A target's URL or title changed.
	Changed {
		/// Updated fields.
		change: TargetChange,
	},
	/// A target went away.
	Destroyed {
		/// Destroyed target id.
		target_id: String,
	},
	/// A session was attached to a target; the target is ready for use.
	Attached {
		/// Session id assigned by the browser.
		session_id: String,
		/// Attached target id.
		target_id: String,
	},
	/// A session was detached.
	Detached {
		/// Session id that went away.
		session_id: String,
	},
}

impl Notification {
	/// Shorthand for [`Notification::Created`].
	pub fn created(info: TargetInfo) -> Self {
		Self::Created { info }
	}

	/// Shorthand for [`Notification::Changed`].
	pub fn changed(change: TargetChange) -> Self {
		Self::Changed { change }
	}

	/// Shorthand for [`Notification::Destroyed`].
	pub fn destroyed(target_id: impl Into<String>) -> Self {
		Self::Destroyed {
			target_id: target_id.into(),
		}
	}

	/// Shorthand for [`Notification::Attached`].
	pub fn attached(session_id: impl Into<String>, target_id: impl Into<String>) -> Self {
		Self::Attached {
			session_id: session_id.into(),
			target_id: target_id.into(),
		}
	}

	/// Shorthand for [`Notification::Detached`].
	pub fn detached(session_id: impl Into<String>) -> Self {
		Self::Detached {
			session_id: session_id.into(),
		}
	}

	/// Returns the target id this notification refers to, if it names one.
	pub fn target_id(&self) -> Option<&str> {
		match self {
			Self::Created { info } => Some(&info.target_id),
			Self::Changed { change } => Some(&change.target_id),
			Self::Destroyed { target_id } | Self::Attached { target_id, .. } => Some(target_id),
			Self::Detached { .. } => None,
		}
	}

	/// Converts a DevTools `Target.*` event into a notification.
	///
	/// Returns `Ok(None)` for methods outside the target lifecycle.
	///
	/// # Errors
	///
	/// Returns a serde error if a recognized event carries malformed params.
	pub fn from_cdp(method: &str, params: Value) -> serde_json::Result<Option<Self>> {
		let notification = match method {
			"Target.targetCreated" => {
				let event: TargetInfoEvent = serde_json::from_value(params)?;
				Self::created(event.target_info)
			}
			"Target.targetInfoChanged" => {
				let event: TargetInfoEvent = serde_json::from_value(params)?;
				Self::changed(event.target_info.into())
			}
			"Target.targetDestroyed" => {
				let event: TargetDestroyedEvent = serde_json::from_value(params)?;
				Self::destroyed(event.target_id)
			}
			"Target.attachedToTarget" => {
				let event: AttachedToTargetEvent = serde_json::from_value(params)?;
				Self::attached(event.session_id, event.target_info.target_id)
			}
			"Target.detachedFromTarget" => {
				let event: DetachedFromTargetEvent = serde_json::from_value(params)?;
				Self::detached(event.session_id)
			}
			_ => return Ok(None),
		};
		Ok(Some(notification))
	}
}

/// Params of `Target.targetCreated` and `Target.targetInfoChanged`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfoEvent {
	target_info: TargetInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetDestroyedEvent {
	target_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachedToTargetEvent {
	session_id: String,
	target_info: TargetInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetachedFromTargetEvent {
	session_id: String,
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::types::TargetType;

	#[test]
	fn test_cdp_target_created() {
		let params = json!({
			"targetInfo": {
				"targetId": "T1",
				"type": "page",
				"title": "",
				"url": "about:blank",
				"attached": false,
				"browserContextId": "C1"
			}
		});
		let notification = Notification::from_cdp("Target.targetCreated", params).unwrap().unwrap();
		match notification {
			Notification::Created { info } => {
				assert_eq!(info.target_id, "T1");
				assert_eq!(info.target_type, TargetType::Page);
			}
			other => panic!("Expected Created, got {other:?}"),
		}
	}

	#[test]
	fn test_cdp_attached_uses_embedded_target_id() {
		let params = json!({
			"sessionId": "S1",
			"targetInfo": {"targetId": "T1", "type": "page", "url": ""},
			"waitingForDebugger": false
		});
		let notification = Notification::from_cdp("Target.attachedToTarget", params).unwrap();
		assert_eq!(notification, Some(Notification::attached("S1", "T1")));
	}

	#[test]
	fn test_cdp_info_changed_becomes_full_change() {
		let params = json!({
			"targetInfo": {"targetId": "T1", "type": "page", "title": "Hi", "url": "https://a.test/"}
		});
		let notification = Notification::from_cdp("Target.targetInfoChanged", params).unwrap();
		assert_eq!(
			notification,
			Some(Notification::changed(TargetChange::new("T1").url("https://a.test/").title("Hi")))
		);
	}

	#[test]
	fn test_cdp_unrelated_method_is_ignored() {
		let notification = Notification::from_cdp("Page.loadEventFired", json!({"timestamp": 1.0})).unwrap();
		assert!(notification.is_none());
	}

	#[test]
	fn test_cdp_malformed_params_error() {
		let result = Notification::from_cdp("Target.targetDestroyed", json!({"id": 3}));
		assert!(result.is_err());
	}

	#[test]
	fn test_target_id_accessor() {
		assert_eq!(Notification::destroyed("X").target_id(), Some("X"));
		assert_eq!(Notification::detached("S").target_id(), None);
	}
}
