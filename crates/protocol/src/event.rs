//! Typed payloads for the interpreted event set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Target metadata as reported by the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
	pub target_id: String,
	#[serde(default)]
	pub url: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
	#[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
	pub kind: Option<String>,
}

/// Params of [`crate::methods::TARGET_CREATED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetCreatedParams {
	pub target_info: TargetInfo,
}

/// Params of [`crate::methods::TARGET_DESTROYED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDestroyedParams {
	pub target_id: String,
}

/// Frame metadata inside a navigation notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameInfo {
	pub id: String,
	/// Absent for the main frame.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub parent_id: Option<String>,
	#[serde(default)]
	pub url: String,
}

/// Params of [`crate::methods::FRAME_NAVIGATED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameNavigatedParams {
	pub frame: FrameInfo,
}

/// Element addressed by a recorded in-page event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tag: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub selector: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub href: Option<String>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub attributes: BTreeMap<String, Value>,
}

/// Modifier keys held during a keydown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyModifiers {
	#[serde(default)]
	pub ctrl: bool,
	#[serde(default)]
	pub alt: bool,
	#[serde(default)]
	pub meta: bool,
	#[serde(default)]
	pub shift: bool,
}

impl KeyModifiers {
	/// Returns `true` when a combining modifier (Ctrl/Alt/Meta) is held.
	/// Shift alone does not form a combo; it is already folded into `key`.
	pub fn is_combo(&self) -> bool {
		self.ctrl || self.alt || self.meta
	}
}

/// Kind discriminator of a recorded in-page event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordedEventKind {
	Click,
	Keydown,
}

/// Params of [`crate::methods::RECORDED_EVENT`]: one synthesized in-page
/// event delivered through the named custom binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedEvent {
	pub kind: RecordedEventKind,
	#[serde(default)]
	pub element: ElementDescriptor,
	/// Key value for keydown events, e.g. `"a"`, `"Enter"`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub key: Option<String>,
	#[serde(default)]
	pub modifiers: KeyModifiers,
	/// Event timestamp in milliseconds since the epoch, as observed in-page.
	#[serde(default)]
	pub timestamp_ms: u64,
}
