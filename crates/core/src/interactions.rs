//! Interaction synthesis.
//!
//! Consumes the raw event stream surfaced by the protocol bridge (clicks,
//! keydowns, navigation notifications) and produces semantic [`Interaction`]
//! records, applying temporal de-duplication and typing aggregation so a
//! user typing into a field becomes one evolving record, not one per
//! keystroke.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use scribe_protocol::{ElementDescriptor, KeyModifiers};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::debug;

use crate::config::SynthesizerConfig;

/// Semantic category of a recorded interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
	UserEvent,
	TabNavigation,
	FrameNavigation,
}

/// One synthesized record of a user action or navigation.
#[derive(Debug, Clone, Serialize)]
pub struct Interaction {
	pub id: u64,
	pub kind: InteractionKind,
	/// Wall-clock timestamp in milliseconds since the epoch.
	pub timestamp_ms: u64,
	pub page_id: String,
	pub element: ElementDescriptor,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub screenshot: Option<String>,
}

/// Outcome of feeding one raw event to the synthesizer.
#[derive(Debug, Clone)]
pub enum InteractionEvent {
	/// A new interaction was recorded.
	Created(Interaction),
	/// An existing interaction was mutated in place (typing aggregation).
	Updated(Interaction),
}

/// Ephemeral aggregation state while consecutive keystrokes extend one
/// interaction.
struct TypingBuffer {
	interaction_id: u64,
	selector: String,
	text: String,
	last_update: Instant,
}

/// Turns raw page events into semantic interactions.
pub struct Synthesizer {
	config: SynthesizerConfig,
	interactions: Vec<Interaction>,
	next_id: u64,
	typing: Option<TypingBuffer>,
	last_click: HashMap<String, Instant>,
	last_keydown: Option<(String, Instant)>,
	last_nav: HashMap<String, Instant>,
}

impl Synthesizer {
	pub fn new(config: SynthesizerConfig) -> Self {
		Self {
			config,
			interactions: Vec::new(),
			next_id: 0,
			typing: None,
			last_click: HashMap::new(),
			last_keydown: None,
			last_nav: HashMap::new(),
		}
	}

	/// Records an interaction directly, bypassing de-duplication. Used by
	/// collaborators that synthesize their own records (e.g. tab events).
	pub fn add_interaction(
		&mut self,
		kind: InteractionKind,
		element: ElementDescriptor,
		page_id: &str,
		data: Option<Value>,
	) -> InteractionEvent {
		self.push(kind, element, page_id, now_ms(), data)
	}

	/// Handles a click raw event. Clicks on the same page within the click
	/// window of the previous accepted click are dropped.
	pub fn handle_click(
		&mut self,
		page_id: &str,
		element: ElementDescriptor,
		timestamp_ms: u64,
		data: Option<Value>,
	) -> Option<InteractionEvent> {
		let now = Instant::now();
		if let Some(at) = self.last_click.get(page_id) {
			if now.duration_since(*at) < self.config.click_dedup {
				debug!(target = "scribe.synth", page_id, "duplicate click dropped");
				return None;
			}
		}
		self.last_click.insert(page_id.to_string(), now);
		Some(self.push(InteractionKind::UserEvent, element, page_id, timestamp_ms, data))
	}

	/// Handles a keydown raw event: de-duplication, modifier combos, typing
	/// aggregation, and unit-wise Backspace.
	pub fn handle_keydown(
		&mut self,
		page_id: &str,
		mut element: ElementDescriptor,
		key: &str,
		modifiers: KeyModifiers,
		timestamp_ms: u64,
	) -> Option<InteractionEvent> {
		let now = Instant::now();
		if let Some((last_key, at)) = &self.last_keydown {
			if last_key == key && now.duration_since(*at) < self.config.keydown_dedup {
				debug!(target = "scribe.synth", key, "duplicate keydown dropped");
				return None;
			}
		}
		self.last_keydown = Some((key.to_string(), now));

		// A held Ctrl/Alt/Meta never merges into a typing buffer: it clears
		// any active buffer and stands alone, labelled with the combo.
		if modifiers.is_combo() {
			self.typing = None;
			let label = combo_label(key, modifiers);
			element.text = Some(label.clone());
			let data = json!({ "keys": label });
			return Some(self.push(InteractionKind::UserEvent, element, page_id, timestamp_ms, Some(data)));
		}

		let selector = element.selector.clone().unwrap_or_default();

		if key == "Backspace" {
			// Backspace edits the active buffer in place and never starts a
			// new interaction.
			let buffer_matches = self
				.typing
				.as_ref()
				.is_some_and(|buffer| buffer.selector == selector && now.duration_since(buffer.last_update) <= self.config.typing_gap);
			if !buffer_matches {
				return None;
			}
			let buffer = self.typing.as_mut().expect("checked above");
			remove_last_unit(&mut buffer.text);
			buffer.last_update = now;
			let id = buffer.interaction_id;
			let text = buffer.text.clone();
			return self.update_text(id, &selector, text).map(InteractionEvent::Updated);
		}

		let unit = render_key(key);

		let extend = self
			.typing
			.as_ref()
			.filter(|buffer| buffer.selector == selector && now.duration_since(buffer.last_update) <= self.config.typing_gap)
			.map(|buffer| buffer.interaction_id);

		match extend {
			Some(id) => {
				let buffer = self.typing.as_mut().expect("checked above");
				buffer.text.push_str(&unit);
				buffer.last_update = now;
				let text = buffer.text.clone();
				self.update_text(id, &selector, text).map(InteractionEvent::Updated)
			}
			None => {
				element.text = Some(unit.clone());
				let data = json!({ "text": unit, "selector": selector });
				let interaction = self.record(InteractionKind::UserEvent, element, page_id, timestamp_ms, Some(data));
				self.typing = Some(TypingBuffer {
					interaction_id: interaction.id,
					selector,
					text: unit,
					last_update: now,
				});
				Some(InteractionEvent::Created(interaction))
			}
		}
	}

	/// Handles a frame navigation notification. Child-frame navigations are
	/// ignored; main-frame ones on the same page within the navigation
	/// window of the previous accepted one are dropped.
	pub fn handle_navigation(
		&mut self,
		page_id: &str,
		url: &str,
		parent_frame: Option<&str>,
		timestamp_ms: u64,
	) -> Option<InteractionEvent> {
		if parent_frame.is_some() {
			return None;
		}
		let now = Instant::now();
		if let Some(at) = self.last_nav.get(page_id) {
			if now.duration_since(*at) < self.config.nav_dedup {
				debug!(target = "scribe.synth", page_id, url, "duplicate navigation dropped");
				return None;
			}
		}
		self.last_nav.insert(page_id.to_string(), now);

		let element = ElementDescriptor {
			href: Some(url.to_string()),
			..ElementDescriptor::default()
		};
		let data = json!({ "url": url });
		Some(self.push(InteractionKind::FrameNavigation, element, page_id, timestamp_ms, Some(data)))
	}

	/// Removes one interaction by id. Clears the typing buffer when it was
	/// extending that interaction.
	pub fn remove_interaction(&mut self, id: u64) -> bool {
		if self.typing.as_ref().is_some_and(|buffer| buffer.interaction_id == id) {
			self.typing = None;
		}
		match self.interactions.binary_search_by_key(&id, |interaction| interaction.id) {
			Ok(index) => {
				self.interactions.remove(index);
				true
			}
			Err(_) => false,
		}
	}

	/// Drops all recorded interactions and aggregation state.
	pub fn clear_interactions(&mut self) {
		self.interactions.clear();
		self.typing = None;
		self.last_click.clear();
		self.last_keydown = None;
		self.last_nav.clear();
	}

	/// Seals the active typing buffer, e.g. when switching sessions. The
	/// owning interaction becomes immutable.
	pub fn clear_typing_buffer(&mut self) {
		self.typing = None;
	}

	/// Recorded interactions in arrival order.
	pub fn interactions(&self) -> &[Interaction] {
		&self.interactions
	}

	fn push(
		&mut self,
		kind: InteractionKind,
		element: ElementDescriptor,
		page_id: &str,
		timestamp_ms: u64,
		data: Option<Value>,
	) -> InteractionEvent {
		InteractionEvent::Created(self.record(kind, element, page_id, timestamp_ms, data))
	}

	fn record(
		&mut self,
		kind: InteractionKind,
		element: ElementDescriptor,
		page_id: &str,
		timestamp_ms: u64,
		data: Option<Value>,
	) -> Interaction {
		self.next_id += 1;
		let interaction = Interaction {
			id: self.next_id,
			kind,
			timestamp_ms,
			page_id: page_id.to_string(),
			element,
			data,
			screenshot: None,
		};
		self.interactions.push(interaction.clone());
		interaction
	}

	/// Rewrites the displayed text of the interaction owning the typing
	/// buffer, addressed by its explicit id.
	fn update_text(&mut self, id: u64, selector: &str, text: String) -> Option<Interaction> {
		let index = self.interactions.binary_search_by_key(&id, |interaction| interaction.id).ok()?;
		let interaction = &mut self.interactions[index];
		interaction.element.text = Some(text.clone());
		interaction.data = Some(json!({ "text": text, "selector": selector }));
		Some(interaction.clone())
	}
}

/// Printable keys render as themselves; everything else as a bracketed token.
fn render_key(key: &str) -> String {
	if key.chars().count() == 1 {
		key.to_string()
	} else {
		format!("[{key}]")
	}
}

/// Removes one trailing unit: a full bracketed token when the text ends with
/// one, otherwise a single character. A lone `]` typed as a literal is not a
/// token terminator.
fn remove_last_unit(text: &mut String) {
	if text.ends_with(']') {
		if let Some(start) = text.rfind('[') {
			let interior = &text[start + 1..text.len() - 1];
			if !interior.contains(']') {
				text.truncate(start);
				return;
			}
		}
	}
	text.pop();
}

fn combo_label(key: &str, modifiers: KeyModifiers) -> String {
	let mut parts = Vec::with_capacity(4);
	if modifiers.ctrl {
		parts.push("Ctrl".to_string());
	}
	if modifiers.alt {
		parts.push("Alt".to_string());
	}
	if modifiers.meta {
		parts.push("Meta".to_string());
	}
	if modifiers.shift {
		parts.push("Shift".to_string());
	}
	if key.chars().count() == 1 {
		parts.push(key.to_uppercase());
	} else {
		parts.push(key.to_string());
	}
	parts.join("+")
}

pub(crate) fn now_ms() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|elapsed| elapsed.as_millis() as u64)
		.unwrap_or(0)
}
