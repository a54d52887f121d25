//! Protocol bridge: one control connection plus per-tab page connections.
//!
//! The bridge sends commands, correlates responses by id, reconnects and
//! reconciles page connections, discovers tabs opened by the remote page
//! itself, and feeds raw page events into the interaction synthesizer. All
//! inbound traffic funnels through a single pump task; callers observe the
//! bridge through a typed event channel rather than ad-hoc callbacks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use scribe_protocol::{
	methods, EventFrame, FrameNavigatedParams, RecordedEvent, RecordedEventKind, TargetCreatedParams, TargetDestroyedParams, TargetInfo,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{BridgeConfig, SynthesizerConfig};
use crate::connection::{ConnKey, ConnNotice, Connection};
use crate::error::{Result, ScribeError};
use crate::interactions::{now_ms, Interaction, InteractionEvent, InteractionKind, Synthesizer};
use crate::transport::Connector;

/// Everything the bridge surfaces outward, in dispatch order.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
	/// An interaction was recorded or mutated in place.
	Interaction(InteractionEvent),
	/// A main-frame navigation was accepted.
	FrameNavigated { page_id: String, url: String },
	/// Title enrichment resolved for a navigated page.
	TitleUpdated { page_id: String, title: String },
	/// Favicon enrichment resolved for a navigated page.
	FaviconUpdated { page_id: String, href: String },
	/// A target not created through this bridge appeared (e.g. `_blank`).
	NewTabDetected { target_id: String, url: String },
	/// The last open page connection closed involuntarily. Emitted at most
	/// once per control session; the caller decides whether to reconnect.
	ConnectionLost,
}

enum PageSlot {
	/// A dial is in flight; the watch flips to `true` once it settles.
	Connecting(watch::Receiver<bool>),
	Open(Arc<Connection>),
}

struct BridgeState {
	control: Option<Arc<Connection>>,
	pages: HashMap<String, PageSlot>,
	known_targets: HashSet<String>,
	disconnect_notified: bool,
}

struct PumpCtx {
	config: BridgeConfig,
	state: Arc<Mutex<BridgeState>>,
	synth: Arc<Mutex<Synthesizer>>,
	events_tx: mpsc::UnboundedSender<BridgeEvent>,
}

/// Multiplexes the remote-debugging protocol for one browser session.
pub struct SessionBridge {
	connector: Arc<dyn Connector>,
	config: BridgeConfig,
	state: Arc<Mutex<BridgeState>>,
	synth: Arc<Mutex<Synthesizer>>,
	notice_tx: mpsc::UnboundedSender<(ConnKey, ConnNotice)>,
	events_tx: mpsc::UnboundedSender<BridgeEvent>,
	pump_task: JoinHandle<()>,
}

impl SessionBridge {
	/// Builds a bridge and the receiving end of its outward event channel.
	pub fn new(
		connector: Arc<dyn Connector>,
		config: BridgeConfig,
		synth_config: SynthesizerConfig,
	) -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let (notice_tx, notice_rx) = mpsc::unbounded_channel();
		let state = Arc::new(Mutex::new(BridgeState {
			control: None,
			pages: HashMap::new(),
			known_targets: HashSet::new(),
			disconnect_notified: false,
		}));
		let synth = Arc::new(Mutex::new(Synthesizer::new(synth_config)));
		let ctx = Arc::new(PumpCtx {
			config: config.clone(),
			state: Arc::clone(&state),
			synth: Arc::clone(&synth),
			events_tx: events_tx.clone(),
		});
		let pump_task = tokio::spawn(pump(ctx, notice_rx));
		(
			Self {
				connector,
				config,
				state,
				synth,
				notice_tx,
				events_tx,
				pump_task,
			},
			events_rx,
		)
	}

	/// Opens the browser-level control connection and subscribes to target
	/// discovery notifications.
	pub async fn connect_control(&self, session_id: &str) -> Result<()> {
		let transport = self.connector.connect_control(session_id).await?;
		let connection = Arc::new(Connection::open(
			"control",
			transport,
			&self.config,
			ConnKey::Control,
			self.notice_tx.clone(),
		));
		{
			let mut state = self.state.lock();
			state.control = Some(Arc::clone(&connection));
			state.disconnect_notified = false;
		}
		debug!(target = "scribe.bridge", session_id, "control connection open");
		connection
			.send(methods::TARGET_SET_DISCOVER, Some(json!({ "discover": true })))
			.await?;
		Ok(())
	}

	/// Opens a page connection, sharing an in-flight dial when one exists.
	/// A no-op when the page is already open.
	pub async fn connect_page(&self, page_id: &str) -> Result<()> {
		enum Plan {
			AlreadyOpen,
			Wait(watch::Receiver<bool>),
			Dial(watch::Sender<bool>),
		}

		let plan = {
			let mut state = self.state.lock();
			match state.pages.get(page_id) {
				Some(PageSlot::Open(_)) => Plan::AlreadyOpen,
				Some(PageSlot::Connecting(rx)) => Plan::Wait(rx.clone()),
				None => {
					let (tx, rx) = watch::channel(false);
					state.pages.insert(page_id.to_string(), PageSlot::Connecting(rx));
					state.known_targets.insert(page_id.to_string());
					Plan::Dial(tx)
				}
			}
		};

		match plan {
			Plan::AlreadyOpen => Ok(()),
			Plan::Wait(mut rx) => {
				while !*rx.borrow() {
					if rx.changed().await.is_err() {
						// The dialing call was cancelled mid-flight; forget
						// the stale slot so a later call can redial.
						let mut state = self.state.lock();
						if matches!(state.pages.get(page_id), Some(PageSlot::Connecting(_))) {
							state.pages.remove(page_id);
						}
						break;
					}
				}
				match self.state.lock().pages.get(page_id) {
					Some(PageSlot::Open(_)) => Ok(()),
					_ => Err(ScribeError::ConnectionNotOpen(format!("page {page_id}"))),
				}
			}
			Plan::Dial(tx) => {
				let dialed = self.connector.connect_page(page_id).await;
				let outcome = {
					let mut state = self.state.lock();
					let still_wanted = matches!(state.pages.get(page_id), Some(PageSlot::Connecting(_)));
					match dialed {
						Ok(transport) if still_wanted => {
							let connection = Arc::new(Connection::open(
								format!("page {page_id}"),
								transport,
								&self.config,
								ConnKey::Page(page_id.to_string()),
								self.notice_tx.clone(),
							));
							state.pages.insert(page_id.to_string(), PageSlot::Open(connection));
							debug!(target = "scribe.bridge", page_id, "page connection open");
							Ok(())
						}
						// Reconciled away while dialing; the transport drops.
						Ok(_) => Err(ScribeError::ConnectionNotOpen(format!("page {page_id}"))),
						Err(err) => {
							state.pages.remove(page_id);
							Err(err)
						}
					}
				};
				let _ = tx.send(true);
				outcome
			}
		}
	}

	/// Reconciles the connection set against `page_ids`: closes and forgets
	/// connections for ids no longer present (clearing their keep-alives),
	/// then opens any missing ones. Idempotent and re-entrant.
	pub async fn ensure_page_connections(&self, page_ids: &[String]) -> Result<()> {
		let wanted: HashSet<&str> = page_ids.iter().map(String::as_str).collect();
		let dropped = {
			let mut state = self.state.lock();
			let stale: Vec<String> = state
				.pages
				.keys()
				.filter(|id| !wanted.contains(id.as_str()))
				.cloned()
				.collect();
			let mut dropped = Vec::with_capacity(stale.len());
			for id in &stale {
				debug!(target = "scribe.bridge", page_id = %id, "closing connection for dropped target");
				if let Some(slot) = state.pages.remove(id) {
					dropped.push(slot);
				}
			}
			state.known_targets.retain(|id| wanted.contains(id.as_str()));
			for id in page_ids {
				state.known_targets.insert(id.clone());
			}
			dropped
		};
		drop(dropped);

		let mut first_failure = None;
		for id in page_ids {
			if let Err(err) = self.connect_page(id).await {
				warn!(target = "scribe.bridge", page_id = %id, error = %err, "page connection failed");
				first_failure.get_or_insert(err);
			}
		}
		match first_failure {
			Some(err) => Err(err),
			None => Ok(()),
		}
	}

	/// Sends a command on the control connection.
	pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
		self.control()?.send(method, params).await
	}

	/// Sends a command on a page connection, lazily connecting it first.
	pub async fn send_to_page(&self, page_id: &str, method: &str, params: Option<Value>) -> Result<Value> {
		let connection = match self.open_page(page_id) {
			Some(connection) => connection,
			None => {
				self.connect_page(page_id).await?;
				self.open_page(page_id)
					.ok_or_else(|| ScribeError::ConnectionNotOpen(format!("page {page_id}")))?
			}
		};
		connection.send(method, params).await
	}

	/// Creates a new target and pre-registers its id so the asynchronous
	/// discovery notification for it is suppressed.
	pub async fn create_target(&self, url: &str) -> Result<String> {
		let result = self.send(methods::TARGET_CREATE, Some(json!({ "url": url }))).await?;
		let target_id = result["targetId"]
			.as_str()
			.ok_or_else(|| ScribeError::UnexpectedResponse {
				method: methods::TARGET_CREATE.to_string(),
				detail: "missing targetId".to_string(),
			})?
			.to_string();
		self.state.lock().known_targets.insert(target_id.clone());
		Ok(target_id)
	}

	/// Closes a target and forgets its page connection.
	pub async fn close_target(&self, target_id: &str) -> Result<()> {
		self.send(methods::TARGET_CLOSE, Some(json!({ "targetId": target_id }))).await?;
		let mut state = self.state.lock();
		state.known_targets.remove(target_id);
		state.pages.remove(target_id);
		Ok(())
	}

	/// Brings a target to the foreground.
	pub async fn activate_target(&self, target_id: &str) -> Result<()> {
		self.send(methods::TARGET_ACTIVATE, Some(json!({ "targetId": target_id }))).await?;
		Ok(())
	}

	/// Lists the targets the remote browser currently reports.
	pub async fn list_targets(&self) -> Result<Vec<TargetInfo>> {
		let result = self.send(methods::TARGET_GET_TARGETS, None).await?;
		serde_json::from_value(result["targetInfos"].clone()).map_err(|err| ScribeError::UnexpectedResponse {
			method: methods::TARGET_GET_TARGETS.to_string(),
			detail: err.to_string(),
		})
	}

	/// Pre-registers a target id learned out of band so its discovery
	/// notification is suppressed.
	pub fn register_known_target(&self, target_id: &str) {
		self.state.lock().known_targets.insert(target_id.to_string());
	}

	/// Closes all connections and clears all timers and state.
	pub fn disconnect(&self) {
		let mut state = self.state.lock();
		state.control = None;
		state.pages.clear();
		state.known_targets.clear();
		state.disconnect_notified = false;
		drop(state);
		self.synth.lock().clear_typing_buffer();
		debug!(target = "scribe.bridge", "disconnected");
	}

	/// Records an interaction directly and surfaces it on the event channel.
	pub fn add_interaction(
		&self,
		kind: InteractionKind,
		element: scribe_protocol::ElementDescriptor,
		page_id: &str,
		data: Option<Value>,
	) -> Interaction {
		let event = self.synth.lock().add_interaction(kind, element, page_id, data);
		let interaction = match &event {
			InteractionEvent::Created(interaction) | InteractionEvent::Updated(interaction) => interaction.clone(),
		};
		let _ = self.events_tx.send(BridgeEvent::Interaction(event));
		interaction
	}

	/// Removes a recorded interaction by id.
	pub fn remove_interaction(&self, id: u64) -> bool {
		self.synth.lock().remove_interaction(id)
	}

	/// Drops all recorded interactions and aggregation state.
	pub fn clear_interactions(&self) {
		self.synth.lock().clear_interactions();
	}

	/// Seals the active typing buffer, e.g. when switching sessions.
	pub fn clear_typing_buffer(&self) {
		self.synth.lock().clear_typing_buffer();
	}

	/// Snapshot of the recorded interactions.
	pub fn interactions(&self) -> Vec<Interaction> {
		self.synth.lock().interactions().to_vec()
	}

	fn control(&self) -> Result<Arc<Connection>> {
		self.state
			.lock()
			.control
			.clone()
			.ok_or_else(|| ScribeError::ConnectionNotOpen("control".to_string()))
	}

	fn open_page(&self, page_id: &str) -> Option<Arc<Connection>> {
		match self.state.lock().pages.get(page_id) {
			Some(PageSlot::Open(connection)) => Some(Arc::clone(connection)),
			_ => None,
		}
	}
}

impl Drop for SessionBridge {
	fn drop(&mut self) {
		self.pump_task.abort();
	}
}

/// Single dispatch loop for all inbound events and close notices.
async fn pump(ctx: Arc<PumpCtx>, mut notice_rx: mpsc::UnboundedReceiver<(ConnKey, ConnNotice)>) {
	while let Some((key, notice)) = notice_rx.recv().await {
		match notice {
			ConnNotice::Closed { clean } => handle_closed(&ctx, &key, clean),
			ConnNotice::Event(event) => handle_event(&ctx, &key, event),
		}
	}
}

fn handle_closed(ctx: &Arc<PumpCtx>, key: &ConnKey, clean: bool) {
	let mut state = ctx.state.lock();
	match key {
		ConnKey::Control => {
			state.control = None;
		}
		ConnKey::Page(page_id) => {
			state.pages.remove(page_id);
			let any_open = state.pages.values().any(|slot| matches!(slot, PageSlot::Open(_)));
			if !clean && !any_open && !state.disconnect_notified {
				state.disconnect_notified = true;
				warn!(target = "scribe.bridge", page_id, "last page connection lost");
				let _ = ctx.events_tx.send(BridgeEvent::ConnectionLost);
			}
		}
	}
}

fn handle_event(ctx: &Arc<PumpCtx>, key: &ConnKey, event: EventFrame) {
	match (key, event.method.as_str()) {
		(ConnKey::Control, methods::TARGET_CREATED) => {
			let Ok(params) = serde_json::from_value::<TargetCreatedParams>(event.params) else {
				warn!(target = "scribe.bridge", "malformed target-created notification discarded");
				return;
			};
			let info = params.target_info;
			let newly_known = ctx.state.lock().known_targets.insert(info.target_id.clone());
			if !newly_known {
				// A target this bridge created itself; the notification is
				// expected and not an externally opened tab.
				debug!(target = "scribe.bridge", target_id = %info.target_id, "discovery for known target suppressed");
				return;
			}
			debug!(target = "scribe.bridge", target_id = %info.target_id, url = %info.url, "external tab detected");
			let _ = ctx.events_tx.send(BridgeEvent::NewTabDetected {
				target_id: info.target_id,
				url: info.url,
			});
		}
		(ConnKey::Control, methods::TARGET_DESTROYED) => {
			let Ok(params) = serde_json::from_value::<TargetDestroyedParams>(event.params) else {
				warn!(target = "scribe.bridge", "malformed target-destroyed notification discarded");
				return;
			};
			let mut state = ctx.state.lock();
			state.known_targets.remove(&params.target_id);
			state.pages.remove(&params.target_id);
		}
		(ConnKey::Page(page_id), methods::FRAME_NAVIGATED) => {
			let Ok(params) = serde_json::from_value::<FrameNavigatedParams>(event.params) else {
				warn!(target = "scribe.bridge", page_id, "malformed navigation notification discarded");
				return;
			};
			let frame = params.frame;
			let accepted = ctx
				.synth
				.lock()
				.handle_navigation(page_id, &frame.url, frame.parent_id.as_deref(), now_ms());
			let Some(interaction_event) = accepted else { return };
			let _ = ctx.events_tx.send(BridgeEvent::Interaction(interaction_event));
			let _ = ctx.events_tx.send(BridgeEvent::FrameNavigated {
				page_id: page_id.clone(),
				url: frame.url,
			});
			spawn_enrichment(ctx, page_id.clone());
		}
		(ConnKey::Page(page_id), methods::RECORDED_EVENT) => {
			let raw = event.params.clone();
			let Ok(recorded) = serde_json::from_value::<RecordedEvent>(event.params) else {
				warn!(target = "scribe.bridge", page_id, "malformed recorded event discarded");
				return;
			};
			let outcome = match recorded.kind {
				RecordedEventKind::Click => {
					ctx.synth
						.lock()
						.handle_click(page_id, recorded.element, recorded.timestamp_ms, Some(raw))
				}
				RecordedEventKind::Keydown => {
					let Some(key) = recorded.key.as_deref() else {
						warn!(target = "scribe.bridge", page_id, "keydown without a key discarded");
						return;
					};
					ctx.synth.lock().handle_keydown(
						page_id,
						recorded.element,
						key,
						recorded.modifiers,
						recorded.timestamp_ms,
					)
				}
			};
			if let Some(interaction_event) = outcome {
				let _ = ctx.events_tx.send(BridgeEvent::Interaction(interaction_event));
			}
		}
		(_, method) => {
			debug!(target = "scribe.bridge", method, "pass-through event ignored");
		}
	}
}

/// After a short render delay, queries the navigated page for its title and
/// favicon. Each query is bounded so response listeners never accumulate.
fn spawn_enrichment(ctx: &Arc<PumpCtx>, page_id: String) {
	let ctx = Arc::clone(ctx);
	tokio::spawn(async move {
		tokio::time::sleep(ctx.config.enrich_delay).await;
		let connection = {
			match ctx.state.lock().pages.get(&page_id) {
				Some(PageSlot::Open(connection)) => Some(Arc::clone(connection)),
				_ => None,
			}
		};
		let Some(connection) = connection else { return };

		if let Some(title) = evaluate_string(&ctx, &connection, "document.title").await {
			let _ = ctx.events_tx.send(BridgeEvent::TitleUpdated {
				page_id: page_id.clone(),
				title,
			});
		}

		let favicon_expr = r#"(document.querySelector("link[rel~='icon']") || {}).href || """#;
		if let Some(href) = evaluate_string(&ctx, &connection, favicon_expr).await {
			if !href.is_empty() {
				let _ = ctx.events_tx.send(BridgeEvent::FaviconUpdated { page_id, href });
			}
		}
	});
}

async fn evaluate_string(ctx: &PumpCtx, connection: &Connection, expression: &str) -> Option<String> {
	let params = json!({ "expression": expression, "returnByValue": true });
	match tokio::time::timeout(ctx.config.enrich_timeout, connection.send(methods::RUNTIME_EVALUATE, Some(params))).await {
		Ok(Ok(result)) => result["result"]["value"].as_str().map(str::to_string),
		Ok(Err(err)) => {
			debug!(target = "scribe.bridge", error = %err, "enrichment query failed");
			None
		}
		Err(_) => {
			debug!(target = "scribe.bridge", expression, "enrichment query timed out");
			None
		}
	}
}
