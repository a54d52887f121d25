//! End-to-end bridge behavior over an in-memory transport: correlation,
//! target discovery, reconciliation, navigation enrichment, and disconnect
//! notification, all under a paused clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scribe_core::interactions::InteractionKind;
use scribe_core::transport::memory::{self, MemoryRemote, MemoryTransport};
use scribe_core::{
	BridgeConfig, BridgeEvent, Connector, InteractionEvent, Result, ScribeError, SessionBridge, SynthesizerConfig, Transport,
};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

/// Connector handing out transports staged by the test.
#[derive(Default)]
struct TestConnector {
	staged: Mutex<HashMap<String, MemoryTransport>>,
}

impl TestConnector {
	fn stage_control(&self, session_id: &str) -> MemoryRemote {
		self.stage(format!("control/{session_id}"))
	}

	fn stage_page(&self, page_id: &str) -> MemoryRemote {
		self.stage(format!("page/{page_id}"))
	}

	fn stage(&self, key: String) -> MemoryRemote {
		let (transport, remote) = memory::pair();
		self.staged.lock().unwrap().insert(key, transport);
		remote
	}

	fn take(&self, key: &str) -> Result<Box<dyn Transport>> {
		self.staged
			.lock()
			.unwrap()
			.remove(key)
			.map(|transport| Box::new(transport) as Box<dyn Transport>)
			.ok_or_else(|| ScribeError::Transport(format!("no staged transport for {key}")))
	}
}

#[async_trait]
impl Connector for TestConnector {
	async fn connect_control(&self, session_id: &str) -> Result<Box<dyn Transport>> {
		self.take(&format!("control/{session_id}"))
	}

	async fn connect_page(&self, page_id: &str) -> Result<Box<dyn Transport>> {
		self.take(&format!("page/{page_id}"))
	}
}

fn bridge_with(connector: Arc<TestConnector>) -> (Arc<SessionBridge>, UnboundedReceiver<BridgeEvent>) {
	let (bridge, events) = SessionBridge::new(connector, BridgeConfig::default(), SynthesizerConfig::default());
	(Arc::new(bridge), events)
}

/// Next non-keep-alive command sent on a connection. Keep-alives are
/// answered in passing so their timers keep cycling.
async fn next_command(remote: &mut MemoryRemote) -> Value {
	loop {
		let frame = remote.sent().await.expect("command stream ended");
		if frame["params"]["expression"] == "void 0" {
			remote.push_frame(json!({ "id": frame["id"], "result": {} }));
			continue;
		}
		break frame;
	}
}

fn respond(remote: &MemoryRemote, command: &Value, result: Value) {
	remote.push_frame(json!({ "id": command["id"], "result": result }));
}

async fn open_control(bridge: &Arc<SessionBridge>, remote: &mut MemoryRemote) {
	let connect = {
		let bridge = Arc::clone(bridge);
		tokio::spawn(async move { bridge.connect_control("sess-1").await })
	};
	let discover = next_command(remote).await;
	assert_eq!(discover["method"], "Target.setDiscoverTargets");
	respond(remote, &discover, json!({}));
	connect.await.unwrap().unwrap();
}

async fn next_event(events: &mut UnboundedReceiver<BridgeEvent>) -> BridgeEvent {
	tokio::time::timeout(Duration::from_secs(120), events.recv())
		.await
		.expect("no bridge event arrived")
		.expect("event channel closed")
}

/// Lets the pump drain, then asserts nothing was surfaced.
async fn assert_no_event(events: &mut UnboundedReceiver<BridgeEvent>) {
	for _ in 0..8 {
		tokio::task::yield_now().await;
	}
	if let Ok(event) = events.try_recv() {
		panic!("unexpected bridge event: {event:?}");
	}
}

#[tokio::test(start_paused = true)]
async fn locally_created_targets_are_suppressed_external_tabs_surface() {
	let connector = Arc::new(TestConnector::default());
	let mut control = connector.stage_control("sess-1");
	let (bridge, mut events) = bridge_with(Arc::clone(&connector));
	open_control(&bridge, &mut control).await;

	// A target nobody created through this bridge: an external tab.
	control.push_frame(json!({
		"method": "Target.targetCreated",
		"params": { "targetInfo": { "targetId": "tab-ext", "url": "https://popup" } }
	}));
	match next_event(&mut events).await {
		BridgeEvent::NewTabDetected { target_id, url } => {
			assert_eq!(target_id, "tab-ext");
			assert_eq!(url, "https://popup");
		}
		other => panic!("expected new tab, got {other:?}"),
	}

	// A target created through the bridge pre-registers its id.
	let create = {
		let bridge = Arc::clone(&bridge);
		tokio::spawn(async move { bridge.create_target("https://x").await })
	};
	let command = next_command(&mut control).await;
	assert_eq!(command["method"], "Target.createTarget");
	assert_eq!(command["params"]["url"], "https://x");
	respond(&control, &command, json!({ "targetId": "tab-local" }));
	assert_eq!(create.await.unwrap().unwrap(), "tab-local");

	control.push_frame(json!({
		"method": "Target.targetCreated",
		"params": { "targetInfo": { "targetId": "tab-local", "url": "https://x" } }
	}));
	control.push_frame(json!({
		"method": "Target.targetCreated",
		"params": { "targetInfo": { "targetId": "tab-ext-2", "url": "https://other" } }
	}));

	// Only the external tab surfaces; the pump dispatches in order, so
	// seeing tab-ext-2 first proves tab-local was suppressed.
	match next_event(&mut events).await {
		BridgeEvent::NewTabDetected { target_id, .. } => assert_eq!(target_id, "tab-ext-2"),
		other => panic!("expected new tab, got {other:?}"),
	}
}

#[tokio::test(start_paused = true)]
async fn send_to_page_lazily_connects_and_correlates_by_id() {
	let connector = Arc::new(TestConnector::default());
	let mut page = connector.stage_page("p1");
	let (bridge, _events) = bridge_with(Arc::clone(&connector));

	let send = {
		let bridge = Arc::clone(&bridge);
		tokio::spawn(async move {
			bridge
				.send_to_page("p1", "Page.navigate", Some(json!({ "url": "https://x" })))
				.await
		})
	};

	let command = next_command(&mut page).await;
	assert_eq!(command["method"], "Page.navigate");
	let id = command["id"].as_u64().unwrap();

	// Interleave noise, then answer by id.
	page.push_frame(json!({ "method": "Vendor.noise", "params": {} }));
	page.push_frame(json!({ "id": id, "result": { "frameId": "f1" } }));

	let result = send.await.unwrap().unwrap();
	assert_eq!(result["frameId"], "f1");

	// The connection is reused: a second send dials nothing.
	let send = {
		let bridge = Arc::clone(&bridge);
		tokio::spawn(async move { bridge.send_to_page("p1", "Runtime.enable", None).await })
	};
	let command = next_command(&mut page).await;
	respond(&page, &command, json!({}));
	send.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn navigation_emits_interaction_then_enrichment() {
	let connector = Arc::new(TestConnector::default());
	let mut page = connector.stage_page("p1");
	let (bridge, mut events) = bridge_with(Arc::clone(&connector));
	bridge.connect_page("p1").await.unwrap();

	page.push_frame(json!({
		"method": "Page.frameNavigated",
		"params": { "frame": { "id": "f1", "url": "https://a" } }
	}));

	match next_event(&mut events).await {
		BridgeEvent::Interaction(InteractionEvent::Created(interaction)) => {
			assert_eq!(interaction.kind, InteractionKind::FrameNavigation);
			assert_eq!(interaction.element.href.as_deref(), Some("https://a"));
		}
		other => panic!("expected interaction, got {other:?}"),
	}
	match next_event(&mut events).await {
		BridgeEvent::FrameNavigated { page_id, url } => {
			assert_eq!(page_id, "p1");
			assert_eq!(url, "https://a");
		}
		other => panic!("expected navigation, got {other:?}"),
	}

	// After the render delay the bridge queries title, then favicon.
	let title_query = next_command(&mut page).await;
	assert_eq!(title_query["method"], "Runtime.evaluate");
	assert_eq!(title_query["params"]["expression"], "document.title");
	respond(&page, &title_query, json!({ "result": { "value": "Example Domain" } }));

	match next_event(&mut events).await {
		BridgeEvent::TitleUpdated { page_id, title } => {
			assert_eq!(page_id, "p1");
			assert_eq!(title, "Example Domain");
		}
		other => panic!("expected title, got {other:?}"),
	}

	let favicon_query = next_command(&mut page).await;
	respond(&page, &favicon_query, json!({ "result": { "value": "https://a/favicon.ico" } }));

	match next_event(&mut events).await {
		BridgeEvent::FaviconUpdated { page_id, href } => {
			assert_eq!(page_id, "p1");
			assert_eq!(href, "https://a/favicon.ico");
		}
		other => panic!("expected favicon, got {other:?}"),
	}
}

#[tokio::test(start_paused = true)]
async fn rapid_navigations_on_one_page_deduplicate() {
	let connector = Arc::new(TestConnector::default());
	let page = connector.stage_page("p1");
	let (bridge, mut events) = bridge_with(Arc::clone(&connector));
	bridge.connect_page("p1").await.unwrap();

	page.push_frame(json!({
		"method": "Page.frameNavigated",
		"params": { "frame": { "id": "f1", "url": "https://a" } }
	}));
	assert!(matches!(next_event(&mut events).await, BridgeEvent::Interaction(_)));
	assert!(matches!(next_event(&mut events).await, BridgeEvent::FrameNavigated { .. }));

	// 400 ms later: inside the window, dropped even though the URL differs.
	tokio::time::advance(Duration::from_millis(400)).await;
	page.push_frame(json!({
		"method": "Page.frameNavigated",
		"params": { "frame": { "id": "f1", "url": "https://b" } }
	}));
	assert_no_event(&mut events).await;

	// A child-frame navigation is ignored outright.
	page.push_frame(json!({
		"method": "Page.frameNavigated",
		"params": { "frame": { "id": "f2", "parentId": "f1", "url": "https://ad" } }
	}));
	assert_no_event(&mut events).await;

	tokio::time::advance(Duration::from_millis(1100)).await;
	page.push_frame(json!({
		"method": "Page.frameNavigated",
		"params": { "frame": { "id": "f1", "url": "https://c" } }
	}));
	assert!(matches!(next_event(&mut events).await, BridgeEvent::Interaction(_)));
	match next_event(&mut events).await {
		BridgeEvent::FrameNavigated { url, .. } => assert_eq!(url, "https://c"),
		other => panic!("expected navigation, got {other:?}"),
	}
}

#[tokio::test(start_paused = true)]
async fn recorded_page_events_become_interactions() {
	let connector = Arc::new(TestConnector::default());
	let page = connector.stage_page("p1");
	let (bridge, mut events) = bridge_with(Arc::clone(&connector));
	bridge.connect_page("p1").await.unwrap();

	page.push_frame(json!({
		"method": "Recorder.recordedEvent",
		"params": {
			"kind": "click",
			"element": { "tag": "button", "selector": "#submit", "text": "Submit" },
			"timestampMs": 100
		}
	}));
	match next_event(&mut events).await {
		BridgeEvent::Interaction(InteractionEvent::Created(interaction)) => {
			assert_eq!(interaction.kind, InteractionKind::UserEvent);
			assert_eq!(interaction.element.selector.as_deref(), Some("#submit"));
		}
		other => panic!("expected click interaction, got {other:?}"),
	}

	page.push_frame(json!({
		"method": "Recorder.recordedEvent",
		"params": { "kind": "keydown", "element": { "selector": "#q" }, "key": "h", "timestampMs": 200 }
	}));
	page.push_frame(json!({
		"method": "Recorder.recordedEvent",
		"params": { "kind": "keydown", "element": { "selector": "#q" }, "key": "i", "timestampMs": 260 }
	}));
	assert!(matches!(
		next_event(&mut events).await,
		BridgeEvent::Interaction(InteractionEvent::Created(_))
	));
	match next_event(&mut events).await {
		BridgeEvent::Interaction(InteractionEvent::Updated(interaction)) => {
			assert_eq!(interaction.element.text.as_deref(), Some("hi"));
		}
		other => panic!("expected typing update, got {other:?}"),
	}

	assert_eq!(bridge.interactions().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn connection_lost_fires_once_for_last_unclean_close() {
	let connector = Arc::new(TestConnector::default());
	let mut control = connector.stage_control("sess-1");
	let page_one = connector.stage_page("p1");
	let page_two = connector.stage_page("p2");
	let (bridge, mut events) = bridge_with(Arc::clone(&connector));
	open_control(&bridge, &mut control).await;
	bridge.connect_page("p1").await.unwrap();
	bridge.connect_page("p2").await.unwrap();

	// Not the last open page connection: no notification.
	page_one.close(false);
	assert_no_event(&mut events).await;

	page_two.close(false);
	assert!(matches!(next_event(&mut events).await, BridgeEvent::ConnectionLost));
	assert_no_event(&mut events).await;
}

#[tokio::test(start_paused = true)]
async fn clean_close_never_notifies() {
	let connector = Arc::new(TestConnector::default());
	let page = connector.stage_page("p1");
	let (bridge, mut events) = bridge_with(Arc::clone(&connector));
	bridge.connect_page("p1").await.unwrap();

	page.close(true);
	assert_no_event(&mut events).await;
}

#[tokio::test(start_paused = true)]
async fn ensure_page_connections_reconciles_the_target_set() {
	let connector = Arc::new(TestConnector::default());
	let mut control = connector.stage_control("sess-1");
	let mut page_one = connector.stage_page("p1");
	let _page_two = connector.stage_page("p2");
	let _page_three = connector.stage_page("p3");
	let (bridge, mut events) = bridge_with(Arc::clone(&connector));
	open_control(&bridge, &mut control).await;

	let ids = |list: &[&str]| list.iter().map(|id| id.to_string()).collect::<Vec<_>>();
	bridge.ensure_page_connections(&ids(&["p1", "p2"])).await.unwrap();

	// p1 falls out of the set: its connection closes and is forgotten.
	bridge.ensure_page_connections(&ids(&["p2", "p3"])).await.unwrap();
	assert_eq!(page_one.sent().await, None);

	// Re-entrant call with the same set is a no-op; nothing is re-dialed
	// even though no transports remain staged.
	bridge.ensure_page_connections(&ids(&["p2", "p3"])).await.unwrap();

	// p1 is no longer a known target, so its discovery surfaces again.
	control.push_frame(json!({
		"method": "Target.targetCreated",
		"params": { "targetInfo": { "targetId": "p1", "url": "https://back" } }
	}));
	match next_event(&mut events).await {
		BridgeEvent::NewTabDetected { target_id, .. } => assert_eq!(target_id, "p1"),
		other => panic!("expected new tab, got {other:?}"),
	}
}

#[tokio::test(start_paused = true)]
async fn commands_without_connections_reject_immediately() {
	let connector = Arc::new(TestConnector::default());
	let (bridge, _events) = bridge_with(Arc::clone(&connector));

	match bridge.send("Target.getTargets", None).await {
		Err(ScribeError::ConnectionNotOpen(which)) => assert_eq!(which, "control"),
		other => panic!("expected not-open, got {other:?}"),
	}

	// Lazy connect fails when the dial fails; the error reaches the caller.
	match bridge.send_to_page("p-missing", "Runtime.enable", None).await {
		Err(ScribeError::Transport(_)) => {}
		other => panic!("expected transport error, got {other:?}"),
	}
}

#[tokio::test(start_paused = true)]
async fn disconnect_clears_all_connections_and_state() {
	let connector = Arc::new(TestConnector::default());
	let mut control = connector.stage_control("sess-1");
	let mut page = connector.stage_page("p1");
	let (bridge, mut events) = bridge_with(Arc::clone(&connector));
	open_control(&bridge, &mut control).await;
	bridge.connect_page("p1").await.unwrap();

	bridge.disconnect();

	// Teardown is silent: no disconnect notification.
	assert_no_event(&mut events).await;
	assert_eq!(page.sent().await, None);
	assert!(matches!(
		bridge.send("Target.getTargets", None).await,
		Err(ScribeError::ConnectionNotOpen(_))
	));
}
