//! One persistent connection with command/response correlation.
//!
//! Every outgoing command carries a locally unique, monotonically increasing
//! id. A pending map keyed by id stores the response channel; inbound frames
//! settle pending entries strictly by id, never by send order. Unsolicited
//! events and close notices are forwarded to the owning bridge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use scribe_protocol::{methods, CommandFrame, InboundFrame};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::error::{Result, ScribeError};
use crate::transport::{Transport, TransportEvent};

/// Identifies which connection an inbound notice came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConnKey {
	Control,
	Page(String),
}

/// Notice forwarded from a connection's io task to the bridge pump.
#[derive(Debug)]
pub(crate) enum ConnNotice {
	Event(scribe_protocol::EventFrame),
	Closed { clean: bool },
}

struct Shared {
	label: String,
	cmd_tx: mpsc::UnboundedSender<Value>,
	pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>,
	next_id: AtomicU64,
	command_timeout: std::time::Duration,
}

/// Handle to one open connection. Dropping it tears down the io and
/// keep-alive tasks.
pub(crate) struct Connection {
	shared: Arc<Shared>,
	io_task: JoinHandle<()>,
	keepalive_task: JoinHandle<()>,
}

impl Connection {
	/// Wraps `transport`, spawning the io loop and the keep-alive timer.
	/// Events and the final close notice are delivered on `notice_tx`
	/// tagged with `key`.
	pub(crate) fn open(
		label: impl Into<String>,
		transport: Box<dyn Transport>,
		config: &BridgeConfig,
		key: ConnKey,
		notice_tx: mpsc::UnboundedSender<(ConnKey, ConnNotice)>,
	) -> Self {
		let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
		let shared = Arc::new(Shared {
			label: label.into(),
			cmd_tx,
			pending: Mutex::new(HashMap::new()),
			next_id: AtomicU64::new(0),
			command_timeout: config.command_timeout,
		});

		let io_task = tokio::spawn(io_loop(Arc::clone(&shared), transport, cmd_rx, key, notice_tx));
		let keepalive_task = tokio::spawn(keepalive_loop(Arc::clone(&shared), config.keepalive_interval));

		Self { shared, io_task, keepalive_task }
	}

	/// Sends a command and awaits its correlated response.
	///
	/// Rejects with [`ScribeError::CommandTimeout`] when no response arrives
	/// within the configured ceiling; the pending entry is removed so a late
	/// response for that id is discarded harmlessly.
	pub(crate) async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
		self.shared.send(method, params).await
	}

	/// Closes the connection without emitting a close notice. All in-flight
	/// commands reject with [`ScribeError::ConnectionClosed`].
	pub(crate) fn close(&self) {
		self.io_task.abort();
		self.keepalive_task.abort();
		fail_pending(&self.shared);
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		self.close();
	}
}

impl Shared {
	async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
		let frame = CommandFrame {
			id,
			method: method.to_string(),
			params,
		};
		let frame = serde_json::to_value(&frame).map_err(|err| ScribeError::Transport(err.to_string()))?;

		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(id, tx);

		if self.cmd_tx.send(frame).is_err() {
			self.pending.lock().remove(&id);
			return Err(ScribeError::ConnectionNotOpen(self.label.clone()));
		}

		match timeout(self.command_timeout, rx).await {
			Ok(Ok(outcome)) => outcome,
			Ok(Err(_)) => Err(ScribeError::ConnectionClosed),
			Err(_) => {
				self.pending.lock().remove(&id);
				debug!(target = "scribe.connection", label = %self.label, method, id, "command timed out");
				Err(ScribeError::CommandTimeout {
					method: method.to_string(),
					timeout: self.command_timeout,
				})
			}
		}
	}
}

async fn io_loop(
	shared: Arc<Shared>,
	mut transport: Box<dyn Transport>,
	mut cmd_rx: mpsc::UnboundedReceiver<Value>,
	key: ConnKey,
	notice_tx: mpsc::UnboundedSender<(ConnKey, ConnNotice)>,
) {
	let clean = loop {
		tokio::select! {
			outgoing = cmd_rx.recv() => {
				let Some(frame) = outgoing else { break true };
				if let Err(err) = transport.send(frame).await {
					warn!(target = "scribe.connection", label = %shared.label, error = %err, "send failed");
					break false;
				}
			}
			inbound = transport.recv() => match inbound {
				TransportEvent::Frame(value) => dispatch(&shared, &key, &notice_tx, value),
				TransportEvent::Closed { clean } => break clean,
			}
		}
	};

	debug!(target = "scribe.connection", label = %shared.label, clean, "connection closed");
	fail_pending(&shared);
	let _ = notice_tx.send((key, ConnNotice::Closed { clean }));
}

/// Correlates a response by id or forwards an event. Malformed payloads are
/// logged and discarded; they never propagate.
fn dispatch(shared: &Shared, key: &ConnKey, notice_tx: &mpsc::UnboundedSender<(ConnKey, ConnNotice)>, value: Value) {
	match serde_json::from_value::<InboundFrame>(value) {
		Ok(InboundFrame::Response(response)) => {
			let Some(tx) = shared.pending.lock().remove(&response.id) else {
				debug!(target = "scribe.connection", label = %shared.label, id = response.id, "late or unknown response discarded");
				return;
			};
			let outcome = match response.error {
				Some(error) => Err(ScribeError::Protocol {
					code: error.code,
					message: error.message,
				}),
				None => Ok(response.result.unwrap_or(Value::Null)),
			};
			let _ = tx.send(outcome);
		}
		Ok(InboundFrame::Event(event)) => {
			let _ = notice_tx.send((key.clone(), ConnNotice::Event(event)));
		}
		Err(err) => {
			warn!(target = "scribe.connection", label = %shared.label, error = %err, "discarding malformed message");
		}
	}
}

fn fail_pending(shared: &Shared) {
	let drained: Vec<_> = {
		let mut pending = shared.pending.lock();
		pending.drain().collect()
	};
	for (_, tx) in drained {
		let _ = tx.send(Err(ScribeError::ConnectionClosed));
	}
}

/// Sends a no-op evaluation on a fixed period so the remote side does not
/// idle out the connection. Failures are not fatal.
async fn keepalive_loop(shared: Arc<Shared>, period: std::time::Duration) {
	let start = tokio::time::Instant::now() + period;
	let mut ticker = tokio::time::interval_at(start, period);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	loop {
		ticker.tick().await;
		let params = json!({ "expression": "void 0", "returnByValue": true });
		if let Err(err) = shared.send(methods::RUNTIME_EVALUATE, Some(params)).await {
			debug!(target = "scribe.connection", label = %shared.label, error = %err, "keep-alive failed");
			if matches!(err, ScribeError::ConnectionNotOpen(_)) {
				break;
			}
		}
	}
}
