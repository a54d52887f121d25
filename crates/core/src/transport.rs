//! Transport seam between connections and the wire.
//!
//! The bridge talks to a [`Transport`] trait object so correlation and
//! de-duplication logic stays unit-testable without real sockets; tests use
//! [`memory::pair`] to inject synthetic message sequences. Production
//! traffic runs over WebSockets via [`WsConnector`].

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{Result, ScribeError};

/// One item observed on a transport.
#[derive(Debug)]
pub enum TransportEvent {
	/// A parsed JSON frame.
	Frame(Value),
	/// The transport closed. `clean` is `true` only for a voluntary close.
	Closed { clean: bool },
}

/// A persistent, ordered, message-oriented connection.
#[async_trait]
pub trait Transport: Send {
	/// Transmits one JSON frame. Frames are sent in call order.
	async fn send(&mut self, frame: Value) -> Result<()>;

	/// Waits for the next inbound item. After `Closed` is returned the
	/// transport yields only `Closed { clean: false }`.
	async fn recv(&mut self) -> TransportEvent;
}

/// Dials transports for a session's control and page endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
	/// Opens the browser-level control connection for `session_id`.
	async fn connect_control(&self, session_id: &str) -> Result<Box<dyn Transport>>;

	/// Opens a page connection for one tab/target.
	async fn connect_page(&self, page_id: &str) -> Result<Box<dyn Transport>>;
}

/// WebSocket transport over tokio-tungstenite.
pub struct WsTransport {
	stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
	closed: bool,
}

impl WsTransport {
	/// Dials `url` and completes the WebSocket handshake.
	pub async fn connect(url: &str) -> Result<Self> {
		let (stream, _) = connect_async(url)
			.await
			.map_err(|err| ScribeError::Transport(format!("handshake with {url} failed: {err}")))?;
		debug!(target = "scribe.transport", %url, "websocket open");
		Ok(Self { stream, closed: false })
	}
}

#[async_trait]
impl Transport for WsTransport {
	async fn send(&mut self, frame: Value) -> Result<()> {
		self.stream
			.send(Message::Text(frame.to_string()))
			.await
			.map_err(|err| ScribeError::Transport(err.to_string()))
	}

	async fn recv(&mut self) -> TransportEvent {
		if self.closed {
			return TransportEvent::Closed { clean: false };
		}
		loop {
			match self.stream.next().await {
				Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
					Ok(value) => return TransportEvent::Frame(value),
					Err(err) => {
						warn!(target = "scribe.transport", error = %err, "discarding malformed frame");
					}
				},
				Some(Ok(Message::Close(frame))) => {
					self.closed = true;
					let clean = frame.is_some_and(|f| f.code == CloseCode::Normal);
					return TransportEvent::Closed { clean };
				}
				// Control frames; tungstenite answers pings internally.
				Some(Ok(_)) => {}
				Some(Err(err)) => {
					warn!(target = "scribe.transport", error = %err, "websocket read failed");
					self.closed = true;
					return TransportEvent::Closed { clean: false };
				}
				None => {
					self.closed = true;
					return TransportEvent::Closed { clean: false };
				}
			}
		}
	}
}

/// Connector building WebSocket transports from a vendor base URL.
///
/// Endpoints follow the vendor's remote-debugging layout:
/// `{base}/devtools/browser/{session_id}` and `{base}/devtools/page/{page_id}`.
pub struct WsConnector {
	base_url: String,
}

impl WsConnector {
	/// `base_url` is e.g. `wss://browsers.example.com` (no trailing slash).
	pub fn new(base_url: impl Into<String>) -> Self {
		Self { base_url: base_url.into() }
	}
}

#[async_trait]
impl Connector for WsConnector {
	async fn connect_control(&self, session_id: &str) -> Result<Box<dyn Transport>> {
		let url = format!("{}/devtools/browser/{session_id}", self.base_url);
		Ok(Box::new(WsTransport::connect(&url).await?))
	}

	async fn connect_page(&self, page_id: &str) -> Result<Box<dyn Transport>> {
		let url = format!("{}/devtools/page/{page_id}", self.base_url);
		Ok(Box::new(WsTransport::connect(&url).await?))
	}
}

pub mod memory {
	//! In-process transport for tests and local harnesses.

	use serde_json::Value;
	use tokio::sync::mpsc;

	use super::{Transport, TransportEvent};
	use crate::error::{Result, ScribeError};

	/// Test-side handle: feeds frames to the transport and observes what the
	/// connection under test sent.
	pub struct MemoryRemote {
		inbound_tx: mpsc::UnboundedSender<TransportEvent>,
		sent_rx: mpsc::UnboundedReceiver<Value>,
	}

	impl MemoryRemote {
		/// Delivers a frame as if it arrived off the wire.
		pub fn push_frame(&self, frame: Value) {
			let _ = self.inbound_tx.send(TransportEvent::Frame(frame));
		}

		/// Closes the transport with the given cleanliness.
		pub fn close(&self, clean: bool) {
			let _ = self.inbound_tx.send(TransportEvent::Closed { clean });
		}

		/// Waits for the next frame the connection sent.
		pub async fn sent(&mut self) -> Option<Value> {
			self.sent_rx.recv().await
		}

		/// Returns the next already-transmitted frame without waiting.
		pub fn try_sent(&mut self) -> Option<Value> {
			self.sent_rx.try_recv().ok()
		}
	}

	/// Channel-backed [`Transport`].
	pub struct MemoryTransport {
		inbound_rx: mpsc::UnboundedReceiver<TransportEvent>,
		sent_tx: mpsc::UnboundedSender<Value>,
	}

	/// Builds a connected transport/remote pair.
	pub fn pair() -> (MemoryTransport, MemoryRemote) {
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let (sent_tx, sent_rx) = mpsc::unbounded_channel();
		(
			MemoryTransport { inbound_rx, sent_tx },
			MemoryRemote { inbound_tx, sent_rx },
		)
	}

	#[async_trait::async_trait]
	impl Transport for MemoryTransport {
		async fn send(&mut self, frame: Value) -> Result<()> {
			self.sent_tx
				.send(frame)
				.map_err(|_| ScribeError::Transport("memory transport peer dropped".to_string()))
		}

		async fn recv(&mut self) -> TransportEvent {
			match self.inbound_rx.recv().await {
				Some(event) => event,
				None => TransportEvent::Closed { clean: false },
			}
		}
	}
}
