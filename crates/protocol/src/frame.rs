//! Message frames exchanged over a debug connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing command frame.
///
/// ```json
/// { "id": 7, "method": "Page.navigate", "params": { "url": "https://x" } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandFrame {
	/// Locally unique, monotonically increasing correlation id.
	pub id: u64,
	pub method: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
}

/// Response frame correlated to a command by `id`.
///
/// Carries either `result` or `error`, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
	pub id: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<WireError>,
}

/// Error payload inside a response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
	pub code: i64,
	pub message: String,
}

/// Unsolicited event frame. Distinguished from responses by the absence of `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Inbound frame as received off the wire.
///
/// Frames carrying an `id` are responses; frames without one are events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InboundFrame {
	Response(ResponseFrame),
	Event(EventFrame),
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn command_frame_omits_absent_params() {
		let frame = CommandFrame {
			id: 3,
			method: "Runtime.evaluate".into(),
			params: None,
		};
		let value = serde_json::to_value(&frame).unwrap();
		assert_eq!(value, json!({ "id": 3, "method": "Runtime.evaluate" }));
	}

	#[test]
	fn inbound_with_id_is_a_response() {
		let frame: InboundFrame = serde_json::from_str(r#"{ "id": 7, "result": { "frameId": "f1" } }"#).unwrap();
		match frame {
			InboundFrame::Response(response) => {
				assert_eq!(response.id, 7);
				assert_eq!(response.result.unwrap()["frameId"], "f1");
				assert!(response.error.is_none());
			}
			InboundFrame::Event(_) => panic!("expected response"),
		}
	}

	#[test]
	fn inbound_without_id_is_an_event() {
		let frame: InboundFrame = serde_json::from_str(r#"{ "method": "Page.frameNavigated", "params": { "frame": { "id": "f1", "url": "https://x" } } }"#).unwrap();
		match frame {
			InboundFrame::Event(event) => {
				assert_eq!(event.method, "Page.frameNavigated");
				assert_eq!(event.params["frame"]["id"], "f1");
			}
			InboundFrame::Response(_) => panic!("expected event"),
		}
	}

	#[test]
	fn error_response_round_trips() {
		let frame: InboundFrame = serde_json::from_str(r#"{ "id": 2, "error": { "code": -32000, "message": "no such target" } }"#).unwrap();
		match frame {
			InboundFrame::Response(response) => {
				let error = response.error.unwrap();
				assert_eq!(error.code, -32000);
				assert_eq!(error.message, "no such target");
			}
			InboundFrame::Event(_) => panic!("expected response"),
		}
	}
}
