//! The fixed set of wire methods the session layer interprets directly.
//!
//! Everything else passes through as opaque `method`/`params` values.

/// Emitted on the control connection when the browser discovers a target.
pub const TARGET_CREATED: &str = "Target.targetCreated";
/// Emitted on the control connection when a target goes away.
pub const TARGET_DESTROYED: &str = "Target.targetDestroyed";

pub const TARGET_CREATE: &str = "Target.createTarget";
pub const TARGET_CLOSE: &str = "Target.closeTarget";
pub const TARGET_ACTIVATE: &str = "Target.activateTarget";
pub const TARGET_GET_TARGETS: &str = "Target.getTargets";
pub const TARGET_SET_DISCOVER: &str = "Target.setDiscoverTargets";

/// Emitted on a page connection for every frame navigation. Main-frame
/// navigations carry no parent frame id.
pub const FRAME_NAVIGATED: &str = "Page.frameNavigated";

/// Custom binding that delivers synthesized in-page events (clicks,
/// keydowns) from the injected recorder script back to the bridge.
pub const RECORDED_EVENT: &str = "Recorder.recordedEvent";

/// No-op evaluation used as a keep-alive.
pub const RUNTIME_EVALUATE: &str = "Runtime.evaluate";
