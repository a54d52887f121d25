//! Remote browser session layer.
//!
//! Three cooperating pieces drive a remotely hosted browser for workflow
//! recording:
//!
//! * [`admission`] - gates creation of new sessions under a sliding-window
//!   rate budget and a concurrency budget, issuing [`admission::Lease`]s.
//! * [`bridge`] - multiplexes the JSON remote-debugging protocol over one
//!   control connection and per-tab page connections, correlating responses
//!   by id and surfacing a typed event stream.
//! * [`interactions`] - synthesizes semantic interaction records from raw
//!   page events: typing aggregation, click/keydown de-duplication, and
//!   navigation de-duplication.
//!
//! Wire shapes live in the `scribe-protocol` crate; this crate owns the
//! behavior.

pub mod admission;
pub mod bridge;
pub mod config;
mod connection;
pub mod error;
pub mod interactions;
pub mod transport;

pub use admission::{AdmissionController, AdmissionStats, Lease};
pub use bridge::{BridgeEvent, SessionBridge};
pub use config::{AdmissionConfig, BridgeConfig, SynthesizerConfig};
pub use error::{Result, ScribeError};
pub use interactions::{Interaction, InteractionEvent, InteractionKind, Synthesizer};
pub use transport::{Connector, Transport, TransportEvent, WsConnector, WsTransport};
