//! Wire types for the remote-debugging protocol.
//!
//! This crate contains the serde-serializable types used for communication
//! with a remotely hosted browser over persistent JSON-message connections.
//! These types represent the "protocol layer" - the shapes of data as they
//! appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization
//! * Opaque where possible: `method` strings and `params` shapes pass through
//!   untouched except for the small interpreted set in [`methods`]
//! * Stable: Changes only when the wire protocol changes
//!
//! Correlation, timeouts, and event synthesis live in `scribe-core`.

pub mod event;
pub mod frame;
pub mod methods;

pub use event::*;
pub use frame::*;
