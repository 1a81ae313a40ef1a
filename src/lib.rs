//! Bridges a Velbus RS-485 field bus to one or more TCP endpoints.
//!
//! The [`bridge`] module is the routing hub; everything else is a
//! collaborator it owns: the wire [`packet`] codec, the [`serial`]
//! transport, the [`tcp`] listener pool, the [`ntp`] broadcaster, the
//! process-wide [`cache`] of in-flight frames, and the [`bus_status`]
//! state machine that gates the serial writer.

pub mod bridge;
pub mod bus_status;
pub mod cache;
pub mod error;
pub mod events;
pub mod ntp;
pub mod packet;
pub mod serial;
pub mod settings;
pub mod tcp;

#[cfg(test)]
mod tests;

pub use bridge::Bridge;
pub use error::BridgeError;
pub use packet::Frame;
pub use settings::Settings;
