#![warn(missing_docs)]

//! udpwire-peer: per-remote-endpoint protocol state.
//!
//! A [`Connection`] owns everything the reliability layer knows about one
//! remote endpoint: handshake progress, outbound sequence numbering, the
//! trailing acknowledgment window, per-packet delivery results, and round-trip
//! measurement. Driver loops live in `udpwire-host`; this crate performs no
//! socket I/O.

/// Connection state machine and reliability bookkeeping.
pub mod connection;
/// Per-packet delivery outcomes surfaced to the caller.
pub mod delivery;
/// Connection lifecycle states.
pub mod state;

pub use connection::Connection;
pub use delivery::{AckCallback, PacketResult, PacketStatus};
pub use state::ConnectionState;
