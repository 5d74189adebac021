#![warn(missing_docs)]

//! Udpwire: a small public API facade for the workspace.
//!
//! This crate provides a clean, stable surface that re-exports the most
//! commonly used types for building reliable-UDP applications:
//!
//! - Driver loops (`Client`, `Listener`)
//! - Connection state and delivery results (`Connection`, `ConnectionState`,
//!   `PacketStatus`, `PacketResult`)
//! - Wire types (`Packet`, `PacketType`, `Bitfield`)
//! - Core configuration (`Config`)
//!
//! Example
//! ```no_run
//! use udpwire::{Client, Config, ConnectionState, Listener};
//!
//! let mut listener = Listener::bind(0xC0DE, "127.0.0.1:0").unwrap();
//! listener.start().unwrap();
//!
//! let client = Client::connect(0xC0DE, listener.local_addr()).unwrap();
//!
//! // Accept the handshake server-side.
//! while !listener.pending() {
//!     std::thread::yield_now();
//! }
//! let server_side = listener.accept_client().unwrap();
//!
//! // Once both sides report Connected, payloads flow with delivery
//! // tracking on every packet.
//! while client.state() != ConnectionState::Connected {
//!     std::thread::yield_now();
//! }
//! client.send(b"hello".to_vec());
//! while server_side.available() == 0 {
//!     std::thread::yield_now();
//! }
//! assert_eq!(server_side.receive().unwrap(), b"hello".to_vec());
//! ```

// Core config and errors
pub use udpwire_core::{
    config::Config,
    error::{ErrorKind, Result},
};
// Host: driver loops
pub use udpwire_host::{Client, Listener, UdpTransport};
// Peer: connection state machine and delivery results
pub use udpwire_peer::{AckCallback, Connection, ConnectionState, PacketResult, PacketStatus};
// Protocol: wire types
pub use udpwire_protocol::{Bitfield, Packet, PacketType};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        Client, Config, Connection, ConnectionState, ErrorKind, Listener, Packet, PacketResult,
        PacketStatus, PacketType,
    };
}
