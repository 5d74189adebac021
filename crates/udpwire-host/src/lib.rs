#![warn(missing_docs)]

//! udpwire-host: driver loops over a datagram socket.
//!
//! Two entry points, both running one dedicated background thread in a
//! non-blocking busy-poll cycle (drain available datagrams, tick the send
//! window, yield):
//!
//! - [`Client`]: drives a single outbound [`udpwire_peer::Connection`]
//!   through handshake, data transfer, and teardown.
//! - [`Listener`]: binds one local endpoint and multiplexes datagrams to the
//!   connections it has accepted, with a pending-request queue consumed by
//!   [`Listener::accept_client`].

/// Standalone client driver.
pub mod client;
/// Multiplexing listener driver.
pub mod listener;
/// UDP implementation of the transport seam.
pub mod socket;

pub use client::Client;
pub use listener::Listener;
pub use socket::UdpTransport;

use std::time::Duration;

/// Length of one send window at the given packets-per-second rate.
pub(crate) fn send_interval(send_rate: u8) -> Duration {
    Duration::from_millis(1000 / u64::from(send_rate.max(1)))
}
