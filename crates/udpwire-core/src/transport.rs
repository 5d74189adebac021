//! Transport abstraction for pluggable I/O.

use std::{io::Result, net::SocketAddr};

/// Low-level datagram socket abstraction.
///
/// This trait lets various transports (UDP, in-memory test pairs, emulators)
/// be plugged into the client and listener driver loops without coupling to a
/// concrete implementation. `receive_packet` is non-blocking: a
/// `WouldBlock` error means no datagram is currently available, which is how
/// the busy-poll loops express "drain what is there and move on".
pub trait Socket: Send {
    /// Sends a single datagram to the given address.
    fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> Result<usize>;

    /// Receives a single datagram without blocking.
    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> Result<(&'a [u8], SocketAddr)>;

    /// Returns the local address this socket is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Releases the socket. Called exactly once when the owning loop exits.
    fn close(&mut self);
}
