//! UDP implementation of the transport seam.

use std::{
    io,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
};

use socket2::Socket as Socket2;

use udpwire_core::{config::Config, transport::Socket};

/// Applies socket options from configuration to a UdpSocket.
fn apply_socket_options(socket: &UdpSocket, config: &Config) -> io::Result<()> {
    let socket2 = Socket2::from(socket.try_clone()?);

    if let Some(size) = config.socket_recv_buffer_size {
        socket2.set_recv_buffer_size(size)?;
    }

    if let Some(size) = config.socket_send_buffer_size {
        socket2.set_send_buffer_size(size)?;
    }

    if let Some(ttl) = config.socket_ttl {
        socket.set_ttl(ttl)?;
    }

    Ok(())
}

/// Non-blocking UDP socket backing the driver loops.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds a UDP socket to the given address and applies the configured
    /// socket options. The socket is always non-blocking: the driver loops
    /// poll, they never park in a read.
    pub fn bind<A: ToSocketAddrs>(addresses: A, config: &Config) -> io::Result<Self> {
        let socket = UdpSocket::bind(addresses)?;
        apply_socket_options(&socket, config)?;
        socket.set_nonblocking(true)?;
        Ok(UdpTransport { socket })
    }
}

impl Socket for UdpTransport {
    fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, addr)
    }

    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
        self.socket.recv_from(buffer).map(move |(recv_len, address)| (&buffer[..recv_len], address))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn close(&mut self) {
        // The descriptor is released when the socket drops with the loop;
        // nothing to flush for UDP.
    }
}
