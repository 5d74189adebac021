//! Standalone client driver.

use std::{
    io,
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, error, trace};

use udpwire_core::{
    config::Config,
    error::Result,
    time::{Clock, SystemClock},
    transport::Socket,
};
use udpwire_peer::{AckCallback, Connection, ConnectionState, PacketResult};
use udpwire_protocol::packet::Packet;

use crate::{send_interval, socket::UdpTransport};

/// A reliable-UDP client: one [`Connection`] plus the background thread that
/// drives it.
///
/// The thread performs the busy-poll cycle — drain available datagrams into
/// [`Connection::receive_update`], tick [`Connection::send_update`] every
/// send window once connected, yield — and exits when the connection reaches
/// a terminal state. All methods here are safe to call concurrently with
/// that loop.
#[derive(Debug)]
pub struct Client {
    connection: Connection,
    thread: Option<JoinHandle<()>>,
}

impl Client {
    /// Starts a connection attempt to a remote endpoint with the default
    /// configuration.
    pub fn connect(app_id: u16, remote_endpoint: SocketAddr) -> Result<Self> {
        Self::connect_with_config(app_id, remote_endpoint, Config::default())
    }

    /// Starts a connection attempt to a remote host by name.
    pub fn connect_host(app_id: u16, hostname: &str, port: u16) -> Result<Self> {
        let remote_endpoint = (hostname, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "could not resolve hostname"))?;
        Self::connect(app_id, remote_endpoint)
    }

    /// Starts a connection attempt with a custom configuration, binding an
    /// ephemeral local UDP port.
    pub fn connect_with_config(
        app_id: u16,
        remote_endpoint: SocketAddr,
        config: Config,
    ) -> Result<Self> {
        let socket = UdpTransport::bind("0.0.0.0:0", &config)?;
        Self::connect_over(socket, app_id, remote_endpoint, config, Arc::new(SystemClock))
    }

    /// Starts a connection attempt over an injected socket and clock.
    /// This is the seam tests and alternative transports plug into.
    pub fn connect_over(
        socket: impl Socket + 'static,
        app_id: u16,
        remote_endpoint: SocketAddr,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let connection = Connection::new_outbound(app_id, remote_endpoint);

        let loop_connection = connection.clone();
        let thread = thread::Builder::new()
            .name(format!("udpwire-client-{}", remote_endpoint))
            .spawn(move || client_loop(socket, loop_connection, config, clock))?;

        Ok(Client { connection, thread: Some(thread) })
    }

    /// The connection this client drives.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Negotiated packets-per-second rate, zero until connected.
    pub fn send_rate(&self) -> u8 {
        self.connection.send_rate()
    }

    /// Average round trip over the trailing window of resolved packets.
    pub fn rtt(&self) -> Duration {
        self.connection.rtt()
    }

    /// Number of delivered payloads waiting to be received.
    pub fn available(&self) -> usize {
        self.connection.available()
    }

    /// Queues data for the next outbound packet; returns the sequence number
    /// it is expected to ride on.
    pub fn send(&self, buffer: Vec<u8>) -> u16 {
        self.connection.send(buffer)
    }

    /// Like [`send`](Self::send) with a delivery callback.
    pub fn send_with_callback(&self, buffer: Vec<u8>, callback: Option<AckCallback>) -> u16 {
        self.connection.send_with_callback(buffer, callback)
    }

    /// Dequeues one delivered payload in arrival order.
    pub fn receive(&self) -> Result<Vec<u8>> {
        self.connection.receive()
    }

    /// Delivery results gathered since the last clear, in wraparound order.
    pub fn get_packet_results(&self) -> Vec<PacketResult> {
        self.connection.get_packet_results()
    }

    /// Clears the delivery result list.
    pub fn clear_packet_results(&self) {
        self.connection.clear_packet_results()
    }

    /// Closes the connection gracefully and waits for the driver loop to
    /// finish.
    pub fn close(&mut self) {
        self.connection.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

/// Communication loop for client mode. Exits when the connection reaches a
/// terminal state, the handshake times out, or the socket faults.
fn client_loop(
    mut socket: impl Socket,
    connection: Connection,
    config: Config,
    clock: Arc<dyn Clock>,
) {
    let remote_endpoint = connection.remote_endpoint();

    // Open the handshake.
    let request = connection.connection_request_packet();
    if let Err(err) = socket.send_packet(&remote_endpoint, &request.serialize()) {
        error!(remote = %remote_endpoint, %err, "failed to send connection request");
        connection.abort_handshake();
        socket.close();
        return;
    }

    let handshake_deadline = clock.now() + config.handshake_timeout;
    let mut receive_buffer = vec![0u8; config.receive_buffer_max_size];
    let mut next_send: Option<Instant> = None;

    while connection.is_active() {
        let now = clock.now();

        if connection.state().is_connecting() && now >= handshake_deadline {
            connection.abort_handshake();
            break;
        }

        // Drain whatever the socket holds right now.
        loop {
            match socket.receive_packet(&mut receive_buffer) {
                Ok((payload, sender)) => {
                    if sender != remote_endpoint {
                        trace!(%sender, "discarding datagram from unexpected sender");
                        continue;
                    }
                    match Packet::deserialize(payload) {
                        Ok(packet) => connection.receive_update(&packet, clock.now()),
                        Err(err) => trace!(%sender, %err, "discarding undecodable datagram"),
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    error!(remote = %remote_endpoint, %err, "socket receive failed");
                    connection.force_close();
                    break;
                }
            }
        }

        // Tick the send window once the handshake has finished. The timer
        // arms on the first pass after the state leaves Connecting.
        let state = connection.state();
        if state == ConnectionState::Connected || state == ConnectionState::Disconnecting {
            let due = next_send.get_or_insert(now);
            if now >= *due {
                *due = now + send_interval(connection.send_rate());
                let packet = connection.send_update(now);
                if let Err(err) = socket.send_packet(&remote_endpoint, &packet.serialize()) {
                    error!(remote = %remote_endpoint, %err, "socket send failed");
                    connection.force_close();
                }
            }
        }

        thread::yield_now();
    }

    socket.close();
    debug!(remote = %remote_endpoint, state = ?connection.state(), "client loop exited");
}
