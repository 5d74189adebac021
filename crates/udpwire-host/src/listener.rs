//! Multiplexing listener driver.

use std::{
    collections::{HashMap, VecDeque},
    io,
    net::{SocketAddr, ToSocketAddrs},
    sync::{
        atomic::{AtomicBool, Ordering::SeqCst},
        Arc,
    },
    thread::{self, JoinHandle},
};

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use udpwire_core::{
    config::Config,
    constants::{ACK_BITFIELD_SIZE, PROTOCOL_VERSION},
    error::Result,
    time::{Clock, SystemClock},
    transport::Socket,
};
use udpwire_peer::{Connection, ConnectionState};
use udpwire_protocol::{
    bitfield::Bitfield,
    packet::{Packet, PacketType},
};

use crate::{send_interval, socket::UdpTransport};

/// A reliable-UDP listener: one socket, one background thread, many
/// connections.
///
/// The loop routes each inbound datagram to the connection registered for
/// its sender. Unrecognized senders may only open a handshake: a valid,
/// non-duplicate `ConnectionRequest` queues the endpoint for
/// [`accept_client`](Self::accept_client); anything else that looks like a
/// request is refused, and other packet types are dropped.
pub struct Listener {
    shared: Arc<Shared>,
    config: Config,
    clock: Arc<dyn Clock>,
    local_endpoint: SocketAddr,
    /// Bound socket, handed to the loop thread by `start`.
    socket: Option<Box<dyn Socket>>,
    thread: Option<JoinHandle<()>>,
}

struct Shared {
    app_id: u16,
    send_rate: u8,
    active: AtomicBool,
    /// One connection per accepted remote endpoint.
    connections: Mutex<HashMap<SocketAddr, Connection>>,
    /// Endpoints waiting to be accepted; an endpoint is queued at most once.
    pending_requests: Mutex<VecDeque<SocketAddr>>,
    /// Accept replies awaiting the next send window.
    accept_replies: Mutex<Vec<(SocketAddr, Packet)>>,
}

impl Listener {
    /// Binds a listener to the given address with the default configuration.
    pub fn bind<A: ToSocketAddrs>(app_id: u16, addresses: A) -> Result<Self> {
        Self::bind_with_config(app_id, addresses, Config::default())
    }

    /// Binds a listener with a custom configuration. The configured send
    /// rate is what accepted clients are told to tick at.
    pub fn bind_with_config<A: ToSocketAddrs>(
        app_id: u16,
        addresses: A,
        config: Config,
    ) -> Result<Self> {
        let socket = UdpTransport::bind(addresses, &config)?;
        Self::with_socket(app_id, Box::new(socket), config, Arc::new(SystemClock))
    }

    /// Creates a listener over an injected socket and clock. This is the
    /// seam tests and alternative transports plug into.
    pub fn with_socket(
        app_id: u16,
        socket: Box<dyn Socket>,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let local_endpoint = socket.local_addr()?;
        Ok(Listener {
            shared: Arc::new(Shared {
                app_id,
                send_rate: config.send_rate,
                active: AtomicBool::new(false),
                connections: Mutex::new(HashMap::new()),
                pending_requests: Mutex::new(VecDeque::new()),
                accept_replies: Mutex::new(Vec::new()),
            }),
            config,
            clock,
            local_endpoint,
            socket: Some(socket),
            thread: None,
        })
    }

    /// The local endpoint this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_endpoint
    }

    /// Whether the listener loop is running.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(SeqCst)
    }

    /// Application discriminator inbound packets are validated against.
    pub fn app_id(&self) -> u16 {
        self.shared.app_id
    }

    /// Packets-per-second rate handed to accepted clients.
    pub fn send_rate(&self) -> u8 {
        self.shared.send_rate
    }

    /// Starts the listener loop on its background thread.
    pub fn start(&mut self) -> Result<()> {
        let socket = self.socket.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AlreadyExists, "listener already started")
        })?;

        self.shared.active.store(true, SeqCst);

        let shared = self.shared.clone();
        let config = self.config.clone();
        let clock = self.clock.clone();
        let thread = thread::Builder::new()
            .name(format!("udpwire-listener-{}", self.local_endpoint))
            .spawn(move || listener_loop(socket, shared, config, clock))?;
        self.thread = Some(thread);

        debug!(local = %self.local_endpoint, "listener started");
        Ok(())
    }

    /// Returns true if at least one connection request is waiting.
    pub fn pending(&self) -> bool {
        !self.shared.pending_requests.lock().is_empty()
    }

    /// Accepts the oldest pending connection request, if any.
    ///
    /// The returned connection is already `Connected`; the accept reply
    /// (carrying the send rate and protocol version) is flushed on the next
    /// send window.
    pub fn accept_client(&self) -> Option<Connection> {
        let endpoint = self.shared.pending_requests.lock().pop_front()?;

        let accept_packet = Packet::new(
            self.shared.app_id,
            0,
            0,
            Bitfield::new(ACK_BITFIELD_SIZE),
            PacketType::ConnectionAccept,
            vec![self.shared.send_rate, PROTOCOL_VERSION],
        );

        // The client consumed sequence 0 on its request; the accepted side
        // starts its own stream at 1.
        let connection = Connection::new_accepted(self.shared.app_id, endpoint, self.shared.send_rate, 1);
        self.shared.connections.lock().insert(endpoint, connection.clone());
        self.shared.accept_replies.lock().push((endpoint, accept_packet));

        debug!(remote = %endpoint, "accepted connection");
        Some(connection)
    }

    /// Stops the listener: the loop sends a best-effort disconnection notify
    /// to every still-connected peer, releases the socket, and exits.
    pub fn stop(&mut self) {
        self.shared.active.store(false, SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.shared.pending_requests.lock().clear();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_endpoint", &self.local_endpoint)
            .field("app_id", &self.shared.app_id)
            .field("send_rate", &self.shared.send_rate)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Communication loop for the listener: drain and route datagrams, then on
/// each send window flush accept replies, tick every connection, and reap
/// the ones whose state left `Connected`.
fn listener_loop(
    mut socket: Box<dyn Socket>,
    shared: Arc<Shared>,
    config: Config,
    clock: Arc<dyn Clock>,
) {
    let interval = send_interval(shared.send_rate);
    let mut receive_buffer = vec![0u8; config.receive_buffer_max_size];
    let mut next_send = clock.now() + interval;

    while shared.active.load(SeqCst) {
        // Drain whatever the socket holds right now.
        loop {
            match socket.receive_packet(&mut receive_buffer) {
                Ok((payload, sender)) => {
                    let packet = match Packet::deserialize(payload) {
                        Ok(packet) => packet,
                        Err(err) => {
                            trace!(%sender, %err, "discarding undecodable datagram");
                            continue;
                        }
                    };

                    let known = shared.connections.lock().get(&sender).cloned();
                    match known {
                        Some(connection) => connection.receive_update(&packet, clock.now()),
                        None if packet.packet_type() == PacketType::ConnectionRequest => {
                            handle_connection_request(socket.as_mut(), &shared, sender, &packet);
                        }
                        None => {
                            trace!(
                                %sender,
                                packet_type = ?packet.packet_type(),
                                "ignoring packet from unknown endpoint"
                            );
                        }
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    error!(%err, "socket receive failed, stopping listener");
                    shared.active.store(false, SeqCst);
                    break;
                }
            }
        }

        let now = clock.now();
        if now >= next_send {
            next_send = now + interval;

            // Flush queued accept replies first so a new client can finish
            // its handshake before our first keepalive reaches it.
            for (endpoint, packet) in shared.accept_replies.lock().drain(..) {
                if let Err(err) = socket.send_packet(&endpoint, &packet.serialize()) {
                    error!(remote = %endpoint, %err, "failed to send accept reply");
                }
            }

            let connections: Vec<(SocketAddr, Connection)> =
                shared.connections.lock().iter().map(|(addr, conn)| (*addr, conn.clone())).collect();

            for (endpoint, connection) in &connections {
                let state = connection.state();
                if state == ConnectionState::Connected || state == ConnectionState::Disconnecting {
                    let packet = connection.send_update(now);
                    if let Err(err) = socket.send_packet(endpoint, &packet.serialize()) {
                        error!(remote = %endpoint, %err, "socket send failed");
                    }
                }
            }

            // Reap every connection whose state left Connected during this
            // pass, drop detection and graceful closes included.
            shared.connections.lock().retain(|endpoint, connection| {
                let state = connection.state();
                if state == ConnectionState::Connected {
                    true
                } else {
                    debug!(remote = %endpoint, ?state, "reaping connection");
                    false
                }
            });
        }

        thread::yield_now();
    }

    // Best-effort farewell to everyone still connected.
    let connections: Vec<(SocketAddr, Connection)> =
        shared.connections.lock().drain().collect();
    for (endpoint, connection) in connections {
        if connection.state() == ConnectionState::Connected {
            let packet = connection.disconnect_packet();
            if let Err(err) = socket.send_packet(&endpoint, &packet.serialize()) {
                debug!(remote = %endpoint, %err, "failed to send farewell notify");
            }
            connection.force_close();
        }
    }

    socket.close();
    debug!("listener loop exited");
}

/// Queues a valid first-contact request, refuses everything else.
fn handle_connection_request(
    socket: &mut dyn Socket,
    shared: &Shared,
    sender: SocketAddr,
    packet: &Packet,
) {
    let mut pending = shared.pending_requests.lock();
    if packet.validate(shared.app_id, u16::MAX) && !pending.contains(&sender) {
        debug!(remote = %sender, "queueing connection request");
        pending.push_back(sender);
    } else {
        trace!(remote = %sender, "refusing connection request");
        let refuse = Packet::control(
            shared.app_id,
            0,
            0,
            Bitfield::new(ACK_BITFIELD_SIZE),
            PacketType::ConnectionRefuse,
        );
        if let Err(err) = socket.send_packet(&sender, &refuse.serialize()) {
            error!(remote = %sender, %err, "failed to send refusal");
        }
    }
}
