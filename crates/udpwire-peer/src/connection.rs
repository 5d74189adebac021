//! Connection state machine and reliability bookkeeping.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering::SeqCst},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, trace};

use udpwire_core::{
    constants::{ACK_BITFIELD_SIZE, ACK_WINDOW, RTT_WINDOW},
    error::{ErrorKind, Result},
};
use udpwire_protocol::{
    bitfield::Bitfield,
    packet::{Packet, PacketType},
    sequence::sequence_greater_than,
};

use crate::{
    delivery::{AckCallback, PacketResult, PacketStatus},
    state::ConnectionState,
};

/// Protocol state for one remote endpoint.
///
/// A `Connection` is shared between its driver loop (which calls
/// [`send_update`](Self::send_update) and [`receive_update`](Self::receive_update))
/// and arbitrary API callers (`send`, `receive`, `get_packet_results`, ...).
/// Every shared collection sits behind its own mutex; no operation blocks
/// beyond collection access.
///
/// Lock order invariant: when two or more of these locks are held at once
/// they must be acquired in this order, top to bottom:
/// `send_queue`, `pending_acks`, `packet_results`, `pending_times`,
/// `rtt_samples`, `rtt`, `remote_acks`, `state`, `receive_queue`.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    app_id: u16,
    remote_endpoint: SocketAddr,
    /// Packets per second, negotiated during the handshake.
    send_rate: AtomicU8,
    /// Cooperative cancellation flag observed by the driver loop.
    active: AtomicBool,
    /// Sequence number the next outbound packet will take.
    next_seq_number: AtomicU16,
    /// Highest ack sequence number received from the peer.
    last_ack_seq_num: AtomicU16,
    /// Highest sequence number received from the peer.
    last_remote_seq_number: AtomicU16,
    state: Mutex<ConnectionState>,
    /// Application payloads not yet placed in a packet.
    send_queue: Mutex<VecDeque<Vec<u8>>>,
    /// Outbound sequence numbers awaiting resolution, with an optional
    /// callback to fire when they resolve.
    pending_acks: Mutex<HashMap<u16, Option<AckCallback>>>,
    /// Caller-visible delivery status per sequence number until cleared.
    packet_results: Mutex<HashMap<u16, PacketStatus>>,
    /// Send time of each pending packet, for round-trip measurement.
    pending_times: Mutex<HashMap<u16, Instant>>,
    /// Round trips of the trailing window of resolved packets.
    rtt_samples: Mutex<HashMap<u16, Duration>>,
    rtt: Mutex<Duration>,
    /// Peer sequence numbers seen within the trailing ack window.
    remote_acks: Mutex<HashSet<u16>>,
    /// Payloads delivered from data packets, in arrival order.
    receive_queue: Mutex<VecDeque<Vec<u8>>>,
}

impl Connection {
    /// Creates the client-side state for an outbound connection attempt.
    ///
    /// The connection starts `Connecting`; the driver loop sends the
    /// connection request and the state advances when the accept or refuse
    /// reply arrives.
    pub fn new_outbound(app_id: u16, remote_endpoint: SocketAddr) -> Self {
        Self::with_state(app_id, remote_endpoint, 0, ConnectionState::Connecting, 0, u16::MAX)
    }

    /// Creates the server-side state for a connection accepted by a listener.
    ///
    /// The remote peer consumed sequence number 0 on its connection request,
    /// so the accepted side starts tracking from there and seeds its own
    /// outbound stream at `initial_sequence_number`.
    pub fn new_accepted(
        app_id: u16,
        remote_endpoint: SocketAddr,
        send_rate: u8,
        initial_sequence_number: u16,
    ) -> Self {
        Self::with_state(
            app_id,
            remote_endpoint,
            send_rate,
            ConnectionState::Connected,
            initial_sequence_number,
            0,
        )
    }

    fn with_state(
        app_id: u16,
        remote_endpoint: SocketAddr,
        send_rate: u8,
        state: ConnectionState,
        next_seq_number: u16,
        last_remote_seq_number: u16,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                app_id,
                remote_endpoint,
                send_rate: AtomicU8::new(send_rate),
                active: AtomicBool::new(true),
                next_seq_number: AtomicU16::new(next_seq_number),
                last_ack_seq_num: AtomicU16::new(0),
                last_remote_seq_number: AtomicU16::new(last_remote_seq_number),
                state: Mutex::new(state),
                send_queue: Mutex::new(VecDeque::new()),
                pending_acks: Mutex::new(HashMap::new()),
                packet_results: Mutex::new(HashMap::new()),
                pending_times: Mutex::new(HashMap::new()),
                rtt_samples: Mutex::new(HashMap::new()),
                rtt: Mutex::new(Duration::ZERO),
                remote_acks: Mutex::new(HashSet::new()),
                receive_queue: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Application discriminator this connection validates against.
    pub fn app_id(&self) -> u16 {
        self.inner.app_id
    }

    /// The remote endpoint this connection represents.
    pub fn remote_endpoint(&self) -> SocketAddr {
        self.inner.remote_endpoint
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Negotiated packets-per-second rate. Zero until the handshake
    /// completes on the client side.
    pub fn send_rate(&self) -> u8 {
        self.inner.send_rate.load(SeqCst)
    }

    /// Whether the driver loop should keep running.
    pub fn is_active(&self) -> bool {
        self.inner.active.load(SeqCst)
    }

    /// Average round trip over the trailing window of resolved packets.
    pub fn rtt(&self) -> Duration {
        *self.inner.rtt.lock()
    }

    /// Number of delivered payloads waiting in the receive queue.
    pub fn available(&self) -> usize {
        self.inner.receive_queue.lock().len()
    }

    /// Queues data to ride on the next outbound packet and returns the
    /// sequence number that packet is expected to take. Payloads queued
    /// within the same send window are merged into a single packet.
    pub fn send(&self, buffer: Vec<u8>) -> u16 {
        self.send_with_callback(buffer, None)
    }

    /// Like [`send`](Self::send), additionally registering a callback that
    /// fires once when the packet resolves to `Successful` or `Dropped`.
    pub fn send_with_callback(&self, buffer: Vec<u8>, callback: Option<AckCallback>) -> u16 {
        let sequence_number = self.inner.next_seq_number.load(SeqCst);
        let mut send_queue = self.inner.send_queue.lock();
        let mut pending_acks = self.inner.pending_acks.lock();
        send_queue.push_back(buffer);
        pending_acks.insert(sequence_number, callback);
        sequence_number
    }

    /// Dequeues one delivered payload in arrival order.
    ///
    /// Check [`available`](Self::available) first; an empty queue is an
    /// [`ErrorKind::EmptyReceiveQueue`] error.
    pub fn receive(&self) -> Result<Vec<u8>> {
        self.inner.receive_queue.lock().pop_front().ok_or(ErrorKind::EmptyReceiveQueue)
    }

    /// Returns the delivery results gathered since the last clear, ordered
    /// by wraparound-aware sequence order.
    pub fn get_packet_results(&self) -> Vec<PacketResult> {
        let mut results: Vec<PacketResult> = self
            .inner
            .packet_results
            .lock()
            .iter()
            .map(|(&sequence_number, &status)| PacketResult { sequence_number, status })
            .collect();

        results.sort_by(|a, b| {
            use std::cmp::Ordering;
            if a.sequence_number == b.sequence_number {
                Ordering::Equal
            } else if sequence_greater_than(a.sequence_number, b.sequence_number) {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        });

        results
    }

    /// Clears the delivery result list.
    pub fn clear_packet_results(&self) {
        self.inner.packet_results.lock().clear();
    }

    /// Requests a graceful close. A connected peer gets a disconnection
    /// notify on the next send window; a still-connecting one is torn down
    /// immediately.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        match *state {
            ConnectionState::Connected => *state = ConnectionState::Disconnecting,
            ConnectionState::Connecting => {
                *state = ConnectionState::Disconnected;
                self.inner.active.store(false, SeqCst);
            }
            _ => {}
        }
    }

    /// Tears the connection down immediately without notifying the peer.
    pub fn force_close(&self) {
        *self.inner.state.lock() = ConnectionState::ForceClose;
        self.inner.active.store(false, SeqCst);
    }

    /// Called by the driver loop when the handshake deadline passes without
    /// an accept or refuse reply.
    pub fn abort_handshake(&self) {
        let mut state = self.inner.state.lock();
        if *state == ConnectionState::Connecting {
            debug!(remote = %self.inner.remote_endpoint, "handshake timed out");
            *state = ConnectionState::Disconnected;
            self.inner.active.store(false, SeqCst);
        }
    }

    /// Builds the connection request that opens the handshake, consuming the
    /// first outbound sequence number. The request itself is not tracked for
    /// acknowledgment.
    pub fn connection_request_packet(&self) -> Packet {
        let sequence_number = self.inner.next_seq_number.fetch_add(1, SeqCst);
        Packet::control(
            self.inner.app_id,
            sequence_number,
            0,
            Bitfield::new(ACK_BITFIELD_SIZE),
            PacketType::ConnectionRequest,
        )
    }

    /// Builds a disconnection notify carrying the current ack state.
    pub fn disconnect_packet(&self) -> Packet {
        Packet::control(
            self.inner.app_id,
            self.inner.next_seq_number.fetch_add(1, SeqCst),
            self.inner.last_remote_seq_number.load(SeqCst),
            self.received_bitfield(),
            PacketType::DisconnectionNotify,
        )
    }

    /// Executes one send-window tick and returns the packet to transmit.
    ///
    /// If none of the last 32 packets were acknowledged the connection is
    /// assumed dropped: a disconnection notify comes back and the state goes
    /// terminal. Otherwise the whole send queue is merged into a single data
    /// packet, or a keepalive goes out in its place.
    pub fn send_update(&self, now: Instant) -> Packet {
        let next = self.inner.next_seq_number.load(SeqCst);
        let last_ack = self.inner.last_ack_seq_num.load(SeqCst);

        let packet = if sequence_greater_than(next.wrapping_sub(1), last_ack.wrapping_add(ACK_WINDOW))
        {
            debug!(
                remote = %self.inner.remote_endpoint,
                "no acknowledgment progress within the window, assuming connection dropped"
            );
            let packet = self.disconnect_packet();
            self.enter_disconnected();
            packet
        } else if self.state() == ConnectionState::Disconnecting {
            debug!(remote = %self.inner.remote_endpoint, "closing gracefully");
            let packet = self.disconnect_packet();
            self.enter_disconnected();
            packet
        } else {
            let mut send_queue = self.inner.send_queue.lock();

            let payload = if send_queue.is_empty() {
                // A keepalive is tracked like any other packet so the ack
                // stream keeps measuring the link.
                self.inner.pending_acks.lock().entry(next).or_insert(None);
                None
            } else {
                let mut merged = Vec::with_capacity(send_queue.iter().map(Vec::len).sum());
                while let Some(chunk) = send_queue.pop_front() {
                    merged.extend_from_slice(&chunk);
                }
                Some(merged)
            };

            let packet_type =
                if payload.is_some() { PacketType::Data } else { PacketType::KeepAlive };

            Packet::new(
                self.inner.app_id,
                self.inner.next_seq_number.fetch_add(1, SeqCst),
                self.inner.last_remote_seq_number.load(SeqCst),
                self.received_bitfield(),
                packet_type,
                payload.unwrap_or_default(),
            )
        };

        self.inner.pending_times.lock().insert(packet.sequence_number(), now);
        self.inner.packet_results.lock().insert(packet.sequence_number(), PacketStatus::Pending);

        packet
    }

    /// Processes one validated inbound packet: updates the remote tracking
    /// window, resolves pending sends, refreshes the round-trip estimate, and
    /// applies the state-specific reaction. Invalid packets are dropped
    /// silently, indistinguishable from network loss.
    pub fn receive_update(&self, packet: &Packet, now: Instant) {
        if !packet.validate(self.inner.app_id, self.inner.last_remote_seq_number.load(SeqCst)) {
            trace!(
                remote = %self.inner.remote_endpoint,
                sequence = packet.sequence_number(),
                "dropping packet that failed validation"
            );
            return;
        }

        // Slide the remote tracking window forward.
        {
            let mut remote_acks = self.inner.remote_acks.lock();
            let window_start = packet.sequence_number().wrapping_sub(RTT_WINDOW);
            remote_acks.retain(|&sn| sequence_greater_than(sn, window_start));
            remote_acks.insert(self.inner.last_remote_seq_number.load(SeqCst));
            self.inner.last_remote_seq_number.store(packet.sequence_number(), SeqCst);
        }

        // Resolve pending sends. Callbacks collect here and fire after the
        // locks drop, so a callback may safely call back into the connection.
        let mut fired: Vec<(AckCallback, u16, PacketStatus)> = Vec::new();
        {
            let mut pending_acks = self.inner.pending_acks.lock();
            let mut packet_results = self.inner.packet_results.lock();
            let mut pending_times = self.inner.pending_times.lock();
            let mut rtt_samples = self.inner.rtt_samples.lock();

            for sequence_number in packet.acknowledged_sequence_numbers() {
                resolve_pending(
                    &mut pending_acks,
                    &mut packet_results,
                    &mut pending_times,
                    &mut rtt_samples,
                    &mut fired,
                    sequence_number,
                    PacketStatus::Successful,
                    now,
                );
            }

            // Anything still pending that fell out of the ack window is
            // assumed lost. Resending is the application's call.
            let stale_cutoff = packet.ack_sequence_number().wrapping_sub(RTT_WINDOW);
            let stale: Vec<u16> = pending_acks
                .keys()
                .copied()
                .filter(|&sn| !sequence_greater_than(sn, stale_cutoff))
                .collect();
            for sequence_number in stale {
                resolve_pending(
                    &mut pending_acks,
                    &mut packet_results,
                    &mut pending_times,
                    &mut rtt_samples,
                    &mut fired,
                    sequence_number,
                    PacketStatus::Dropped,
                    now,
                );
            }

            self.inner.last_ack_seq_num.store(packet.ack_sequence_number(), SeqCst);

            rtt_samples.retain(|&sn, _| sequence_greater_than(sn, stale_cutoff));
            if !rtt_samples.is_empty() {
                let total: Duration = rtt_samples.values().sum();
                *self.inner.rtt.lock() = total / rtt_samples.len() as u32;
            }
        }
        for (callback, sequence_number, status) in fired {
            callback(sequence_number, status);
        }

        // State-specific reaction.
        let mut state = self.inner.state.lock();
        match (*state, packet.packet_type()) {
            (ConnectionState::Connecting, PacketType::ConnectionAccept) => {
                let rate = packet.payload().first().copied().unwrap_or_default();
                self.inner.send_rate.store(rate, SeqCst);
                *state = ConnectionState::Connected;
                debug!(remote = %self.inner.remote_endpoint, send_rate = rate, "connection accepted");
            }
            (ConnectionState::Connecting, PacketType::ConnectionRefuse) => {
                debug!(remote = %self.inner.remote_endpoint, "connection refused");
                *state = ConnectionState::Disconnected;
                self.inner.active.store(false, SeqCst);
            }
            (ConnectionState::Connected, PacketType::DisconnectionNotify) => {
                debug!(remote = %self.inner.remote_endpoint, "peer disconnected");
                *state = ConnectionState::Disconnected;
                self.inner.active.store(false, SeqCst);
            }
            (ConnectionState::Connected, PacketType::Data) => {
                self.inner.receive_queue.lock().push_back(packet.payload().to_vec());
            }
            (ConnectionState::Connected, PacketType::KeepAlive) => {}
            (current, packet_type) => {
                trace!(
                    state = ?current,
                    ?packet_type,
                    "ignoring packet out of protocol order"
                );
            }
        }
    }

    /// Builds the acknowledgment bitfield for the trailing window: bit `j`
    /// is set iff sequence number `last_remote - j - 1` was received.
    fn received_bitfield(&self) -> Bitfield {
        let mut bitfield = Bitfield::new(ACK_BITFIELD_SIZE);
        let remote_acks = self.inner.remote_acks.lock();
        let last_remote = self.inner.last_remote_seq_number.load(SeqCst);
        let window_start = last_remote.wrapping_sub(RTT_WINDOW);

        let mut sequence = last_remote.wrapping_sub(1);
        let mut bit = 0;
        while sequence_greater_than(sequence, window_start) {
            if remote_acks.contains(&sequence) {
                bitfield.set(bit, true).ok();
            }
            sequence = sequence.wrapping_sub(1);
            bit += 1;
        }

        bitfield
    }

    fn enter_disconnected(&self) {
        *self.inner.state.lock() = ConnectionState::Disconnected;
        self.inner.active.store(false, SeqCst);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("app_id", &self.inner.app_id)
            .field("remote_endpoint", &self.inner.remote_endpoint)
            .field("state", &self.state())
            .field("next_seq_number", &self.inner.next_seq_number.load(SeqCst))
            .finish()
    }
}

#[allow(clippy::too_many_arguments)]
fn resolve_pending(
    pending_acks: &mut HashMap<u16, Option<AckCallback>>,
    packet_results: &mut HashMap<u16, PacketStatus>,
    pending_times: &mut HashMap<u16, Instant>,
    rtt_samples: &mut HashMap<u16, Duration>,
    fired: &mut Vec<(AckCallback, u16, PacketStatus)>,
    sequence_number: u16,
    status: PacketStatus,
    now: Instant,
) {
    let Some(callback) = pending_acks.remove(&sequence_number) else {
        return;
    };

    if status == PacketStatus::Successful {
        if let Some(sent_at) = pending_times.remove(&sequence_number) {
            rtt_samples.insert(sequence_number, now.duration_since(sent_at));
        }
    } else {
        pending_times.remove(&sequence_number);
    }

    packet_results.insert(sequence_number, status);

    if let Some(callback) = callback {
        fired.push((callback, sequence_number, status));
    }
}
