/// Connection lifecycle state machine.
///
/// `Disconnected → Connecting → Connected → {Disconnecting | ForceClose} →
/// Disconnected`. Entry into `Disconnected` or `ForceClose` is terminal; the
/// owning driver loop exits and the owner reaps the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists or the connection has ended.
    #[default]
    Disconnected,

    /// Client: connection request sent, waiting for accept or refuse.
    Connecting,

    /// Handshake completed, data and keepalives flowing.
    Connected,

    /// Graceful close requested; a disconnection notify goes out on the next
    /// send window, then the state becomes `Disconnected`.
    Disconnecting,

    /// Immediate teardown without notifying the peer.
    ForceClose,
}

impl ConnectionState {
    /// Returns true while the handshake is in flight.
    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }

    /// Returns true once the handshake has completed.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Returns true when the connection lifecycle is over and the owner may
    /// reap it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::ForceClose)
    }
}
