use std::{default::Default, time::Duration};

/// Configuration options to tune connection and listener behavior.
#[derive(Clone, Debug)]
pub struct Config {
    /// Packets sent per second on each established connection.
    ///
    /// A listener hands this value to connecting clients inside the
    /// connection-accept payload, so both sides tick at the same rate.
    pub send_rate: u8,
    /// Max time a connecting client waits for an accept or refuse reply.
    pub handshake_timeout: Duration,
    /// Max receive buffer size in bytes. Datagrams larger than this are
    /// truncated by the OS and will fail checksum validation.
    pub receive_buffer_max_size: usize,
    /// Socket receive buffer size in bytes (None = use system default).
    /// Corresponds to SO_RCVBUF.
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = use system default).
    /// Corresponds to SO_SNDBUF.
    pub socket_send_buffer_size: Option<usize>,
    /// Time-to-live for outgoing packets (None = use system default).
    pub socket_ttl: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            send_rate: 30,
            handshake_timeout: Duration::from_millis(500),
            receive_buffer_max_size: 4096,
            socket_recv_buffer_size: None,
            socket_send_buffer_size: None,
            socket_ttl: None,
        }
    }
}
