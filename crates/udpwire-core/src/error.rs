use std::io;

use thiserror::Error;

/// Errors that can occur within the udpwire stack.
///
/// Wire-level problems (short datagrams, checksum mismatches, unknown packet
/// types) are ordinary values here: callers on the receive path treat them the
/// same as network loss and drop the datagram without touching connection
/// state.
#[derive(Error, Debug)]
pub enum ErrorKind {
    /// The received buffer is too short to hold a packet header and trailer.
    #[error("received data is too short to hold a packet")]
    ReceivedDataTooShort,
    /// The CRC32 trailer does not match the packet contents.
    #[error("packet checksum mismatch: computed {computed:#010x}, trailer {received:#010x}")]
    ChecksumMismatch {
        /// Checksum computed over the received bytes.
        computed: u32,
        /// Checksum carried in the trailer.
        received: u32,
    },
    /// The wire value does not name a known packet type.
    #[error("unknown packet type {0}")]
    UnknownPacketType(u16),
    /// A bitfield access was outside the allocated capacity.
    #[error("bit index {index} out of range for capacity {capacity}")]
    BitIndexOutOfRange {
        /// Index that was requested.
        index: usize,
        /// Capacity of the bitfield in bits.
        capacity: usize,
    },
    /// `receive` was called with no delivered payloads queued.
    #[error("receive queue is empty")]
    EmptyReceiveQueue,
    /// An I/O error from the underlying socket.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, ErrorKind>;
