#![warn(missing_docs)]

//! udpwire-core: foundational types and utilities.
//!
//! This crate provides the minimal set of core pieces shared across all
//! layers of the stack:
//! - Configuration types
//! - Error handling
//! - Protocol constants
//! - The datagram transport seam
//! - A time source abstraction for testable driver loops

/// Protocol constants shared across layers.
pub mod constants {
    /// Number of trailing packets covered by the acknowledgment bitfield.
    pub const ACK_WINDOW: u16 = 32;
    /// Window of resolved packets kept for round-trip-time averaging.
    pub const RTT_WINDOW: u16 = ACK_WINDOW + 1;
    /// Fixed header size: app id, sequence, ack sequence, ack bitfield, type.
    pub const HEADER_SIZE: usize = 12;
    /// Size of the CRC32 trailer at the end of every packet.
    pub const CHECKSUM_SIZE: usize = 4;
    /// Size in bytes of the acknowledgment bitfield carried in the header.
    pub const ACK_BITFIELD_SIZE: usize = 4;
    /// This is the current protocol version.
    ///
    /// Carried as the second byte of the connection-accept payload.
    pub const PROTOCOL_VERSION: u8 = 1;
}

/// Configuration options for connections and listeners.
pub mod config;
/// Error types and results.
pub mod error;
/// Time source abstraction.
pub mod time;
/// Transport abstraction for pluggable I/O.
pub mod transport;
