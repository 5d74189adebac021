#![warn(missing_docs)]

//! udpwire-protocol: packet wire format and protocol arithmetic.

/// Fixed-capacity bit sequence used for the acknowledgment window.
pub mod bitfield;
/// CRC32 integrity trailer.
pub mod checksum;
/// Packet types and wire (de)serialization.
pub mod packet;
/// Wraparound-aware sequence number comparison.
pub mod sequence;

pub use bitfield::Bitfield;
pub use packet::{Packet, PacketType};
pub use sequence::{sequence_greater_than, sequence_less_than, SequenceNumber};
