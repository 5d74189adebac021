//! Packet types and wire (de)serialization.
//!
//! A packet is the unit the reliability layer puts on the wire:
//!
//! ```text
//! offset 0  : app id               u16
//! offset 2  : sequence number      u16
//! offset 4  : ack sequence number  u16
//! offset 6  : ack bitfield         4 bytes (32 bits, MSB-first per byte)
//! offset 10 : packet type          u16
//! offset 12 : payload              variable length
//! offset N-4: crc32                u32 over bytes [0, N-4)
//! ```
//!
//! `Packet` holds explicit decoded fields and serializes on demand;
//! `deserialize` verifies the CRC trailer first and then decodes fields
//! eagerly, so an instance never disagrees with the bytes it came from.

use std::{
    convert::TryFrom,
    io::{Cursor, Read},
};

use byteorder::{BigEndian, ReadBytesExt};

use udpwire_core::{
    constants::{ACK_BITFIELD_SIZE, CHECKSUM_SIZE, HEADER_SIZE},
    error::{ErrorKind, Result},
};

use crate::{bitfield::Bitfield, checksum, sequence::sequence_greater_than};

/// Id to identify a certain packet type.
#[derive(Copy, Clone, Debug, PartialOrd, PartialEq, Eq)]
pub enum PacketType {
    /// First packet of the handshake, sent by a connecting client.
    ConnectionRequest = 0,
    /// Accept reply; payload carries the negotiated send rate and version.
    ConnectionAccept = 1,
    /// Refusal reply to an invalid or unwanted connection request.
    ConnectionRefuse = 2,
    /// Notifies the peer that this side considers the connection over.
    DisconnectionNotify = 3,
    /// Empty packet keeping the ack stream flowing when there is no data.
    KeepAlive = 4,
    /// Application payload.
    Data = 5,
    /// Never sent; receiving it (or any unrecognized value) is a protocol
    /// violation.
    Invalid = 6,
}

impl PacketType {
    /// Converts the type to its wire representation.
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for PacketType {
    type Error = ErrorKind;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0 => Ok(PacketType::ConnectionRequest),
            1 => Ok(PacketType::ConnectionAccept),
            2 => Ok(PacketType::ConnectionRefuse),
            3 => Ok(PacketType::DisconnectionNotify),
            4 => Ok(PacketType::KeepAlive),
            5 => Ok(PacketType::Data),
            6 => Ok(PacketType::Invalid),
            _ => Err(ErrorKind::UnknownPacketType(value)),
        }
    }
}

/// The wire message exchanged between two endpoints.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    app_id: u16,
    sequence_number: u16,
    ack_sequence_number: u16,
    ack_bitfield: Bitfield,
    packet_type: PacketType,
    payload: Vec<u8>,
}

impl Packet {
    /// Creates a packet with a payload.
    pub fn new(
        app_id: u16,
        sequence_number: u16,
        ack_sequence_number: u16,
        ack_bitfield: Bitfield,
        packet_type: PacketType,
        payload: Vec<u8>,
    ) -> Self {
        Self { app_id, sequence_number, ack_sequence_number, ack_bitfield, packet_type, payload }
    }

    /// Creates a control packet with an empty payload.
    pub fn control(
        app_id: u16,
        sequence_number: u16,
        ack_sequence_number: u16,
        ack_bitfield: Bitfield,
        packet_type: PacketType,
    ) -> Self {
        Self::new(app_id, sequence_number, ack_sequence_number, ack_bitfield, packet_type, Vec::new())
    }

    /// Application discriminator this packet was stamped with.
    pub fn app_id(&self) -> u16 {
        self.app_id
    }

    /// This packet's position in the sender's outbound stream.
    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    /// Highest sequence number the sender has received from its peer.
    pub fn ack_sequence_number(&self) -> u16 {
        self.ack_sequence_number
    }

    /// Selective-acknowledgment window relative to the ack sequence number.
    pub fn ack_bitfield(&self) -> &Bitfield {
        &self.ack_bitfield
    }

    /// Packet type.
    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Payload bytes. Empty for control packets other than
    /// `ConnectionAccept`.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total length this packet occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE + self.payload.len() + CHECKSUM_SIZE
    }

    /// Serializes the packet, appending the CRC32 trailer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.wire_len());
        buffer.extend_from_slice(&self.app_id.to_be_bytes());
        buffer.extend_from_slice(&self.sequence_number.to_be_bytes());
        buffer.extend_from_slice(&self.ack_sequence_number.to_be_bytes());
        buffer.extend_from_slice(&self.ack_bitfield.to_bytes());
        buffer.extend_from_slice(&self.packet_type.to_u16().to_be_bytes());
        buffer.extend_from_slice(&self.payload);
        checksum::append_checksum(&mut buffer);
        buffer
    }

    /// Deserializes a packet from a received datagram.
    ///
    /// The CRC trailer is verified before any field is decoded; a short
    /// buffer or checksum mismatch yields an error the caller treats the same
    /// as network loss. An unrecognized type value decodes to
    /// [`PacketType::Invalid`] so that [`validate`](Self::validate) rejects it.
    pub fn deserialize(buffer: &[u8]) -> Result<Packet> {
        if buffer.len() < HEADER_SIZE + CHECKSUM_SIZE {
            return Err(ErrorKind::ReceivedDataTooShort);
        }

        let content = checksum::validate_and_strip(buffer)?;
        let mut cursor = Cursor::new(content);

        let app_id = cursor.read_u16::<BigEndian>()?;
        let sequence_number = cursor.read_u16::<BigEndian>()?;
        let ack_sequence_number = cursor.read_u16::<BigEndian>()?;
        let mut bitfield_bytes = [0u8; ACK_BITFIELD_SIZE];
        cursor.read_exact(&mut bitfield_bytes)?;
        let packet_type =
            PacketType::try_from(cursor.read_u16::<BigEndian>()?).unwrap_or(PacketType::Invalid);

        Ok(Packet {
            app_id,
            sequence_number,
            ack_sequence_number,
            ack_bitfield: Bitfield::from_bytes(&bitfield_bytes),
            packet_type,
            payload: content[HEADER_SIZE..].to_vec(),
        })
    }

    /// Validates an already-deserialized packet against the receiver's
    /// expectations. A failing packet is silently dropped by the caller;
    /// validation failures are indistinguishable from network loss at this
    /// layer.
    pub fn validate(&self, app_id: u16, last_sequence_number: u16) -> bool {
        if self.app_id != app_id {
            return false;
        }

        if !sequence_greater_than(self.sequence_number, last_sequence_number) {
            return false;
        }

        match self.packet_type {
            PacketType::Invalid => false,
            PacketType::ConnectionAccept => self.payload.len() >= 2,
            PacketType::Data => !self.payload.is_empty(),
            _ => true,
        }
    }

    /// Every sequence number this packet acknowledges: the ack sequence
    /// number itself, plus `ack - i - 1` for each set bit `i` of the
    /// bitfield.
    pub fn acknowledged_sequence_numbers(&self) -> Vec<u16> {
        let mut acked = Vec::with_capacity(1 + self.ack_bitfield.capacity());
        acked.push(self.ack_sequence_number);
        for i in 0..self.ack_bitfield.capacity() {
            if matches!(self.ack_bitfield.get(i), Ok(true)) {
                acked.push(self.ack_sequence_number.wrapping_sub(i as u16 + 1));
            }
        }
        acked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn golden_packet() -> Packet {
        Packet::new(
            0x55AA,
            0xAA55,
            0x55AA,
            Bitfield::from_bytes(&[0xAA, 0x55, 0xAA, 0x55]),
            PacketType::Data,
            vec![0x55, 0xAA, 0x55, 0xAA, 0x55, 0xAA, 0x55, 0xAA],
        )
    }

    fn golden_bytes() -> Vec<u8> {
        vec![
            0x55, 0xAA, // app id
            0xAA, 0x55, // sequence number
            0x55, 0xAA, // ack sequence number
            0xAA, 0x55, 0xAA, 0x55, // ack bitfield
            0x00, 0x05, // type
            0x55, 0xAA, 0x55, 0xAA, 0x55, 0xAA, 0x55, 0xAA, // payload
            0x64, 0xBD, 0xD2, 0x48, // crc32
        ]
    }

    #[test]
    fn serialization_matches_golden_bytes() {
        assert_eq!(golden_packet().serialize(), golden_bytes());
    }

    #[test]
    fn deserialization_matches_golden_packet() {
        let packet = Packet::deserialize(&golden_bytes()).unwrap();
        assert_eq!(packet, golden_packet());
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let packet = Packet::new(
            7,
            65535,
            0,
            Bitfield::from_bytes(&[0x80, 0x00, 0x00, 0x01]),
            PacketType::ConnectionAccept,
            vec![30, 1],
        );
        let decoded = Packet::deserialize(&packet.serialize()).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.wire_len(), 12 + 2 + 4);
    }

    #[test]
    fn any_single_bit_flip_fails_deserialization() {
        let bytes = golden_bytes();
        for byte in 0..bytes.len() {
            for bit in 0..8 {
                let mut corrupted = bytes.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(
                    Packet::deserialize(&corrupted).is_err(),
                    "flip of byte {} bit {} went undetected",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn short_buffer_is_rejected() {
        assert!(matches!(
            Packet::deserialize(&golden_bytes()[..15]),
            Err(ErrorKind::ReceivedDataTooShort)
        ));
    }

    #[test]
    fn unrecognized_type_decodes_to_invalid() {
        let mut content = golden_bytes();
        content.truncate(content.len() - 4); // strip the trailer
        content[10] = 0x00;
        content[11] = 0x09;
        checksum::append_checksum(&mut content);

        let packet = Packet::deserialize(&content).unwrap();
        assert_eq!(packet.packet_type(), PacketType::Invalid);
        assert!(!packet.validate(0x55AA, 0));
    }

    #[test]
    fn validate_checks_app_id_and_freshness() {
        let packet = golden_packet();
        assert!(packet.validate(0x55AA, 0xAA54));
        assert!(!packet.validate(0x55AB, 0xAA54), "wrong app id accepted");
        assert!(!packet.validate(0x55AA, 0xAA55), "duplicate sequence accepted");
        assert!(!packet.validate(0x55AA, 0xAA56), "stale sequence accepted");
    }

    #[test]
    fn validate_enforces_payload_minimums() {
        let empty = Bitfield::new(4);
        let accept_short =
            Packet::new(1, 1, 0, empty.clone(), PacketType::ConnectionAccept, vec![30]);
        assert!(!accept_short.validate(1, 0));

        let accept_ok =
            Packet::new(1, 1, 0, empty.clone(), PacketType::ConnectionAccept, vec![30, 1]);
        assert!(accept_ok.validate(1, 0));

        let data_empty = Packet::control(1, 1, 0, empty.clone(), PacketType::Data);
        assert!(!data_empty.validate(1, 0));

        let keep_alive = Packet::control(1, 1, 0, empty, PacketType::KeepAlive);
        assert!(keep_alive.validate(1, 0));
    }

    #[test]
    fn acknowledged_numbers_follow_the_bitfield() {
        let mut bitfield = Bitfield::new(4);
        bitfield.set(0, true).unwrap();
        bitfield.set(2, true).unwrap();

        let packet = Packet::control(1, 1, 100, bitfield, PacketType::KeepAlive);
        assert_eq!(packet.acknowledged_sequence_numbers(), vec![100, 99, 97]);
    }

    #[test]
    fn acknowledged_numbers_wrap_below_zero() {
        let mut bitfield = Bitfield::new(4);
        bitfield.set(1, true).unwrap();

        let packet = Packet::control(1, 1, 0, bitfield, PacketType::KeepAlive);
        assert_eq!(packet.acknowledged_sequence_numbers(), vec![0, 65534]);
    }
}
