//! Fixed-capacity ordered bit sequence.
//!
//! Backs the 32-bit acknowledgment window carried in every packet header.
//! Bits pack MSB-first within each byte: bit 0 of a byte is its `0x80` value.

use udpwire_core::error::{ErrorKind, Result};

/// A fixed-capacity sequence of bits with indexed access, shifting, rotation,
/// and byte (de)serialization. Capacity is always a multiple of 8.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<bool>,
}

impl Bitfield {
    /// Creates a bitfield of `byte_size * 8` bits, all clear.
    pub fn new(byte_size: usize) -> Self {
        Self { bits: vec![false; byte_size * 8] }
    }

    /// Returns the capacity in bits.
    pub fn capacity(&self) -> usize {
        self.bits.len()
    }

    /// Returns the bit at `index`.
    pub fn get(&self, index: usize) -> Result<bool> {
        self.bits
            .get(index)
            .copied()
            .ok_or(ErrorKind::BitIndexOutOfRange { index, capacity: self.bits.len() })
    }

    /// Sets the bit at `index`.
    pub fn set(&mut self, index: usize, value: bool) -> Result<()> {
        let capacity = self.bits.len();
        match self.bits.get_mut(index) {
            Some(bit) => {
                *bit = value;
                Ok(())
            }
            None => Err(ErrorKind::BitIndexOutOfRange { index, capacity }),
        }
    }

    /// Shifts every bit toward index 0 by `amount`, dropping bits that fall
    /// off the front and zero-filling at the back.
    pub fn shift_left(&mut self, amount: usize) {
        // One bit per pass so drop-on-overflow happens bit by bit.
        for _ in 0..amount {
            if self.bits.is_empty() {
                return;
            }
            for i in 0..self.bits.len() - 1 {
                self.bits[i] = self.bits[i + 1];
            }
            let last = self.bits.len() - 1;
            self.bits[last] = false;
        }
    }

    /// Shifts every bit toward the highest index by `amount`, dropping bits
    /// that fall off the back and zero-filling at the front.
    pub fn shift_right(&mut self, amount: usize) {
        for _ in 0..amount {
            if self.bits.is_empty() {
                return;
            }
            for i in (1..self.bits.len()).rev() {
                self.bits[i] = self.bits[i - 1];
            }
            self.bits[0] = false;
        }
    }

    /// Like [`shift_left`](Self::shift_left), but the bit dropped at the front
    /// re-enters at the back. Rotating by the full capacity is the identity.
    pub fn rotate_left(&mut self, amount: usize) {
        for _ in 0..amount {
            if self.bits.is_empty() {
                return;
            }
            let first = self.bits[0];
            for i in 0..self.bits.len() - 1 {
                self.bits[i] = self.bits[i + 1];
            }
            let last = self.bits.len() - 1;
            self.bits[last] = first;
        }
    }

    /// Like [`shift_right`](Self::shift_right), but the bit dropped at the
    /// back re-enters at the front.
    pub fn rotate_right(&mut self, amount: usize) {
        for _ in 0..amount {
            if self.bits.is_empty() {
                return;
            }
            let last = self.bits[self.bits.len() - 1];
            for i in (1..self.bits.len()).rev() {
                self.bits[i] = self.bits[i - 1];
            }
            self.bits[0] = last;
        }
    }

    /// Serializes to bytes, MSB-first within each byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.bits.len().div_ceil(8)];
        for (i, &bit) in self.bits.iter().enumerate() {
            if bit {
                bytes[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        bytes
    }

    /// Deserializes from bytes, MSB-first within each byte. Round-trips
    /// exactly with [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(buffer: &[u8]) -> Self {
        let mut bits = vec![false; buffer.len() * 8];
        for (i, &byte) in buffer.iter().enumerate() {
            for j in 0..8 {
                bits[i * 8 + j] = byte & (1 << (7 - j)) != 0;
            }
        }
        Self { bits }
    }

    /// Reallocates to `byte_size * 8` bits. Bits within the surviving prefix
    /// keep their values; any newly allocated bits are clear.
    pub fn resize(&mut self, byte_size: usize) {
        self.bits.resize(byte_size * 8, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_set_round_trip() {
        let mut field = Bitfield::new(4);
        assert_eq!(field.capacity(), 32);
        assert!(!field.get(31).unwrap());

        field.set(0, true).unwrap();
        field.set(31, true).unwrap();
        assert!(field.get(0).unwrap());
        assert!(field.get(31).unwrap());

        field.set(0, false).unwrap();
        assert!(!field.get(0).unwrap());
    }

    #[test]
    fn out_of_range_access_is_an_error() {
        let mut field = Bitfield::new(4);
        assert!(matches!(
            field.get(32),
            Err(ErrorKind::BitIndexOutOfRange { index: 32, capacity: 32 })
        ));
        assert!(field.set(32, true).is_err());
    }

    #[test]
    fn shift_right_drops_and_zero_fills() {
        let mut field = Bitfield::from_bytes(&[0xAA, 0xAA, 0xAA, 0xAA]);
        field.shift_right(5);
        assert_eq!(field.to_bytes(), vec![0x05, 0x55, 0x55, 0x55]);
    }

    #[test]
    fn shift_left_drops_and_zero_fills() {
        let mut field = Bitfield::from_bytes(&[0xAA, 0xAA, 0xAA, 0xAA]);
        field.shift_left(5);
        assert_eq!(field.to_bytes(), vec![0x55, 0x55, 0x55, 0x40]);
    }

    #[test]
    fn rotate_right_loses_no_bits() {
        let mut field = Bitfield::from_bytes(&[0xAA, 0xAA, 0xAA, 0xAA]);
        field.rotate_right(5);
        assert_eq!(field.to_bytes(), vec![0x55, 0x55, 0x55, 0x55]);
    }

    #[test]
    fn rotate_left_by_capacity_is_identity() {
        let mut field = Bitfield::from_bytes(&[0xDE, 0xAD, 0xBE, 0xEF]);
        field.rotate_left(32);
        assert_eq!(field.to_bytes(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn byte_round_trip_is_exact() {
        let bytes = [0x80u8, 0x01, 0xFF, 0x00];
        let field = Bitfield::from_bytes(&bytes);
        assert!(field.get(0).unwrap());
        assert!(field.get(15).unwrap());
        assert!(!field.get(8).unwrap());
        assert_eq!(field.to_bytes(), bytes.to_vec());
    }

    #[test]
    fn resize_changes_capacity() {
        let mut field = Bitfield::new(4);
        field.set(5, true).unwrap();
        field.resize(8);
        assert_eq!(field.capacity(), 64);
        assert!(field.get(63).is_ok());

        field.resize(1);
        assert_eq!(field.capacity(), 8);
        assert!(field.get(8).is_err());
    }
}
