//! CRC32 checksum utilities for data integrity verification.

use crc32fast::Hasher;
use udpwire_core::error::{ErrorKind, Result};

/// Computes the CRC32 checksum over the given bytes.
pub fn compute(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Appends the CRC32 checksum of the current contents to the buffer in-place.
pub fn append_checksum(data: &mut Vec<u8>) {
    let checksum = compute(data);
    data.extend_from_slice(&checksum.to_be_bytes());
}

/// Validates and strips the CRC32 trailer from received data.
///
/// Returns the data without the trailer if valid. A short buffer or a
/// mismatching checksum is an error the receive path treats as if the
/// datagram never arrived.
pub fn validate_and_strip(data: &[u8]) -> Result<&[u8]> {
    if data.len() < 4 {
        return Err(ErrorKind::ReceivedDataTooShort);
    }

    let (payload, trailer) = data.split_at(data.len() - 4);
    let received = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = compute(payload);

    if received != computed {
        return Err(ErrorKind::ChecksumMismatch { computed, received });
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_validate_round_trip() {
        let mut buffer = b"Hello, world!".to_vec();
        append_checksum(&mut buffer);
        assert_eq!(buffer.len(), 13 + 4);

        let validated = validate_and_strip(&buffer).unwrap();
        assert_eq!(validated, b"Hello, world!");
    }

    #[test]
    fn validation_fails_on_corruption() {
        let mut buffer = b"Hello, world!".to_vec();
        append_checksum(&mut buffer);

        let len = buffer.len();
        buffer[len - 1] ^= 0xFF;

        assert!(validate_and_strip(&buffer).is_err());
    }

    #[test]
    fn validation_rejects_short_data() {
        assert!(matches!(
            validate_and_strip(b"Hi"),
            Err(ErrorKind::ReceivedDataTooShort)
        ));
    }

    #[test]
    fn empty_data_still_carries_a_trailer() {
        let mut buffer = Vec::new();
        append_checksum(&mut buffer);
        assert_eq!(buffer.len(), 4);

        let validated = validate_and_strip(&buffer).unwrap();
        assert!(validated.is_empty());
    }

    #[test]
    fn compute_is_deterministic() {
        let data = [0x55u8, 0xAA, 0x55, 0xAA];
        assert_eq!(compute(&data), compute(&data));
    }
}
