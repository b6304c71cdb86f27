//! NMEA-style XOR checksums for DL20 sub-messages.
//!
//! A checksummed block looks like `ISHPR,12.3,0.5,-1.2 4f`: the payload,
//! one separator character, then two hex digits holding the XOR of every
//! payload byte.

/// Length of the `<separator><hex><hex>` suffix.
pub const SUFFIX_LEN: usize = 3;

/// XOR of all bytes in `payload`.
pub fn compute_checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Render a checksum the way the instrument does (two lowercase hex digits).
pub fn format_checksum(checksum: u8) -> String {
    format!("{checksum:02x}")
}

/// Payload portion of a checksummed block, i.e. everything before the
/// separator. Returns `None` when the block is too short to carry a suffix.
pub fn payload(message: &str) -> Option<&str> {
    let end = message.len().checked_sub(SUFFIX_LEN)?;
    message.get(..end)
}

/// Verify the trailing checksum of a block.
///
/// Short or malformed input is reported as unverified rather than an error;
/// the caller decides what to substitute.
pub fn verify_checksum(message: &str) -> bool {
    let bytes = message.as_bytes();
    if bytes.len() < SUFFIX_LEN {
        return false;
    }
    let split = bytes.len() - SUFFIX_LEN;
    let expected = format_checksum(compute_checksum(&bytes[..split]));
    let received = &bytes[bytes.len() - 2..];
    received.eq_ignore_ascii_case(expected.as_bytes())
}

/// Append `' '` and the checksum to `payload`. Used by the simulator and tests.
pub fn seal(payload: &str) -> String {
    format!(
        "{payload} {}",
        format_checksum(compute_checksum(payload.as_bytes()))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_checksum() {
        // "AB" = 0x41 ^ 0x42 = 0x03
        assert_eq!(compute_checksum(b"AB"), 0x03);
        assert!(verify_checksum("AB 03"));
    }

    #[test]
    fn test_sealed_block_verifies() {
        let block = seal("ISHPR,123.4,-1.20,0.35");
        assert!(verify_checksum(&block));
        assert_eq!(payload(&block), Some("ISHPR,123.4,-1.20,0.35"));
    }

    #[test]
    fn test_uppercase_checksum_accepted() {
        let block = seal("ISDPT,10.00,M,2.000,B,4.50,C");
        let upper = block.to_ascii_uppercase();
        // Payload is already uppercase apart from the hex digits
        assert!(verify_checksum(&upper));
    }

    #[test]
    fn test_short_input_not_verified() {
        assert!(!verify_checksum(""));
        assert!(!verify_checksum("4f"));
        assert!(payload("ab").is_none());
    }

    #[test]
    fn test_non_hex_tail_not_verified() {
        assert!(!verify_checksum("ISHPR,1,2,3 zz"));
    }

    #[test]
    fn test_single_char_corruption_detected() {
        let block = seal("ISHPR,123.4,-1.20,0.35");
        let payload_len = block.len() - SUFFIX_LEN;
        for i in 0..payload_len {
            let mut bytes = block.clone().into_bytes();
            // Flipping a single bit always changes the XOR
            bytes[i] ^= 0x01;
            let corrupted = String::from_utf8(bytes).unwrap();
            assert!(!verify_checksum(&corrupted), "corruption at {i} undetected");
        }
    }
}
