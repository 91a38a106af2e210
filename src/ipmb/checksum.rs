//! # IPMB Checksum Implementation
//!
//! Two's-complement-of-sum checksum used for both the connection header and
//! the full message trailer.
//!
//! **Rule**: for any byte range, `(sum(range) + checksum(range)) mod 256 == 0`

/// Calculate the two's-complement checksum over a byte slice
///
/// # Arguments
///
/// * `data` - Byte slice to checksum
///
/// # Returns
///
/// * `u8` - Value that makes the range sum to zero modulo 256
///
/// # Examples
///
/// ```
/// use mmc_ipmb::ipmb::checksum::checksum;
///
/// let data = [0x70, 0x18];
/// let chk = checksum(&data);
/// assert_eq!(data.iter().fold(chk, |acc, &b| acc.wrapping_add(b)), 0);
/// ```
pub fn checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    0u8.wrapping_sub(sum)
}

/// Verify a block whose last byte is the checksum of the preceding bytes
///
/// # Arguments
///
/// * `block` - Byte slice ending in its own checksum byte
///
/// # Returns
///
/// * `bool` - true when the whole block sums to zero modulo 256
pub fn verify_block(block: &[u8]) -> bool {
    if block.is_empty() {
        return false;
    }
    block.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_empty() {
        assert_eq!(checksum(&[]), 0x00);
    }

    #[test]
    fn test_checksum_single_byte() {
        assert_eq!(checksum(&[0x00]), 0x00);
        assert_eq!(checksum(&[0x01]), 0xFF);
        assert_eq!(checksum(&[0xFF]), 0x01);
        assert_eq!(checksum(&[0x80]), 0x80);
    }

    #[test]
    fn test_checksum_known_vectors() {
        // Connection header of a request to 0x70, netfn 0x06, LUN 0
        let header = [0x70, 0x18];
        assert_eq!(checksum(&header), 0x78);

        // Wrapping sum
        let data = [0xFF, 0xFF, 0x02];
        assert_eq!(checksum(&data), 0x00);
    }

    #[test]
    fn test_checksum_closes_any_range() {
        let cases: [&[u8]; 5] = [
            &[0x20, 0x18, 0xC8, 0x72, 0x14, 0x01],
            &[0x00; 25],
            &[0xFF; 31],
            &[0x01, 0x02, 0x03, 0x04, 0x05],
            &[0xA0, 0xA5, 0xAA],
        ];

        for data in cases {
            let chk = checksum(data);
            let total = data.iter().fold(chk, |acc, &b| acc.wrapping_add(b));
            assert_eq!(total, 0, "checksum did not close range {:02X?}", data);
        }
    }

    #[test]
    fn test_verify_block_accepts_closed_range() {
        let mut block = vec![0x70, 0x18, 0x05, 0x9C];
        block.push(checksum(&block));
        assert!(verify_block(&block));
    }

    #[test]
    fn test_verify_block_rejects_corruption() {
        let mut block = vec![0x70, 0x18, 0x05, 0x9C];
        block.push(checksum(&block));

        for i in 0..block.len() {
            for bit in 0..8 {
                let mut corrupted = block.clone();
                corrupted[i] ^= 1 << bit;
                assert!(
                    !verify_block(&corrupted),
                    "bit {} of byte {} flipped but block still verified",
                    bit,
                    i
                );
            }
        }
    }

    #[test]
    fn test_verify_block_rejects_empty() {
        assert!(!verify_block(&[]));
    }

    #[test]
    fn test_checksum_changes_with_data() {
        assert_ne!(checksum(&[0x70, 0x18, 0x04]), checksum(&[0x70, 0x18, 0x05]));
    }
}
