//! # IPMB Frame Decoder
//!
//! Validates and parses raw IPMB frames back into [`IpmiMessage`] values.

use super::checksum::checksum;
use super::protocol::*;
use crate::error::{IpmbError, Result};

/// Decode a complete IPMB frame
///
/// Checks run in a fixed order: frame length bounds first, then the
/// header checksum, then the trailing message checksum. Only a frame
/// passing all three is parsed into a message.
///
/// # Arguments
///
/// * `frame` - Complete frame bytes, checksums included
///
/// # Returns
///
/// * `Result<IpmiMessage>` - Parsed message, or the first failed check
///
/// # Errors
///
/// - [`IpmbError::FrameLength`] when the frame is shorter than the
///   connection header plus checksum for its direction, or longer than
///   32 bytes
/// - [`IpmbError::HeaderChecksum`] when the byte at position 2 does not
///   close the first two bytes
/// - [`IpmbError::MessageChecksum`] when the last byte does not close
///   the remainder of the frame
pub fn decode_frame(frame: &[u8]) -> Result<IpmiMessage> {
    // Shortest possible frame is a request with no payload
    if frame.len() < IPMB_REQ_HEADER_LENGTH + 1 || frame.len() > IPMB_MSG_MAX_LENGTH {
        return Err(IpmbError::FrameLength(frame.len()));
    }

    let netfn = frame[1] >> 2;
    let is_response = netfn & 0x01 != 0;
    let header_len = if is_response {
        IPMB_RESP_HEADER_LENGTH
    } else {
        IPMB_REQ_HEADER_LENGTH
    };

    // A response header is one byte longer than a request header
    if frame.len() < header_len + 1 {
        return Err(IpmbError::FrameLength(frame.len()));
    }

    // Header checksum closes bytes 0 and 1
    let expected = checksum(&frame[..HEADER_CHECKSUM_POSITION]);
    let got = frame[HEADER_CHECKSUM_POSITION];
    if expected != got {
        return Err(IpmbError::HeaderChecksum { expected, got });
    }

    // Message checksum closes everything between the header checksum
    // and the final byte
    let body = &frame[HEADER_CHECKSUM_POSITION + 1..frame.len() - 1];
    let expected = checksum(body);
    let got = frame[frame.len() - 1];
    if expected != got {
        return Err(IpmbError::MessageChecksum { expected, got });
    }

    let completion_code = if is_response { Some(frame[6]) } else { None };

    Ok(IpmiMessage {
        dest_addr: frame[0],
        netfn,
        dest_lun: frame[1] & 0x03,
        src_addr: frame[3],
        seq: frame[4] >> 2,
        src_lun: frame[4] & 0x03,
        cmd: frame[5],
        completion_code,
        data: frame[header_len..frame.len() - 1].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipmb::encoder::encode_frame;

    fn sample_request() -> IpmiMessage {
        let mut msg = IpmiMessage::request(0x72, 0x06, 0x01, vec![0x10, 0x20]).unwrap();
        msg.src_addr = 0x20;
        msg.seq = 0x2A;
        msg
    }

    #[test]
    fn test_decode_request_fields() {
        let frame = vec![0x72, 0x18, 0x76, 0x20, 0x04, 0x01, 0xDB];
        let msg = decode_frame(&frame).unwrap();

        assert_eq!(msg.dest_addr, 0x72);
        assert_eq!(msg.netfn, 0x06);
        assert_eq!(msg.dest_lun, 0);
        assert_eq!(msg.src_addr, 0x20);
        assert_eq!(msg.seq, 0x01);
        assert_eq!(msg.src_lun, 0);
        assert_eq!(msg.cmd, 0x01);
        assert_eq!(msg.completion_code, None);
        assert!(msg.data.is_empty());
    }

    #[test]
    fn test_decode_response_fields() {
        let frame = vec![0x20, 0x1C, 0xC4, 0x72, 0x04, 0x01, 0x00, 0x89];
        let msg = decode_frame(&frame).unwrap();

        assert!(msg.is_response());
        assert_eq!(msg.netfn, 0x07);
        assert_eq!(msg.completion_code, Some(0x00));
        assert!(msg.data.is_empty());
    }

    #[test]
    fn test_decode_recovers_encoded_request() {
        let msg = sample_request();
        let decoded = decode_frame(&encode_frame(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_decode_recovers_encoded_response() {
        let resp = IpmiMessage::response_to(&sample_request(), 0xC1, vec![0x01, 0x02]).unwrap();
        let decoded = decode_frame(&encode_frame(&resp).unwrap()).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        let result = decode_frame(&[0x72, 0x18, 0x76, 0x20, 0x04, 0x01]);
        assert!(matches!(result, Err(IpmbError::FrameLength(6))));
    }

    #[test]
    fn test_decode_rejects_oversize_frame() {
        let frame = vec![0u8; IPMB_MSG_MAX_LENGTH + 1];
        let result = decode_frame(&frame);
        assert!(matches!(result, Err(IpmbError::FrameLength(33))));
    }

    #[test]
    fn test_decode_rejects_truncated_response() {
        // Response netfn but only seven bytes, valid checksums
        let frame = vec![0x20, 0x1C, 0xC4, 0x72, 0x04, 0x01, 0x89];
        let result = decode_frame(&frame);
        assert!(matches!(result, Err(IpmbError::FrameLength(7))));
    }

    #[test]
    fn test_decode_header_checksum_error() {
        let mut frame = encode_frame(&sample_request()).unwrap();
        frame[HEADER_CHECKSUM_POSITION] ^= 0x01;

        match decode_frame(&frame) {
            Err(IpmbError::HeaderChecksum { expected, got }) => {
                assert_eq!(expected, got ^ 0x01);
            }
            other => panic!("expected header checksum error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_message_checksum_error() {
        let mut frame = encode_frame(&sample_request()).unwrap();
        let last = frame.len() - 1;
        frame[last - 1] ^= 0xFF;

        assert!(matches!(
            decode_frame(&frame),
            Err(IpmbError::MessageChecksum { .. })
        ));
    }

    #[test]
    fn test_decode_check_order_header_first() {
        // Corrupt both checksums; the header error must win
        let mut frame = encode_frame(&sample_request()).unwrap();
        frame[HEADER_CHECKSUM_POSITION] ^= 0xFF;
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        assert!(matches!(
            decode_frame(&frame),
            Err(IpmbError::HeaderChecksum { .. })
        ));
    }

    #[test]
    fn test_decode_full_length_frame() {
        let mut msg = sample_request();
        msg.data = vec![0xA5; 25];
        let frame = encode_frame(&msg).unwrap();
        assert_eq!(frame.len(), IPMB_MSG_MAX_LENGTH);

        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.data.len(), 25);
        assert_eq!(decoded, msg);
    }
}
