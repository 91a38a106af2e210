//! # IPMB Frame Encoder
//!
//! Serializes [`IpmiMessage`] values into checksummed wire frames.

use super::checksum::checksum;
use super::protocol::*;
use crate::error::Result;

/// Encode a message into a complete IPMB frame
///
/// Layout for a request:
///
/// ```text
/// rsSA | NetFN:6 rsLUN:2 | hdr chk | rqSA | rqSeq:6 rqLUN:2 | CMD | data... | msg chk
/// ```
///
/// A response inserts the completion code between CMD and the payload.
/// The header checksum closes the first two bytes; the message checksum
/// closes everything after it.
///
/// # Arguments
///
/// * `msg` - Message to serialize; validated before any byte is written
///
/// # Returns
///
/// * `Result<Vec<u8>>` - Complete frame, at most 32 bytes
///
/// # Errors
///
/// Returns [`IpmbError::InvalidRequest`](crate::error::IpmbError::InvalidRequest)
/// when the message fails structural validation
pub fn encode_frame(msg: &IpmiMessage) -> Result<Vec<u8>> {
    msg.validate()?;

    let mut frame = Vec::with_capacity(msg.frame_len());

    // Connection header, first checksum range
    frame.push(msg.dest_addr);
    frame.push(msg.netfn << 2 | msg.dest_lun);
    frame.push(checksum(&frame));

    // Second checksum range: source fields, command, payload
    frame.push(msg.src_addr);
    frame.push(msg.seq << 2 | msg.src_lun);
    frame.push(msg.cmd);
    if let Some(cc) = msg.completion_code {
        frame.push(cc);
    }
    frame.extend_from_slice(&msg.data);
    frame.push(checksum(&frame[HEADER_CHECKSUM_POSITION + 1..]));

    Ok(frame)
}
