//! # IPMB Protocol Constants and Types
//!
//! Core protocol definitions for IPMB (Intelligent Platform Management Bus)
//! communication.

use crate::error::{IpmbError, Result};

/// Maximum length in bytes of one message frame, connection header and
/// trailing checksum included
pub const IPMB_MSG_MAX_LENGTH: usize = 32;

/// Length of the connection header in a request
///
/// Request header layout:
/// - rsSA - destination address
/// - NetFN:6 rsLUN:2 - net function and destination LUN
/// - header checksum - 2's complement of the sum of the preceding bytes
/// - rqSA - source address
/// - rqSeq:6 rqLUN:2 - sequence number and source LUN
/// - CMD - command
pub const IPMB_REQ_HEADER_LENGTH: usize = 6;

/// Length of the connection header in a response
///
/// A response header carries one extra byte, the completion code, between
/// the command and the payload.
pub const IPMB_RESP_HEADER_LENGTH: usize = 7;

/// Position of the header checksum byte inside a frame
pub const HEADER_CHECKSUM_POSITION: usize = 2;

/// Shelf manager (MCH) slave address
pub const MCH_ADDRESS: u8 = 0x20;

/// Widest value of the 6-bit net function field
pub const NETFN_MAX: u8 = 0x3F;

/// Widest value of the 6-bit rolling sequence number
pub const SEQUENCE_MAX: u8 = 0x3F;

/// Widest value of a 2-bit LUN field
pub const LUN_MAX: u8 = 0x03;

/// Completion code reported for normally handled requests
pub const COMPLETION_NORMAL: u8 = 0x00;

/// Maximum retries made by the transmit worker for one message
pub const IPMB_MAX_RETRIES: u8 = 3;

/// Timeout between the end of a request and the start of its response,
/// per the IPMB timing specification (milliseconds)
pub const IPMB_MSG_TIMEOUT_MS: u64 = 250;

/// Timeout waiting for free space in a client queue when delivering a
/// received message (milliseconds)
pub const CLIENT_NOTIFY_TIMEOUT_MS: u64 = 5;

/// Depth of the shared outbound message queue
pub const IPMB_TXQUEUE_LEN: usize = 5;

/// Depth of each registered client's inbound queue
pub const IPMB_CLIENT_QUEUE_LEN: usize = 5;

/// One IPMB message, request or response
///
/// Field widths follow the wire format: addresses are 8-bit slave addresses
/// (7-bit device identity, low bit zero), `netfn` and `seq` are 6 bits,
/// LUNs are 2 bits. The low bit of `netfn` distinguishes requests (even)
/// from responses (odd) and drives all routing decisions downstream.
///
/// Checksums are not part of the in-memory representation; the encoder
/// computes them when framing and the decoder verifies them before a
/// message is ever constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpmiMessage {
    /// Destination slave address
    pub dest_addr: u8,

    /// Net function (6 bits); low bit set for responses
    pub netfn: u8,

    /// Destination LUN (2 bits)
    pub dest_lun: u8,

    /// Source slave address
    pub src_addr: u8,

    /// Rolling sequence number (6 bits)
    pub seq: u8,

    /// Source LUN (2 bits)
    pub src_lun: u8,

    /// Command code, opaque to this layer
    pub cmd: u8,

    /// Completion code; present in responses only
    pub completion_code: Option<u8>,

    /// Payload bytes, bounded by the 32-byte frame limit
    pub data: Vec<u8>,
}

impl IpmiMessage {
    /// Build a request message
    ///
    /// The sequence number and source address are left at zero; the link
    /// stamps both when the message is submitted for transmission.
    ///
    /// # Arguments
    ///
    /// * `dest_addr` - Destination slave address (low bit zero)
    /// * `netfn` - Net function (must be even: requests only)
    /// * `cmd` - Command code
    /// * `data` - Payload (max 25 bytes for a request)
    ///
    /// # Errors
    ///
    /// Returns [`IpmbError::InvalidRequest`] when a field is out of range
    /// or the payload exceeds the frame bound
    pub fn request(dest_addr: u8, netfn: u8, cmd: u8, data: Vec<u8>) -> Result<Self> {
        if netfn & 0x01 != 0 {
            return Err(IpmbError::InvalidRequest(format!(
                "request netfn 0x{:02X} must be even",
                netfn
            )));
        }

        let msg = Self {
            dest_addr,
            netfn,
            dest_lun: 0,
            src_addr: 0,
            seq: 0,
            src_lun: 0,
            cmd,
            completion_code: None,
            data,
        };
        msg.validate()?;
        Ok(msg)
    }

    /// Build the response to a received request
    ///
    /// Addressing fields are mirrored from the request: the requester
    /// becomes the destination, the LUNs swap sides, and the sequence
    /// number and command are copied so the peer can pair the exchange.
    /// The net function gains the response parity bit.
    ///
    /// # Arguments
    ///
    /// * `request` - The request being answered
    /// * `completion_code` - Completion code byte
    /// * `data` - Response payload (max 24 bytes)
    ///
    /// # Errors
    ///
    /// Returns [`IpmbError::InvalidRequest`] when `request` is not actually
    /// a request or the response payload exceeds the frame bound
    pub fn response_to(request: &IpmiMessage, completion_code: u8, data: Vec<u8>) -> Result<Self> {
        if request.is_response() {
            return Err(IpmbError::InvalidRequest(
                "cannot respond to a response".to_string(),
            ));
        }

        let msg = Self {
            dest_addr: request.src_addr,
            netfn: request.netfn | 0x01,
            dest_lun: request.src_lun,
            src_addr: request.dest_addr,
            seq: request.seq,
            src_lun: request.dest_lun,
            cmd: request.cmd,
            completion_code: Some(completion_code),
            data,
        };
        msg.validate()?;
        Ok(msg)
    }

    /// Whether the net function parity marks this message as a response
    pub fn is_response(&self) -> bool {
        self.netfn & 0x01 != 0
    }

    /// Connection header length for this message's direction
    pub fn header_len(&self) -> usize {
        if self.is_response() {
            IPMB_RESP_HEADER_LENGTH
        } else {
            IPMB_REQ_HEADER_LENGTH
        }
    }

    /// Frame length this message encodes to (header + payload + checksum)
    pub fn frame_len(&self) -> usize {
        self.header_len() + self.data.len() + 1
    }

    /// Largest payload that still fits the frame bound for this direction
    pub fn max_data_len(&self) -> usize {
        IPMB_MSG_MAX_LENGTH - self.header_len() - 1
    }

    /// Check every structural constraint of the message
    ///
    /// # Errors
    ///
    /// Returns [`IpmbError::InvalidRequest`] naming the violated constraint:
    /// field wider than its wire width, odd slave address, completion code
    /// present on a request (or missing from a response), or payload pushing
    /// the frame past 32 bytes.
    pub fn validate(&self) -> Result<()> {
        if self.netfn > NETFN_MAX {
            return Err(IpmbError::InvalidRequest(format!(
                "netfn 0x{:02X} exceeds 6 bits",
                self.netfn
            )));
        }
        if self.seq > SEQUENCE_MAX {
            return Err(IpmbError::InvalidRequest(format!(
                "sequence 0x{:02X} exceeds 6 bits",
                self.seq
            )));
        }
        if self.dest_lun > LUN_MAX || self.src_lun > LUN_MAX {
            return Err(IpmbError::InvalidRequest("LUN exceeds 2 bits".to_string()));
        }
        if self.dest_addr & 0x01 != 0 {
            return Err(IpmbError::InvalidRequest(format!(
                "destination address 0x{:02X} is not a 7-bit slave address",
                self.dest_addr
            )));
        }
        if self.completion_code.is_some() != self.is_response() {
            return Err(IpmbError::InvalidRequest(
                "completion code present iff message is a response".to_string(),
            ));
        }
        if self.data.len() > self.max_data_len() {
            return Err(IpmbError::InvalidRequest(format!(
                "payload of {} bytes exceeds maximum {}",
                self.data.len(),
                self.max_data_len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_length_constants() {
        assert_eq!(IPMB_REQ_HEADER_LENGTH, 6);
        assert_eq!(IPMB_RESP_HEADER_LENGTH, 7);
        assert_eq!(IPMB_MSG_MAX_LENGTH, 32);
        assert_eq!(HEADER_CHECKSUM_POSITION, 2);
    }

    #[test]
    fn test_timing_constants() {
        assert_eq!(IPMB_MAX_RETRIES, 3);
        assert_eq!(IPMB_MSG_TIMEOUT_MS, 250);
        assert_eq!(CLIENT_NOTIFY_TIMEOUT_MS, 5);
        assert_eq!(IPMB_TXQUEUE_LEN, 5);
        assert_eq!(IPMB_CLIENT_QUEUE_LEN, 5);
    }

    #[test]
    fn test_request_constructor() {
        let msg = IpmiMessage::request(0x72, 0x06, 0x01, vec![0xAA, 0xBB]).unwrap();
        assert!(!msg.is_response());
        assert_eq!(msg.header_len(), IPMB_REQ_HEADER_LENGTH);
        assert_eq!(msg.frame_len(), 6 + 2 + 1);
        assert_eq!(msg.completion_code, None);
    }

    #[test]
    fn test_request_rejects_odd_netfn() {
        let result = IpmiMessage::request(0x72, 0x07, 0x01, vec![]);
        assert!(matches!(result, Err(IpmbError::InvalidRequest(_))));
    }

    #[test]
    fn test_request_rejects_odd_address() {
        let result = IpmiMessage::request(0x73, 0x06, 0x01, vec![]);
        assert!(matches!(result, Err(IpmbError::InvalidRequest(_))));
    }

    #[test]
    fn test_request_payload_bounds() {
        // 25 payload bytes exactly fill a 32-byte request frame
        assert!(IpmiMessage::request(0x72, 0x06, 0x01, vec![0u8; 25]).is_ok());
        assert!(matches!(
            IpmiMessage::request(0x72, 0x06, 0x01, vec![0u8; 26]),
            Err(IpmbError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_response_mirrors_request() {
        let mut req = IpmiMessage::request(0x72, 0x06, 0x01, vec![]).unwrap();
        req.src_addr = 0x20;
        req.seq = 0x15;
        req.dest_lun = 0;
        req.src_lun = 2;

        let resp = IpmiMessage::response_to(&req, COMPLETION_NORMAL, vec![0x01]).unwrap();
        assert!(resp.is_response());
        assert_eq!(resp.netfn, 0x07);
        assert_eq!(resp.dest_addr, 0x20);
        assert_eq!(resp.src_addr, 0x72);
        assert_eq!(resp.dest_lun, 2);
        assert_eq!(resp.src_lun, 0);
        assert_eq!(resp.seq, 0x15);
        assert_eq!(resp.cmd, 0x01);
        assert_eq!(resp.completion_code, Some(COMPLETION_NORMAL));
        assert_eq!(resp.header_len(), IPMB_RESP_HEADER_LENGTH);
    }

    #[test]
    fn test_response_payload_bounds() {
        let req = IpmiMessage::request(0x72, 0x06, 0x01, vec![]).unwrap();
        // The completion code byte costs a response one payload byte
        assert!(IpmiMessage::response_to(&req, 0x00, vec![0u8; 24]).is_ok());
        assert!(matches!(
            IpmiMessage::response_to(&req, 0x00, vec![0u8; 25]),
            Err(IpmbError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_response_to_response_rejected() {
        let req = IpmiMessage::request(0x72, 0x06, 0x01, vec![]).unwrap();
        let resp = IpmiMessage::response_to(&req, 0x00, vec![]).unwrap();
        assert!(IpmiMessage::response_to(&resp, 0x00, vec![]).is_err());
    }

    #[test]
    fn test_validate_field_widths() {
        let mut msg = IpmiMessage::request(0x72, 0x06, 0x01, vec![]).unwrap();

        msg.seq = 0x40;
        assert!(msg.validate().is_err());
        msg.seq = SEQUENCE_MAX;
        assert!(msg.validate().is_ok());

        msg.dest_lun = 4;
        assert!(msg.validate().is_err());
        msg.dest_lun = LUN_MAX;
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_validate_completion_code_parity() {
        let mut msg = IpmiMessage::request(0x72, 0x06, 0x01, vec![]).unwrap();
        msg.completion_code = Some(0x00);
        assert!(msg.validate().is_err());

        let req = IpmiMessage::request(0x72, 0x06, 0x01, vec![]).unwrap();
        let mut resp = IpmiMessage::response_to(&req, 0x00, vec![]).unwrap();
        resp.completion_code = None;
        assert!(resp.validate().is_err());
    }
}
