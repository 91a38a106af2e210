//! # Error Types
//!
//! Custom error types for the IPMB layer using `thiserror`.
//!
//! Protocol errors fall into two groups: inbound frame defects
//! ([`HeaderChecksum`](IpmbError::HeaderChecksum),
//! [`MessageChecksum`](IpmbError::MessageChecksum),
//! [`FrameLength`](IpmbError::FrameLength)) are logged and the frame is
//! dropped silently, as the protocol mandates for malformed traffic;
//! caller-facing errors ([`InvalidRequest`](IpmbError::InvalidRequest),
//! [`Timeout`](IpmbError::Timeout), [`Io`](IpmbError::Io)) are returned as
//! the terminal result of a send operation. None of them crash the process.

use thiserror::Error;

/// Main error type for the IPMB messaging layer
#[derive(Debug, Error)]
pub enum IpmbError {
    /// Header checksum of an inbound frame does not verify
    #[error("header checksum mismatch: expected 0x{expected:02X}, got 0x{got:02X}")]
    HeaderChecksum { expected: u8, got: u8 },

    /// Message checksum of an inbound frame does not verify
    #[error("message checksum mismatch: expected 0x{expected:02X}, got 0x{got:02X}")]
    MessageChecksum { expected: u8, got: u8 },

    /// Inbound frame shorter than a minimal header or longer than the protocol allows
    #[error("frame length {0} outside protocol bounds")]
    FrameLength(usize),

    /// Structurally invalid message rejected before it reaches the transmit queue
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No matching response arrived inside the timing window, or an outgoing
    /// response missed the window of the request it answers
    #[error("timed out waiting for the response window")]
    Timeout,

    /// Bus write failure that survived every retry
    #[error("bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Client registration failed at startup
    #[error("client queue creation failed: {0}")]
    QueueCreation(String),

    /// Bridge adapter communication errors outside normal frame I/O
    #[error("bridge error: {0}")]
    Bridge(String),

    /// No bridge adapter answered on any of the candidate device paths
    #[error("no bus bridge adapter found on: {0}")]
    BridgeNotFound(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Inventory image could not be consumed at init
    #[error("inventory image error: {0}")]
    Inventory(String),

    /// The link workers are gone; no further traffic is possible
    #[error("link shut down")]
    LinkDown,
}

/// Result type alias for the IPMB layer
pub type Result<T> = std::result::Result<T, IpmbError>;
