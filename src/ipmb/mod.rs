//! # IPMB Protocol Module
//!
//! Wire-level implementation of the IPMB request/response protocol.
//!
//! This module handles:
//! - Message framing with connection header and trailing checksum
//! - Two's complement checksum calculation and verification
//! - Frame parsing with ordered length and checksum checks
//! - Own bus address resolution from geographic addressing pins

pub mod address;
pub mod checksum;
pub mod decoder;
pub mod encoder;
pub mod protocol;
