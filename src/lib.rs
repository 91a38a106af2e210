//! # MMC IPMB Library
//!
//! IPMB messaging core for a MicroTCA module management controller.
//!
//! This library provides the request/response engine an AMC module uses
//! to talk to its shelf manager: framing and checksums, sequence-number
//! pairing with retry and timeout, geographic address resolution, and
//! bounded delivery to registered client tasks.

pub mod config;
pub mod error;
pub mod ipmb;
pub mod link;
pub mod bus;
pub mod buslog;
pub mod fru;
