//! Trait abstractions over the bus adapter to enable testing

use async_trait::async_trait;
use std::io;

/// Outbound side of the bus adapter
///
/// One call writes one complete message frame; delimiting and flushing
/// are the implementation's concern. The transmit worker drives this
/// and counts each failed call as one delivery attempt.
#[async_trait]
pub trait BusWriter: Send {
    /// Write one frame to the bus
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// Inbound side of the bus adapter
///
/// Yields complete frames, already stripped of any transport delimiting.
/// The call parks until a frame arrives.
#[async_trait]
pub trait BusReader: Send {
    /// Read the next complete frame from the bus
    async fn read_frame(&mut self) -> io::Result<Vec<u8>>;
}
