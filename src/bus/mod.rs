//! # Bus Bridge Module
//!
//! Talks to the IPMB bridge adapter over USB serial.
//!
//! This module handles:
//! - Opening the bridge serial port (115,200 baud unless configured otherwise)
//! - Byte-stuffed frame delimiting on the wire
//! - Reassembling frames from the inbound byte stream
//! - Splitting the port into independent writer and reader halves
//!
//! The wire encoding follows the serial basic-mode convention: a frame
//! travels as `START .. payload .. STOP`, and any payload byte that
//! collides with a delimiter is sent as `ESC` followed by the byte with
//! bit 4 flipped (0xA0 becomes 0xB0, 0xA5 becomes 0xB5, 0xAA becomes
//! 0xBA).

pub mod transport;

use std::collections::VecDeque;
use std::io;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, trace, warn};

use crate::error::{IpmbError, Result};
use crate::ipmb::protocol::IPMB_MSG_MAX_LENGTH;
use transport::{BusReader, BusWriter};

/// Bridge adapter baud rate
pub const BRIDGE_BAUD_RATE: u32 = 115_200;

/// Default bridge device paths to try (in order of preference)
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyACM0", // USB CDC adapters
    "/dev/ttyUSB0", // USB-to-serial adapters
];

/// Start-of-frame delimiter
pub const FRAME_START: u8 = 0xA0;

/// End-of-frame delimiter
pub const FRAME_STOP: u8 = 0xA5;

/// Escape prefix for payload bytes colliding with a delimiter
pub const FRAME_ESCAPE: u8 = 0xAA;

/// Escaped bytes travel with bit 4 flipped
const ESCAPE_XOR: u8 = 0x10;

fn needs_escape(byte: u8) -> bool {
    matches!(byte, FRAME_START | FRAME_STOP | FRAME_ESCAPE)
}

/// Wrap a message frame in delimiters, escaping payload collisions
///
/// # Arguments
///
/// * `frame` - Complete IPMB frame (checksums included)
///
/// # Returns
///
/// * `Vec<u8>` - Byte-stuffed wire image, ready to write
pub fn stuff_frame(frame: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(frame.len() + 2);
    wire.push(FRAME_START);
    for &byte in frame {
        if needs_escape(byte) {
            wire.push(FRAME_ESCAPE);
            wire.push(byte ^ ESCAPE_XOR);
        } else {
            wire.push(byte);
        }
    }
    wire.push(FRAME_STOP);
    wire
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccumulatorState {
    /// Waiting for a start delimiter; everything else is line noise
    Idle,
    /// Inside a frame, collecting unescaped payload
    Collecting,
    /// Saw the escape prefix, next byte is an escaped payload byte
    Escaped,
}

/// Incremental reassembler for the inbound byte stream
///
/// Feed it raw chunks as they arrive; complete de-stuffed frames come
/// back in order. Junk between frames, a peer restarting a frame
/// mid-way, an invalid escape pair, or a frame overrunning the protocol
/// maximum all cause a silent resync to the next start delimiter.
#[derive(Debug)]
pub struct FrameAccumulator {
    state: AccumulatorState,
    partial: BytesMut,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self {
            state: AccumulatorState::Idle,
            partial: BytesMut::with_capacity(IPMB_MSG_MAX_LENGTH),
        }
    }

    /// Consume a chunk of raw bytes, returning any frames it completed
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut complete = Vec::new();

        for &byte in bytes {
            match self.state {
                AccumulatorState::Idle => {
                    if byte == FRAME_START {
                        self.partial.clear();
                        self.state = AccumulatorState::Collecting;
                    }
                }
                AccumulatorState::Collecting => match byte {
                    FRAME_START => {
                        // Peer restarted the frame; keep only the new one
                        if !self.partial.is_empty() {
                            debug!(
                                "Discarding {} byte partial frame on restart",
                                self.partial.len()
                            );
                        }
                        self.partial.clear();
                    }
                    FRAME_STOP => {
                        if !self.partial.is_empty() {
                            complete.push(self.partial.split().to_vec());
                        }
                        self.state = AccumulatorState::Idle;
                    }
                    FRAME_ESCAPE => self.state = AccumulatorState::Escaped,
                    other => self.accept(other),
                },
                AccumulatorState::Escaped => {
                    let restored = byte ^ ESCAPE_XOR;
                    if needs_escape(restored) {
                        self.state = AccumulatorState::Collecting;
                        self.accept(restored);
                    } else {
                        debug!("Invalid escape pair 0x{:02X}, dropping frame", byte);
                        self.partial.clear();
                        self.state = AccumulatorState::Idle;
                    }
                }
            }
        }

        complete
    }

    fn accept(&mut self, byte: u8) {
        if self.partial.len() == IPMB_MSG_MAX_LENGTH {
            debug!("Frame exceeds protocol maximum, dropping");
            self.partial.clear();
            self.state = AccumulatorState::Idle;
            return;
        }
        self.partial.put_u8(byte);
    }
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// IPMB bridge adapter attached over USB serial
///
/// Owns the serial port until [`split`](SerialBridge::split) hands the
/// two halves to the transmit and receive workers.
pub struct SerialBridge {
    /// Serial port handle
    port: tokio_serial::SerialStream,
    /// Device path (e.g., /dev/ttyACM0)
    device_path: String,
}

impl std::fmt::Debug for SerialBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialBridge")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl SerialBridge {
    /// Open a connection to the bridge adapter
    ///
    /// Auto-detects the device by trying common paths.
    ///
    /// # Errors
    ///
    /// Returns an error if no bridge device is found or the port fails
    /// to configure
    pub fn open() -> Result<Self> {
        Self::open_with_paths(DEFAULT_DEVICE_PATHS, BRIDGE_BAUD_RATE)
    }

    /// Open a connection to the bridge adapter with custom device paths
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try (e.g., &["/dev/ttyACM0"])
    /// * `baud_rate` - Port speed in bits per second
    pub fn open_with_paths<S: AsRef<str>>(paths: &[S], baud_rate: u32) -> Result<Self> {
        for path in paths {
            let path = path.as_ref();
            debug!("Trying to open bridge port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Successfully opened bridge adapter at {}", path);
                    return Ok(Self {
                        port,
                        device_path: path.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        let tried: Vec<&str> = paths.iter().map(|p| p.as_ref()).collect();
        Err(IpmbError::BridgeNotFound(tried.join(", ")))
    }

    /// Open a specific serial port with bridge settings
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| IpmbError::Bridge(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// Split the bridge into its writer and reader halves
    ///
    /// The halves are independent; the transmit worker owns the writer
    /// and the receive worker owns the reader.
    pub fn split(self) -> (BridgeWriter, BridgeReader) {
        let (read_half, write_half) = tokio::io::split(self.port);
        (
            BridgeWriter { port: write_half },
            BridgeReader {
                port: read_half,
                accumulator: FrameAccumulator::new(),
                pending: VecDeque::new(),
            },
        )
    }
}

/// Writer half of a split [`SerialBridge`]
pub struct BridgeWriter {
    port: WriteHalf<tokio_serial::SerialStream>,
}

#[async_trait]
impl BusWriter for BridgeWriter {
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let wire = stuff_frame(frame);
        self.port.write_all(&wire).await?;
        self.port.flush().await?;
        trace!("Wrote frame ({} bytes on wire)", wire.len());
        Ok(())
    }
}

/// Reader half of a split [`SerialBridge`]
pub struct BridgeReader {
    port: ReadHalf<tokio_serial::SerialStream>,
    accumulator: FrameAccumulator,
    pending: VecDeque<Vec<u8>>,
}

#[async_trait]
impl BusReader for BridgeReader {
    async fn read_frame(&mut self) -> io::Result<Vec<u8>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }

            let mut chunk = [0u8; 64];
            let n = self.port.read(&mut chunk).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "bridge port closed",
                ));
            }
            self.pending.extend(self.accumulator.push(&chunk[..n]));
        }
    }
}
