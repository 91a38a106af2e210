//! # FRU Inventory Module
//!
//! Loads the module's FRU inventory image at daemon init.
//!
//! The image is an opaque pre-built byte blob; nothing here interprets
//! its records. A source fills a caller-provided buffer once, and the
//! resulting [`Inventory`] is held for the daemon's lifetime.

use std::fs;
use std::path::PathBuf;

use tracing::info;

use crate::error::{IpmbError, Result};

/// Producer of the inventory image
///
/// Called exactly once at init with the configured buffer.
#[cfg_attr(test, mockall::automock)]
pub trait InventorySource {
    /// Fill `buffer` with the image and return the number of bytes
    /// written
    ///
    /// # Errors
    ///
    /// Returns [`IpmbError::Inventory`] when the image cannot be
    /// produced or does not fit the buffer
    fn build(&mut self, buffer: &mut [u8]) -> Result<usize>;
}

/// Inventory source reading a pre-built image file
#[derive(Debug, Clone)]
pub struct FileInventory {
    path: PathBuf,
}

impl FileInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl InventorySource for FileInventory {
    fn build(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let image = fs::read(&self.path).map_err(|e| {
            IpmbError::Inventory(format!("cannot read {}: {}", self.path.display(), e))
        })?;

        if image.is_empty() {
            return Err(IpmbError::Inventory(format!(
                "{} holds an empty image",
                self.path.display()
            )));
        }
        if image.len() > buffer.len() {
            return Err(IpmbError::Inventory(format!(
                "image of {} bytes exceeds the {} byte buffer",
                image.len(),
                buffer.len()
            )));
        }

        buffer[..image.len()].copy_from_slice(&image);
        Ok(image.len())
    }
}

/// The loaded inventory image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    data: Vec<u8>,
}

impl Inventory {
    /// Consume a source into an image of at most `buffer_len` bytes
    pub fn from_source(source: &mut dyn InventorySource, buffer_len: usize) -> Result<Self> {
        let mut buffer = vec![0u8; buffer_len];
        let len = source.build(&mut buffer)?;
        buffer.truncate(len);
        info!("Inventory image loaded ({} bytes)", len);
        Ok(Self { data: buffer })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
