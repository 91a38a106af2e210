//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::ipmb::address::GaPinState;
use crate::ipmb::protocol::{
    CLIENT_NOTIFY_TIMEOUT_MS, IPMB_CLIENT_QUEUE_LEN, IPMB_MAX_RETRIES, IPMB_MSG_TIMEOUT_MS,
    IPMB_TXQUEUE_LEN, MCH_ADDRESS, NETFN_MAX,
};
use crate::link::LinkSettings;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub bus: BusConfig,
    pub addressing: AddressingConfig,
    pub timing: TimingConfig,
    pub queues: QueueConfig,
    pub manager: ManagerConfig,
    pub client: ClientConfig,
    pub inventory: InventoryConfig,
    pub trace: TraceConfig,
    pub log: LogConfig,
}

/// Bus bridge configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BusConfig {
    #[serde(default = "default_device_paths")]
    pub device_paths: Vec<String>,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Own-address configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AddressingConfig {
    /// "geographic" derives the address from the GA straps;
    /// "fixed" uses `fixed_address` directly
    #[serde(default = "default_addressing_mode")]
    pub mode: String,

    #[serde(default = "default_fixed_address")]
    pub fixed_address: u8,

    /// Strap states for the three GA pins, used in geographic mode
    #[serde(default = "default_ga_pins")]
    pub ga_pins: Vec<GaPinState>,
}

/// Protocol timing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TimingConfig {
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    #[serde(default = "default_client_notify_timeout_ms")]
    pub client_notify_timeout_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
}

/// Queue depth configuration
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_tx_depth")]
    pub tx_depth: usize,

    #[serde(default = "default_client_depth")]
    pub client_depth: usize,
}

/// Shelf manager configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ManagerConfig {
    #[serde(default = "default_manager_address")]
    pub address: u8,

    #[serde(default)]
    pub heartbeat_enabled: bool,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_heartbeat_netfn")]
    pub heartbeat_netfn: u8,

    #[serde(default = "default_heartbeat_cmd")]
    pub heartbeat_cmd: u8,
}

/// Daemon responder configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    #[serde(default = "default_client_netfn")]
    pub netfn: u8,
}

/// FRU inventory configuration
#[derive(Debug, Deserialize, Clone)]
pub struct InventoryConfig {
    /// Path to a pre-built inventory image; empty disables it
    #[serde(default)]
    pub path: String,

    #[serde(default = "default_inventory_buffer_len")]
    pub buffer_len: usize,
}

/// Bus journal configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TraceConfig {
    #[serde(default = "default_trace_enabled")]
    pub enabled: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

/// Daemon log configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for a daily-rolling log file; empty logs to the
    /// console only
    #[serde(default)]
    pub dir: String,
}

// Default value functions
fn default_device_paths() -> Vec<String> {
    vec!["/dev/ttyACM0".to_string(), "/dev/ttyUSB0".to_string()]
}
fn default_baud_rate() -> u32 { 115200 }

fn default_addressing_mode() -> String { "geographic".to_string() }
fn default_fixed_address() -> u8 { 0x72 }
fn default_ga_pins() -> Vec<GaPinState> { vec![GaPinState::Grounded; 3] }

fn default_response_timeout_ms() -> u64 { IPMB_MSG_TIMEOUT_MS }
fn default_client_notify_timeout_ms() -> u64 { CLIENT_NOTIFY_TIMEOUT_MS }
fn default_max_retries() -> u8 { IPMB_MAX_RETRIES }

fn default_tx_depth() -> usize { IPMB_TXQUEUE_LEN }
fn default_client_depth() -> usize { IPMB_CLIENT_QUEUE_LEN }

fn default_manager_address() -> u8 { MCH_ADDRESS }
fn default_heartbeat_interval_ms() -> u64 { 1000 }
fn default_heartbeat_netfn() -> u8 { 0x06 }
fn default_heartbeat_cmd() -> u8 { 0x01 }

fn default_client_netfn() -> u8 { 0x06 }

fn default_inventory_buffer_len() -> usize { 256 }

fn default_trace_enabled() -> bool { true }
fn default_log_dir() -> String { "./logs".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }

fn default_log_level() -> String { "info".to_string() }

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mmc_ipmb::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Returns
    ///
    /// * `Result<()>` - Ok if valid, Err if invalid
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        // Validate bus configuration
        if self.bus.device_paths.is_empty() {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("bus device_paths cannot be empty")
            ));
        }

        if self.bus.device_paths.iter().any(|p| p.is_empty()) {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("bus device_paths cannot contain empty entries")
            ));
        }

        if ![9600, 19200, 38400, 57600, 115200].contains(&self.bus.baud_rate) {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("baud_rate must be one of: 9600, 19200, 38400, 57600, 115200")
            ));
        }

        // Validate addressing configuration
        if self.addressing.mode != "geographic" && self.addressing.mode != "fixed" {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("addressing mode must be 'geographic' or 'fixed'")
            ));
        }

        if self.addressing.fixed_address == 0 || self.addressing.fixed_address & 0x01 != 0 {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("fixed_address must be an even, nonzero bus address")
            ));
        }

        if self.addressing.ga_pins.len() != 3 {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("ga_pins must list exactly three strap states")
            ));
        }

        // Validate timing fields
        if self.timing.response_timeout_ms == 0 || self.timing.response_timeout_ms > 10000 {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("response_timeout_ms must be between 1 and 10000")
            ));
        }

        if self.timing.client_notify_timeout_ms == 0 || self.timing.client_notify_timeout_ms > 1000 {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("client_notify_timeout_ms must be between 1 and 1000")
            ));
        }

        if self.timing.max_retries > 10 {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("max_retries must be at most 10")
            ));
        }

        // Validate queue depths
        if self.queues.tx_depth == 0 || self.queues.tx_depth > 64 {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("tx_depth must be between 1 and 64")
            ));
        }

        if self.queues.client_depth == 0 || self.queues.client_depth > 64 {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("client_depth must be between 1 and 64")
            ));
        }

        // Validate manager configuration
        if self.manager.address == 0 || self.manager.address & 0x01 != 0 {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("manager address must be an even, nonzero bus address")
            ));
        }

        if self.manager.heartbeat_interval_ms < 10 || self.manager.heartbeat_interval_ms > 60000 {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("heartbeat_interval_ms must be between 10 and 60000")
            ));
        }

        if self.manager.heartbeat_netfn > NETFN_MAX || self.manager.heartbeat_netfn & 0x01 != 0 {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("heartbeat_netfn must be an even request net function")
            ));
        }

        // Validate responder configuration
        if self.client.netfn > NETFN_MAX || self.client.netfn & 0x01 != 0 {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("client netfn must be an even request net function")
            ));
        }

        // Validate inventory configuration
        if self.inventory.buffer_len == 0 || self.inventory.buffer_len > 4096 {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("inventory buffer_len must be between 1 and 4096")
            ));
        }

        // Validate bus journal configuration
        if self.trace.enabled && self.trace.log_dir.is_empty() {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("trace log_dir cannot be empty when enabled")
            ));
        }

        if self.trace.max_records_per_file == 0 {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("max_records_per_file must be greater than 0")
            ));
        }

        if self.trace.max_files_to_keep == 0 {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("max_files_to_keep must be greater than 0")
            ));
        }

        // Validate log level
        if !["trace", "debug", "info", "warn", "error"].contains(&self.log.level.as_str()) {
            return Err(crate::error::IpmbError::Config(
                toml::de::Error::custom("log level must be one of: trace, debug, info, warn, error")
            ));
        }

        Ok(())
    }

    /// Link settings derived from the timing and queue sections
    ///
    /// The retransmission window equals the response window, so a
    /// request repeated after its response deadline counts as fresh.
    pub fn link_settings(&self, own_address: u8) -> LinkSettings {
        LinkSettings {
            own_address,
            max_retries: self.timing.max_retries,
            response_timeout: Duration::from_millis(self.timing.response_timeout_ms),
            dedup_window: Duration::from_millis(self.timing.response_timeout_ms),
            notify_timeout: Duration::from_millis(self.timing.client_notify_timeout_ms),
            tx_queue_depth: self.queues.tx_depth,
        }
    }

    /// GA strap states as the fixed-size array the resolver takes
    pub fn ga_straps(&self) -> [GaPinState; 3] {
        let mut straps = [GaPinState::Grounded; 3];
        for (slot, state) in straps.iter_mut().zip(&self.addressing.ga_pins) {
            *slot = *state;
        }
        straps
    }
}
