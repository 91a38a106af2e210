//! # MMC IPMB Daemon
//!
//! IPMB messaging service for a MicroTCA module management controller.
//!
//! This daemon connects to the management bus through a serial bridge
//! adapter, resolves the module's own bus address, and runs the link
//! workers. A built-in responder answers inbound requests; an optional
//! heartbeat request is sent to the shelf manager periodically.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use mmc_ipmb::bus::SerialBridge;
use mmc_ipmb::buslog::BusJournal;
use mmc_ipmb::config::Config;
use mmc_ipmb::fru::{FileInventory, Inventory};
use mmc_ipmb::ipmb::address::{resolve_own_address, FixedStraps, INVALID_BUS_ADDRESS};
use mmc_ipmb::ipmb::protocol::{IpmiMessage, COMPLETION_NORMAL};
use mmc_ipmb::link::registry::ClientRegistry;
use mmc_ipmb::link::IpmbLink;

/// Configuration file used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// File name prefix for the daily-rolling daemon log
const LOG_FILE_PREFIX: &str = "mmc-ipmb.log";

/// Identify command answered with a device block by the responder
const CMD_GET_DEVICE_ID: u8 = 0x01;

/// Device identification block returned for the identify command
fn device_id_body() -> Vec<u8> {
    vec![
        0x0A, // device id
        0x02, // device revision
        0x01, 0x00, // firmware revision
        0x02, // ipmi version
        0x1F, // additional device support
        0x5A, 0x31, 0x00, // manufacturer id
        0x00, 0x00, // product id
    ]
}

/// Completion code and payload for one inbound request
fn answer(request: &IpmiMessage) -> (u8, Vec<u8>) {
    match request.cmd {
        CMD_GET_DEVICE_ID => (COMPLETION_NORMAL, device_id_body()),
        _ => (COMPLETION_NORMAL, Vec::new()),
    }
}

/// Initialize tracing from the log section
///
/// Console output by default; a daily-rolling file when a directory is
/// configured. The returned guard must stay alive for the file writer
/// to flush.
fn init_tracing(config: &Config) -> Result<Option<WorkerGuard>> {
    let directive: tracing_subscriber::filter::Directive = config
        .log
        .level
        .parse()
        .with_context(|| format!("invalid log level '{}'", config.log.level))?;
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(directive);

    if config.log.dir.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        Ok(None)
    } else {
        let appender = tracing_appender::rolling::daily(&config.log.dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Ok(Some(guard))
    }
}

/// Main entry point for the MMC IPMB daemon
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load and validate the configuration
///    - Set up logging with tracing subscriber
///    - Open the serial bridge to the management bus
///    - Resolve the own bus address (GA straps or fixed)
///    - Load the FRU inventory image when configured
///    - Register the responder client and spawn the link workers
///
/// 2. **Main Loop**
///    - Answer each inbound request with a normal completion
///    - Send the heartbeat request to the shelf manager when enabled
///    - Handle Ctrl+C for graceful shutdown
///
/// 3. **Graceful Shutdown**
///    - Log the link traffic counters
///    - Drain the transmit worker and stop the receive worker
///
/// # Errors
///
/// Returns error if:
/// - The configuration cannot be loaded or fails validation
/// - No bridge adapter is found on the configured device paths
/// - The GA straps resolve to no valid bus address
///
/// # Examples
///
/// Run the daemon:
/// ```bash
/// cargo run --release -- config/default.toml
/// ```
///
/// Expected output:
/// ```text
/// INFO mmc_ipmb: MMC IPMB v0.1.0 starting...
/// INFO mmc_ipmb::bus: Successfully opened bridge adapter at /dev/ttyACM0
/// INFO mmc_ipmb: Own bus address 0x72 (geographic mode)
/// INFO mmc_ipmb::link: IPMB link up, own address 0x72
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    let _log_guard = init_tracing(&config)?;

    info!("MMC IPMB v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_path);

    // Open the bus bridge
    let bridge = SerialBridge::open_with_paths(&config.bus.device_paths, config.bus.baud_rate)?;
    info!("Bridge adapter opened at: {}", bridge.device_path());

    // The own address is resolved once and never changes afterwards
    let own_address = match config.addressing.mode.as_str() {
        "fixed" => config.addressing.fixed_address,
        _ => {
            let mut straps = FixedStraps::new(config.ga_straps());
            let address = resolve_own_address(&mut straps);
            if address == INVALID_BUS_ADDRESS {
                bail!("GA straps resolve to no valid bus address");
            }
            address
        }
    };
    info!(
        "Own bus address 0x{:02X} ({} mode)",
        own_address, config.addressing.mode
    );

    // Load the inventory image if configured
    let inventory = if config.inventory.path.is_empty() {
        None
    } else {
        let mut source = FileInventory::new(&config.inventory.path);
        Some(Inventory::from_source(&mut source, config.inventory.buffer_len)?)
    };
    if let Some(inventory) = &inventory {
        info!("FRU inventory ready ({} bytes)", inventory.len());
    }

    // Register the responder before the workers spawn
    let mut registry = ClientRegistry::new();
    let mut requests = registry.register(
        "responder",
        &[config.client.netfn],
        config.queues.client_depth,
    )?;

    let journal = if config.trace.enabled {
        Some(Arc::new(BusJournal::create(
            &config.trace.log_dir,
            config.trace.max_records_per_file,
            config.trace.max_files_to_keep,
        )?))
    } else {
        None
    };

    let (writer, reader) = bridge.split();
    let link = IpmbLink::spawn(
        writer,
        reader,
        registry,
        config.link_settings(own_address),
        journal,
    );

    let mut heartbeat = interval(Duration::from_millis(config.manager.heartbeat_interval_ms));
    if config.manager.heartbeat_enabled {
        info!(
            "Heartbeat to manager 0x{:02X} every {} ms",
            config.manager.address, config.manager.heartbeat_interval_ms
        );
    }
    info!("Press Ctrl+C to exit");

    let mut answered: u64 = 0;

    // Main service loop
    loop {
        tokio::select! {
            // Answer inbound requests from the registered queue
            Some(request) = requests.recv() => {
                debug!(
                    "Request netfn=0x{:02X} cmd=0x{:02X} from 0x{:02X}",
                    request.netfn, request.cmd, request.src_addr
                );

                let (code, body) = answer(&request);
                match link.send_response(&request, code, body).await {
                    Ok(()) => answered += 1,
                    Err(e) => warn!("Failed to answer request: {}", e),
                }
            }

            // Periodic opaque request to the shelf manager
            _ = heartbeat.tick(), if config.manager.heartbeat_enabled => {
                let msg = IpmiMessage::request(
                    config.manager.address,
                    config.manager.heartbeat_netfn,
                    config.manager.heartbeat_cmd,
                    Vec::new(),
                )?;

                match link.send_request(msg).await {
                    Ok(response) => debug!(
                        "Heartbeat answered, completion code 0x{:02X}",
                        response.completion_code.unwrap_or(0)
                    ),
                    Err(e) => warn!(
                        "Heartbeat to 0x{:02X} failed: {}",
                        config.manager.address, e
                    ),
                }
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    info!("Requests answered: {}", answered);
    info!("Link counters at shutdown: {:?}", link.counters());
    link.shutdown().await;

    Ok(())
}
