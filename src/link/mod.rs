//! # IPMB Link Module
//!
//! The request/response engine on top of the bus bridge.
//!
//! This module handles:
//! - The shared bounded outbound queue and the transmit worker draining it
//! - The receive worker parsing, filtering, and routing inbound frames
//! - Sequence number assignment and response pairing
//! - The client-facing send API with retry, timeout, and completion
//!   semantics
//!
//! Two long-lived workers own all mutable protocol state; callers talk
//! to them exclusively through queues and one-shot completions, so the
//! protocol logic itself needs no locks.

pub mod registry;

mod envelope;
mod rx;
mod tx;

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tracing::{debug, info};

use crate::bus::transport::{BusReader, BusWriter};
use crate::buslog::BusJournal;
use crate::error::{IpmbError, Result};
use crate::ipmb::protocol::{
    IpmiMessage, CLIENT_NOTIFY_TIMEOUT_MS, IPMB_MAX_RETRIES, IPMB_MSG_TIMEOUT_MS,
    IPMB_TXQUEUE_LEN, SEQUENCE_MAX,
};
use envelope::Envelope;
use registry::ClientRegistry;
use rx::{RxSettings, RxWorker};
use tx::{TxSettings, TxWorker};

/// Tunable parameters of one link instance
///
/// Defaults follow the protocol timing constants; configuration may
/// override them within validated bounds.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Own bus address, stamped into every outgoing message
    pub own_address: u8,
    /// Retry budget after the first failed write attempt
    pub max_retries: u8,
    /// Request/response pairing window
    pub response_timeout: Duration,
    /// Window in which a repeated (seq, source) request is a retransmission
    pub dedup_window: Duration,
    /// Bounded wait when handing a request to a full client queue
    pub notify_timeout: Duration,
    /// Depth of the shared outbound queue
    pub tx_queue_depth: usize,
}

impl LinkSettings {
    pub fn new(own_address: u8) -> Self {
        Self {
            own_address,
            max_retries: IPMB_MAX_RETRIES,
            response_timeout: Duration::from_millis(IPMB_MSG_TIMEOUT_MS),
            dedup_window: Duration::from_millis(IPMB_MSG_TIMEOUT_MS),
            notify_timeout: Duration::from_millis(CLIENT_NOTIFY_TIMEOUT_MS),
            tx_queue_depth: IPMB_TXQUEUE_LEN,
        }
    }
}

/// Traffic counters shared by both workers
///
/// Plain relaxed atomics; read via [`LinkCounters::snapshot`].
#[derive(Debug, Default)]
pub struct LinkCounters {
    pub requests_sent: AtomicU64,
    pub responses_sent: AtomicU64,
    pub write_retries: AtomicU64,
    pub write_failures: AtomicU64,
    pub stale_responses: AtomicU64,
    pub frames_received: AtomicU64,
    pub malformed_frames: AtomicU64,
    pub foreign_frames: AtomicU64,
    pub duplicate_requests: AtomicU64,
    pub responses_matched: AtomicU64,
    pub responses_unmatched: AtomicU64,
    pub unrouted_requests: AtomicU64,
    pub client_deliveries: AtomicU64,
    pub client_queue_drops: AtomicU64,
}

/// Point-in-time copy of [`LinkCounters`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub requests_sent: u64,
    pub responses_sent: u64,
    pub write_retries: u64,
    pub write_failures: u64,
    pub stale_responses: u64,
    pub frames_received: u64,
    pub malformed_frames: u64,
    pub foreign_frames: u64,
    pub duplicate_requests: u64,
    pub responses_matched: u64,
    pub responses_unmatched: u64,
    pub unrouted_requests: u64,
    pub client_deliveries: u64,
    pub client_queue_drops: u64,
}

impl LinkCounters {
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
            write_retries: self.write_retries.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            stale_responses: self.stale_responses.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            foreign_frames: self.foreign_frames.load(Ordering::Relaxed),
            duplicate_requests: self.duplicate_requests.load(Ordering::Relaxed),
            responses_matched: self.responses_matched.load(Ordering::Relaxed),
            responses_unmatched: self.responses_unmatched.load(Ordering::Relaxed),
            unrouted_requests: self.unrouted_requests.load(Ordering::Relaxed),
            client_deliveries: self.client_deliveries.load(Ordering::Relaxed),
            client_queue_drops: self.client_queue_drops.load(Ordering::Relaxed),
        }
    }
}

/// Rolling sequence numbers are 6 bits wide; 64 divides the u8 range,
/// so the masked counter cycles through every value without bias
fn next_sequence(counter: &AtomicU8) -> u8 {
    counter.fetch_add(1, Ordering::Relaxed) & SEQUENCE_MAX
}

/// Handle to a running IPMB link
///
/// Spawning a link starts its transmit and receive workers; the handle
/// is the only way in. Clients hold it behind an `Arc` and call
/// [`send_request`](IpmbLink::send_request) and
/// [`send_response`](IpmbLink::send_response).
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use mmc_ipmb::bus::SerialBridge;
/// use mmc_ipmb::ipmb::protocol::COMPLETION_NORMAL;
/// use mmc_ipmb::link::registry::ClientRegistry;
/// use mmc_ipmb::link::{IpmbLink, LinkSettings};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let (writer, reader) = SerialBridge::open()?.split();
///
///     let mut registry = ClientRegistry::new();
///     let mut app = registry.register("app", &[0x06], 5)?;
///
///     let link = Arc::new(IpmbLink::spawn(
///         writer,
///         reader,
///         registry,
///         LinkSettings::new(0x72),
///         None,
///     ));
///
///     while let Some(request) = app.recv().await {
///         link.send_response(&request, COMPLETION_NORMAL, vec![]).await?;
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct IpmbLink {
    tx_queue: mpsc::Sender<Envelope>,
    /// Serializes requests: held across the whole response window so a
    /// second request cannot make pairing ambiguous
    request_window: Mutex<()>,
    next_seq: AtomicU8,
    own_address: u8,
    response_timeout: Duration,
    counters: Arc<LinkCounters>,
    tx_task: JoinHandle<()>,
    rx_task: JoinHandle<()>,
}

impl IpmbLink {
    /// Start the link workers over a bus writer/reader pair
    ///
    /// The registry moves into the receive worker; all clients must be
    /// registered before this call.
    pub fn spawn<W, R>(
        writer: W,
        reader: R,
        registry: ClientRegistry,
        settings: LinkSettings,
        journal: Option<Arc<BusJournal>>,
    ) -> Self
    where
        W: BusWriter + 'static,
        R: BusReader + 'static,
    {
        let (tx_queue, queue_rx) = mpsc::channel(settings.tx_queue_depth);
        let (outstanding_tx, outstanding_rx) = mpsc::channel(settings.tx_queue_depth);
        let (last_received_tx, last_received_rx) = watch::channel(None);
        let counters = Arc::new(LinkCounters::default());

        let tx_worker = TxWorker {
            writer,
            queue: queue_rx,
            redo: std::collections::VecDeque::new(),
            outstanding: outstanding_tx,
            last_received: last_received_rx,
            settings: TxSettings {
                max_retries: settings.max_retries,
                response_timeout: settings.response_timeout,
            },
            counters: counters.clone(),
            journal: journal.clone(),
        };

        let rx_worker = RxWorker {
            reader,
            registry,
            outstanding_rx,
            outstanding: None,
            last_received: None,
            last_received_tx,
            own_address: settings.own_address,
            settings: RxSettings {
                response_timeout: settings.response_timeout,
                dedup_window: settings.dedup_window,
                notify_timeout: settings.notify_timeout,
            },
            counters: counters.clone(),
            journal,
        };

        info!(
            "IPMB link up, own address 0x{:02X}",
            settings.own_address
        );

        Self {
            tx_queue,
            request_window: Mutex::new(()),
            next_seq: AtomicU8::new(0),
            own_address: settings.own_address,
            response_timeout: settings.response_timeout,
            counters,
            tx_task: tokio::spawn(tx_worker.run()),
            rx_task: tokio::spawn(rx_worker.run()),
        }
    }

    /// Own bus address this link stamps into outgoing messages
    pub fn own_address(&self) -> u8 {
        self.own_address
    }

    /// Current traffic counters
    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    /// Send a request and wait for its matched response
    ///
    /// Stamps the source address and the next sequence number, then
    /// blocks until the response arrives or the pairing window closes.
    /// Requests are serialized: a second concurrent call waits for the
    /// first window to finish before its message goes out.
    ///
    /// # Arguments
    ///
    /// * `msg` - Request to send; `src_addr` and `seq` are overwritten
    ///
    /// # Errors
    ///
    /// - [`IpmbError::InvalidRequest`] for a structurally invalid message
    ///   or one whose net function marks it a response
    /// - [`IpmbError::Io`] when the write failed after the full retry
    ///   budget
    /// - [`IpmbError::Timeout`] when no matched response arrived inside
    ///   the window
    /// - [`IpmbError::LinkDown`] when the workers are gone
    pub async fn send_request(&self, mut msg: IpmiMessage) -> Result<IpmiMessage> {
        if msg.is_response() {
            return Err(IpmbError::InvalidRequest(
                "send_request takes a request, not a response".to_string(),
            ));
        }
        msg.validate()?;

        let _window = self.request_window.lock().await;

        msg.src_addr = self.own_address;
        msg.seq = next_sequence(&self.next_seq);
        debug!(
            "Sending request netfn=0x{:02X} cmd=0x{:02X} seq=0x{:02X} to 0x{:02X}",
            msg.netfn, msg.cmd, msg.seq, msg.dest_addr
        );

        let (envelope, written, response) = Envelope::request(msg);
        let deadline = envelope.enqueued_at + self.response_timeout;

        // The enqueue counts against the window too; a backed-up queue
        // cannot hold the caller past its deadline
        match timeout_at(deadline, self.tx_queue.send(envelope)).await {
            Err(_) => return Err(IpmbError::Timeout),
            Ok(Err(_)) => return Err(IpmbError::LinkDown),
            Ok(Ok(())) => {}
        }

        // Terminal write outcome first; a write still retrying past the
        // response deadline can no longer be answered in time
        match timeout_at(deadline, written).await {
            Err(_) => return Err(IpmbError::Timeout),
            Ok(Err(_)) => return Err(IpmbError::LinkDown),
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Ok(Ok(()))) => {}
        }

        match timeout_at(deadline, response).await {
            Err(_) => Err(IpmbError::Timeout),
            Ok(Err(_)) => Err(IpmbError::Timeout),
            Ok(Ok(resp)) => Ok(resp),
        }
    }

    /// Send the response to a received request
    ///
    /// Builds the response by mirroring the request's addressing, stamps
    /// the own address, and blocks until the transmit worker reports a
    /// terminal outcome.
    ///
    /// # Arguments
    ///
    /// * `request` - The request being answered, as delivered by the link
    /// * `completion_code` - Completion code byte
    /// * `data` - Response payload
    ///
    /// # Errors
    ///
    /// - [`IpmbError::InvalidRequest`] when `request` is not a request or
    ///   the payload exceeds the frame bound
    /// - [`IpmbError::Timeout`] when the request's window already closed
    ///   and the frame was dropped unsent
    /// - [`IpmbError::Io`] when the write failed after the full retry
    ///   budget
    /// - [`IpmbError::LinkDown`] when the workers are gone
    pub async fn send_response(
        &self,
        request: &IpmiMessage,
        completion_code: u8,
        data: Vec<u8>,
    ) -> Result<()> {
        let mut msg = IpmiMessage::response_to(request, completion_code, data)?;
        msg.src_addr = self.own_address;
        debug!(
            "Sending response netfn=0x{:02X} cmd=0x{:02X} seq=0x{:02X} to 0x{:02X}",
            msg.netfn, msg.cmd, msg.seq, msg.dest_addr
        );

        let (envelope, written) = Envelope::response(msg);
        self.tx_queue
            .send(envelope)
            .await
            .map_err(|_| IpmbError::LinkDown)?;

        match written.await {
            Err(_) => Err(IpmbError::LinkDown),
            Ok(result) => result,
        }
    }

    /// Stop both workers and wait for them to finish
    ///
    /// The outbound queue is drained before the transmit worker exits;
    /// the receive worker is parked on the bus and gets aborted.
    pub async fn shutdown(self) {
        let IpmbLink {
            tx_queue,
            tx_task,
            rx_task,
            ..
        } = self;

        drop(tx_queue);
        let _ = tx_task.await;
        rx_task.abort();
        let _ = rx_task.await;
        info!("IPMB link shut down");
    }
}
