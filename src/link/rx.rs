//! # Receive Worker
//!
//! Pulls frames off the bus reader, validates and parses them, filters
//! retransmitted requests, matches responses to the outstanding request,
//! and routes fresh requests to their registered client queue.
//!
//! Protocol rule honored throughout: malformed or unmatched traffic is
//! dropped quietly and service continues. Nothing received on the bus
//! can take the worker down.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use super::envelope::{LastReceived, OutstandingRequest};
use super::registry::ClientRegistry;
use super::LinkCounters;
use crate::bus::transport::BusReader;
use crate::buslog::{BusJournal, JournalEntry};
use crate::ipmb::decoder::decode_frame;
use crate::ipmb::protocol::IpmiMessage;

#[derive(Debug, Clone)]
pub(crate) struct RxSettings {
    pub(crate) response_timeout: Duration,
    pub(crate) dedup_window: Duration,
    pub(crate) notify_timeout: Duration,
}

pub(crate) struct RxWorker<R> {
    pub(crate) reader: R,
    pub(crate) registry: ClientRegistry,
    /// Pairing records handed over by the transmit worker
    pub(crate) outstanding_rx: mpsc::Receiver<OutstandingRequest>,
    pub(crate) outstanding: Option<OutstandingRequest>,
    pub(crate) last_received: Option<LastReceived>,
    pub(crate) last_received_tx: watch::Sender<Option<LastReceived>>,
    pub(crate) own_address: u8,
    pub(crate) settings: RxSettings,
    pub(crate) counters: Arc<LinkCounters>,
    pub(crate) journal: Option<Arc<BusJournal>>,
}

impl<R: BusReader> RxWorker<R> {
    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                frame = self.reader.read_frame() => {
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(e) => {
                            error!("Bus read failed, receive worker stopping: {}", e);
                            break;
                        }
                    };
                    self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
                    self.handle_frame(&frame).await;
                }
                // Consumed as they arrive; a quiet bus must never leave
                // the transmit worker waiting on the handoff
                Some(record) = self.outstanding_rx.recv() => {
                    self.accept_outstanding(record);
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: &[u8]) {
        let msg = match decode_frame(frame) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Dropping malformed frame: {}", e);
                self.counters.malformed_frames.fetch_add(1, Ordering::Relaxed);
                if let Some(journal) = &self.journal {
                    journal.record(JournalEntry::dropped_frame("rx", &e.to_string()));
                }
                return;
            }
        };

        // Traffic for other bus participants is normal; only frames
        // addressed to us go further
        if msg.dest_addr != self.own_address {
            trace!(
                "Ignoring frame for 0x{:02X} (own address 0x{:02X})",
                msg.dest_addr,
                self.own_address
            );
            self.counters.foreign_frames.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if msg.is_response() {
            self.handle_response(msg);
        } else {
            self.handle_request(msg).await;
        }
    }

    fn handle_response(&mut self, msg: IpmiMessage) {
        self.refresh_outstanding();

        match self.outstanding.take() {
            Some(record)
                if record.seq == msg.seq
                    && record.sent_at.elapsed() < self.settings.response_timeout =>
            {
                self.counters.responses_matched.fetch_add(1, Ordering::Relaxed);
                if let Some(journal) = &self.journal {
                    journal.record(JournalEntry::received(&msg));
                }
                if record.responder.send(msg).is_err() {
                    debug!("Requester gone before response delivery");
                }
            }
            Some(record) => {
                debug!(
                    "Discarding response seq=0x{:02X} (outstanding seq=0x{:02X})",
                    msg.seq, record.seq
                );
                self.counters
                    .responses_unmatched
                    .fetch_add(1, Ordering::Relaxed);
                if let Some(journal) = &self.journal {
                    journal.record(JournalEntry::dropped_message("rx", &msg, "no matching request"));
                }
                // The right response may still arrive; keep the record
                // while its window is open
                if record.sent_at.elapsed() < self.settings.response_timeout {
                    self.outstanding = Some(record);
                }
            }
            None => {
                debug!("Discarding response seq=0x{:02X}, nothing outstanding", msg.seq);
                self.counters
                    .responses_unmatched
                    .fetch_add(1, Ordering::Relaxed);
                if let Some(journal) = &self.journal {
                    journal.record(JournalEntry::dropped_message("rx", &msg, "no matching request"));
                }
            }
        }
    }

    fn accept_outstanding(&mut self, record: OutstandingRequest) {
        if let Some(previous) = self.outstanding.replace(record) {
            debug!("Superseding outstanding request seq=0x{:02X}", previous.seq);
        }
    }

    /// Drains any record that raced in between frame arrival and matching.
    fn refresh_outstanding(&mut self) {
        while let Ok(record) = self.outstanding_rx.try_recv() {
            self.accept_outstanding(record);
        }
    }

    async fn handle_request(&mut self, msg: IpmiMessage) {
        // A requester that saw no response in time re-sends the same
        // sequence number; the original is still in flight here, so the
        // copy is not delivered again
        if self.is_duplicate(&msg) {
            debug!(
                "Dropping duplicate request seq=0x{:02X} from 0x{:02X}",
                msg.seq, msg.src_addr
            );
            self.counters
                .duplicate_requests
                .fetch_add(1, Ordering::Relaxed);
            if let Some(journal) = &self.journal {
                journal.record(JournalEntry::dropped_message("rx", &msg, "duplicate"));
            }
            return;
        }

        let record = LastReceived {
            seq: msg.seq,
            src_addr: msg.src_addr,
            src_lun: msg.src_lun,
            received_at: Instant::now(),
        };
        self.last_received = Some(record.clone());
        // The transmit worker gates outgoing responses on this record
        self.last_received_tx.send_replace(Some(record));

        if let Some(journal) = &self.journal {
            journal.record(JournalEntry::received(&msg));
        }

        let Some(queue) = self.registry.route(msg.netfn) else {
            debug!("No client registered for netfn 0x{:02X}", msg.netfn);
            self.counters
                .unrouted_requests
                .fetch_add(1, Ordering::Relaxed);
            return;
        };

        match queue.send_timeout(msg, self.settings.notify_timeout).await {
            Ok(()) => {
                self.counters
                    .client_deliveries
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(SendTimeoutError::Timeout(msg)) => {
                warn!(
                    "Client queue full, dropping request seq=0x{:02X} netfn=0x{:02X}",
                    msg.seq, msg.netfn
                );
                self.counters
                    .client_queue_drops
                    .fetch_add(1, Ordering::Relaxed);
                if let Some(journal) = &self.journal {
                    journal.record(JournalEntry::dropped_message("rx", &msg, "client queue full"));
                }
            }
            Err(SendTimeoutError::Closed(msg)) => {
                warn!(
                    "Client queue closed, dropping request seq=0x{:02X} netfn=0x{:02X}",
                    msg.seq, msg.netfn
                );
                self.counters
                    .client_queue_drops
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn is_duplicate(&self, msg: &IpmiMessage) -> bool {
        match &self.last_received {
            Some(last) => {
                last.seq == msg.seq
                    && last.src_addr == msg.src_addr
                    && last.src_lun == msg.src_lun
                    && last.received_at.elapsed() < self.settings.dedup_window
            }
            None => false,
        }
    }
}
