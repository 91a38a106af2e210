//! # Transmit Worker
//!
//! Drains the shared outbound queue, frames messages, and drives the
//! bus writer. Failed writes are retried with the envelope reinserted
//! ahead of newer arrivals, so one message's retries never interleave
//! with traffic submitted after it.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::envelope::{Completion, Envelope, LastReceived, OutstandingRequest};
use super::LinkCounters;
use crate::buslog::{BusJournal, JournalEntry};
use crate::bus::transport::BusWriter;
use crate::error::IpmbError;
use crate::ipmb::encoder::encode_frame;
use crate::ipmb::protocol::IpmiMessage;

#[derive(Debug, Clone)]
pub(crate) struct TxSettings {
    pub(crate) max_retries: u8,
    pub(crate) response_timeout: Duration,
}

pub(crate) struct TxWorker<W> {
    pub(crate) writer: W,
    pub(crate) queue: mpsc::Receiver<Envelope>,
    /// Envelopes reinserted at the front after a failed write; drained
    /// before anything new is taken from the queue
    pub(crate) redo: VecDeque<Envelope>,
    pub(crate) outstanding: mpsc::Sender<OutstandingRequest>,
    pub(crate) last_received: watch::Receiver<Option<LastReceived>>,
    pub(crate) settings: TxSettings,
    pub(crate) counters: Arc<LinkCounters>,
    pub(crate) journal: Option<Arc<BusJournal>>,
}

impl<W: BusWriter> TxWorker<W> {
    pub(crate) async fn run(mut self) {
        while let Some(envelope) = self.next_envelope().await {
            self.process(envelope).await;
        }
        info!("Transmit worker stopped");
    }

    async fn next_envelope(&mut self) -> Option<Envelope> {
        if let Some(envelope) = self.redo.pop_front() {
            return Some(envelope);
        }
        self.queue.recv().await
    }

    async fn process(&mut self, envelope: Envelope) {
        // An outgoing response only makes sense while the request it
        // answers is still waiting; outside that window the peer has
        // moved on and the frame is not sent
        if envelope.msg.is_response() && !self.response_window_open(&envelope.msg) {
            debug!(
                "Dropping response seq=0x{:02X}, request window closed",
                envelope.msg.seq
            );
            self.counters.stale_responses.fetch_add(1, Ordering::Relaxed);
            if let Some(journal) = &self.journal {
                journal.record(JournalEntry::dropped_message(
                    "tx",
                    &envelope.msg,
                    "request window closed",
                ));
            }
            envelope.completion.fail(IpmbError::Timeout);
            return;
        }

        let frame = match encode_frame(&envelope.msg) {
            Ok(frame) => frame,
            Err(e) => {
                envelope.completion.fail(e);
                return;
            }
        };

        match self.writer.write_frame(&frame).await {
            Ok(()) => self.succeed(envelope).await,
            Err(e) => self.retry(envelope, e),
        }
    }

    fn response_window_open(&self, msg: &IpmiMessage) -> bool {
        match self.last_received.borrow().as_ref() {
            Some(record) => {
                record.seq == msg.seq
                    && record.received_at.elapsed() < self.settings.response_timeout
            }
            None => false,
        }
    }

    async fn succeed(&mut self, envelope: Envelope) {
        let Envelope {
            msg,
            retries,
            enqueued_at,
            completion,
        } = envelope;

        if retries > 0 {
            debug!("Write succeeded after {} retries", retries);
        }
        if let Some(journal) = &self.journal {
            journal.record(JournalEntry::sent(&msg, retries));
        }

        match completion {
            Completion::Request { written, responder } => {
                self.counters.requests_sent.fetch_add(1, Ordering::Relaxed);
                let record = OutstandingRequest {
                    seq: msg.seq,
                    sent_at: enqueued_at,
                    responder,
                };
                // Hand the pairing record to the receive worker before
                // the caller learns the write went out
                if self.outstanding.send(record).await.is_err() {
                    warn!("Receive worker gone, response matching unavailable");
                }
                let _ = written.send(Ok(()));
            }
            Completion::Response { written } => {
                self.counters.responses_sent.fetch_add(1, Ordering::Relaxed);
                let _ = written.send(Ok(()));
            }
        }
    }

    fn retry(&mut self, mut envelope: Envelope, err: std::io::Error) {
        envelope.retries += 1;
        if envelope.retries > self.settings.max_retries {
            warn!(
                "Giving up on seq=0x{:02X} after {} attempts: {}",
                envelope.msg.seq, envelope.retries, err
            );
            self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
            if let Some(journal) = &self.journal {
                journal.record(JournalEntry::dropped_message(
                    "tx",
                    &envelope.msg,
                    "write retries exhausted",
                ));
            }
            envelope.completion.fail(IpmbError::Io(err));
        } else {
            debug!(
                "Write failed (retry {} of {}), requeueing at front: {}",
                envelope.retries, self.settings.max_retries, err
            );
            self.counters.write_retries.fetch_add(1, Ordering::Relaxed);
            self.redo.push_front(envelope);
        }
    }
}
