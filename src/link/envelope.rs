//! Outbound envelopes and the pairing records shared by the link workers

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{IpmbError, Result};
use crate::ipmb::protocol::IpmiMessage;

/// Completion channel back to the caller that submitted an envelope
///
/// The write outcome is always reported once. For a request the matched
/// response travels on its own channel afterwards, delivered by the
/// receive worker.
#[derive(Debug)]
pub(crate) enum Completion {
    Request {
        written: oneshot::Sender<Result<()>>,
        responder: oneshot::Sender<IpmiMessage>,
    },
    Response {
        written: oneshot::Sender<Result<()>>,
    },
}

impl Completion {
    /// Report a terminal failure, consuming the channel
    ///
    /// For a request this also drops the responder, which surfaces to
    /// the caller as the write error rather than a timeout.
    pub(crate) fn fail(self, err: IpmbError) {
        let written = match self {
            Completion::Request { written, .. } => written,
            Completion::Response { written } => written,
        };
        // Caller may have given up already; nothing left to notify then
        let _ = written.send(Err(err));
    }
}

/// One message queued for transmission
///
/// Created when a client submits a send, destroyed when the transmit
/// worker reaches a terminal outcome for it. The enqueue timestamp
/// anchors the response window for requests, so retries eat into the
/// same window instead of extending it.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) msg: IpmiMessage,
    pub(crate) retries: u8,
    pub(crate) enqueued_at: Instant,
    pub(crate) completion: Completion,
}

impl Envelope {
    /// Wrap a request, returning the caller's two receiving halves
    pub(crate) fn request(
        msg: IpmiMessage,
    ) -> (
        Self,
        oneshot::Receiver<Result<()>>,
        oneshot::Receiver<IpmiMessage>,
    ) {
        let (written_tx, written_rx) = oneshot::channel();
        let (responder_tx, responder_rx) = oneshot::channel();
        let envelope = Self {
            msg,
            retries: 0,
            enqueued_at: Instant::now(),
            completion: Completion::Request {
                written: written_tx,
                responder: responder_tx,
            },
        };
        (envelope, written_rx, responder_rx)
    }

    /// Wrap a response, returning the caller's write-outcome half
    pub(crate) fn response(msg: IpmiMessage) -> (Self, oneshot::Receiver<Result<()>>) {
        let (written_tx, written_rx) = oneshot::channel();
        let envelope = Self {
            msg,
            retries: 0,
            enqueued_at: Instant::now(),
            completion: Completion::Response {
                written: written_tx,
            },
        };
        (envelope, written_rx)
    }
}

/// Record of the last request sent on the bus, awaiting its response
///
/// Handed from the transmit worker to the receive worker after a
/// successful request write. The receive worker matches inbound
/// responses against it and answers through `responder`.
#[derive(Debug)]
pub(crate) struct OutstandingRequest {
    pub(crate) seq: u8,
    pub(crate) sent_at: Instant,
    pub(crate) responder: oneshot::Sender<IpmiMessage>,
}

/// Record of the most recently received request
///
/// Owned by the receive worker for retransmission dedup; published to
/// the transmit worker, which gates outgoing responses on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LastReceived {
    pub(crate) seq: u8,
    pub(crate) src_addr: u8,
    pub(crate) src_lun: u8,
    pub(crate) received_at: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> IpmiMessage {
        IpmiMessage::request(0x72, 0x06, 0x01, vec![]).unwrap()
    }

    #[tokio::test]
    async fn test_request_envelope_starts_fresh() {
        let (envelope, _written, _responder) = Envelope::request(sample_request());
        assert_eq!(envelope.retries, 0);
        assert!(matches!(envelope.completion, Completion::Request { .. }));
    }

    #[tokio::test]
    async fn test_fail_reaches_request_caller() {
        let (envelope, written, responder) = Envelope::request(sample_request());
        envelope.completion.fail(IpmbError::Timeout);

        assert!(matches!(written.await, Ok(Err(IpmbError::Timeout))));
        // Responder was dropped along with the completion
        assert!(responder.await.is_err());
    }

    #[tokio::test]
    async fn test_fail_reaches_response_caller() {
        let msg = IpmiMessage::response_to(&sample_request(), 0x00, vec![]).unwrap();
        let (envelope, written) = Envelope::response(msg);
        envelope.completion.fail(IpmbError::LinkDown);

        assert!(matches!(written.await, Ok(Err(IpmbError::LinkDown))));
    }

    #[tokio::test]
    async fn test_fail_tolerates_gone_caller() {
        let (envelope, written, _responder) = Envelope::request(sample_request());
        drop(written);
        // Must not panic when the caller stopped listening
        envelope.completion.fail(IpmbError::Timeout);
    }
}
