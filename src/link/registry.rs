//! # Client Registry
//!
//! Maps net functions to the inbound queue of the client that handles
//! them. Registration happens once at startup, before the link workers
//! spawn; the whole registry then moves into the receive worker, so no
//! locking is needed at routing time.

use tokio::sync::mpsc;
use tracing::info;

use crate::error::{IpmbError, Result};
use crate::ipmb::protocol::{IpmiMessage, NETFN_MAX};

/// Fixed upper bound on registered clients
pub const MAX_CLIENTS: usize = 8;

#[derive(Debug)]
struct ClientSlot {
    name: String,
    netfns: Vec<u8>,
    queue: mpsc::Sender<IpmiMessage>,
}

/// Startup-time table of request consumers
///
/// There is no unregistration: the set of consumers is fixed for the
/// controller's lifetime.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    slots: Vec<ClientSlot>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Register a client for a set of request net functions
    ///
    /// Creates the client's bounded inbound queue and returns its
    /// receiving half. Requests whose net function matches one of
    /// `netfns` are delivered on it.
    ///
    /// # Arguments
    ///
    /// * `name` - Client name, used in logs and error messages
    /// * `netfns` - Request net functions (even values) this client handles
    /// * `queue_depth` - Capacity of the client's inbound queue
    ///
    /// # Errors
    ///
    /// Returns [`IpmbError::QueueCreation`] when the client limit is
    /// reached, a net function is invalid or already claimed, or the
    /// requested queue is degenerate
    pub fn register(
        &mut self,
        name: &str,
        netfns: &[u8],
        queue_depth: usize,
    ) -> Result<mpsc::Receiver<IpmiMessage>> {
        if self.slots.len() >= MAX_CLIENTS {
            return Err(IpmbError::QueueCreation(format!(
                "client limit of {} reached",
                MAX_CLIENTS
            )));
        }
        if netfns.is_empty() {
            return Err(IpmbError::QueueCreation(format!(
                "client {} claims no net functions",
                name
            )));
        }
        if queue_depth == 0 {
            return Err(IpmbError::QueueCreation(format!(
                "client {} requested a zero-depth queue",
                name
            )));
        }

        for &netfn in netfns {
            if netfn > NETFN_MAX || netfn & 0x01 != 0 {
                return Err(IpmbError::QueueCreation(format!(
                    "client {} claims invalid request netfn 0x{:02X}",
                    name, netfn
                )));
            }
            if let Some(owner) = self.owner_of(netfn) {
                return Err(IpmbError::QueueCreation(format!(
                    "netfn 0x{:02X} already registered by {}",
                    netfn, owner
                )));
            }
        }

        let (tx, rx) = mpsc::channel(queue_depth);
        info!(
            "Registered client {} for netfns {:02X?} (queue depth {})",
            name, netfns, queue_depth
        );
        self.slots.push(ClientSlot {
            name: name.to_string(),
            netfns: netfns.to_vec(),
            queue: tx,
        });
        Ok(rx)
    }

    fn owner_of(&self, netfn: u8) -> Option<&str> {
        self.slots
            .iter()
            .find(|slot| slot.netfns.contains(&netfn))
            .map(|slot| slot.name.as_str())
    }

    /// Queue of the client handling `netfn`, if any is registered
    pub(crate) fn route(&self, netfn: u8) -> Option<&mpsc::Sender<IpmiMessage>> {
        self.slots
            .iter()
            .find(|slot| slot.netfns.contains(&netfn))
            .map(|slot| &slot.queue)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
