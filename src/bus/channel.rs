//! In-process bus built on tokio channels.
//!
//! Signals go out on a `broadcast` channel that IPC connections subscribe
//! to; requests go to the per-endpoint `mpsc` mailbox a client connection
//! attached when it registered.

use std::collections::HashMap;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{Bus, ClientRequest, Mailbox, Signal};
use crate::{AppError, Result};

/// Default number of buffered signals per subscriber.
pub const SIGNAL_CAPACITY: usize = 256;

/// Channel-backed [`Bus`].
pub struct ChannelBus {
    signals: broadcast::Sender<Signal>,
    mailboxes: HashMap<String, Mailbox>,
}

impl ChannelBus {
    /// Create a bus buffering up to `capacity` signals per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (signals, _) = broadcast::channel(capacity.max(1));
        Self {
            signals,
            mailboxes: HashMap::new(),
        }
    }

    /// Sender handle used to subscribe observers.
    #[must_use]
    pub fn signal_sender(&self) -> broadcast::Sender<Signal> {
        self.signals.clone()
    }

    /// Subscribe to signals.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.signals.subscribe()
    }

    /// Number of attached endpoints.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.mailboxes.len()
    }
}

impl Default for ChannelBus {
    fn default() -> Self {
        Self::new(SIGNAL_CAPACITY)
    }
}

impl Bus for ChannelBus {
    fn emit(&mut self, signal: Signal) {
        debug!(?signal, "emit");
        // No subscribers is not an error for a broadcast.
        let _ = self.signals.send(signal);
    }

    fn call(&mut self, endpoint: &str, request: ClientRequest) -> Result<()> {
        let Some(mailbox) = self.mailboxes.get(endpoint) else {
            return Err(AppError::Delivery(format!(
                "no client attached at endpoint {endpoint}"
            )));
        };

        if mailbox.send(request).is_err() {
            warn!(endpoint, "client mailbox closed");
            self.mailboxes.remove(endpoint);
            return Err(AppError::Delivery(format!(
                "client at endpoint {endpoint} is gone"
            )));
        }
        Ok(())
    }

    fn attach(&mut self, endpoint: &str, mailbox: Mailbox) {
        self.mailboxes.insert(endpoint.to_owned(), mailbox);
    }

    fn detach(&mut self, endpoint: &str) {
        self.mailboxes.remove(endpoint);
    }
}
