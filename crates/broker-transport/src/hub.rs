//! The async hub: an in-process, router/dealer-shaped channel pair that lets
//! asynchronous handlers exchange messages with the reactor without ever
//! blocking the dispatch loop.
//!
//! Realized with `tokio::sync::mpsc` rather than an in-process socket pair:
//! one unbounded channel per registered handler for the reactor-to-handler
//! direction (addressed by key, like a DEALER's identity), and a single
//! shared channel for the handler-to-reactor direction.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::message::Message;

/// Sentinel command frame asking an async handler task to stop.
pub const TERMINATE: &str = "__terminate__";

/// Reactor-side handle to the hub.
pub struct Hub {
    outbound: HashMap<String, mpsc::UnboundedSender<Message>>,
    inbound_tx: mpsc::UnboundedSender<Message>,
    inbound_rx: mpsc::UnboundedReceiver<Message>,
}

/// Handler-side handle, given to a spawned async handler task.
pub struct HubEndpoint {
    /// Messages addressed to this handler.
    pub inbound: mpsc::UnboundedReceiver<Message>,
    /// Channel back to the reactor's dispatch loop.
    pub outbound: mpsc::UnboundedSender<Message>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    /// Construct an empty hub.
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            outbound: HashMap::new(),
            inbound_tx,
            inbound_rx,
        }
    }

    /// Register a new async handler under `key`, returning its endpoint.
    pub fn register(&mut self, key: impl Into<String>) -> HubEndpoint {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound.insert(key.into(), tx);
        HubEndpoint {
            inbound: rx,
            outbound: self.inbound_tx.clone(),
        }
    }

    /// Whether an async handler is registered under `key`.
    pub fn has_handler(&self, key: &str) -> bool {
        self.outbound.contains_key(key)
    }

    /// Forward `message` to the handler registered under `message.key`.
    pub fn send(&self, key: &str, message: Message) -> anyhow::Result<()> {
        let tx = self
            .outbound
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("no async handler registered for key '{key}'"))?;
        tx.send(message)
            .map_err(|_| anyhow::anyhow!("async handler '{key}' has stopped"))
    }

    /// Receive the next message emitted by any async handler.
    pub async fn recv(&mut self) -> Option<Message> {
        self.inbound_rx.recv().await
    }

    /// Ask every registered handler to stop.
    pub fn terminate_all(&self) {
        for (key, tx) in &self.outbound {
            let _ = tx.send(Message::text(key.clone(), Vec::new(), &[TERMINATE]));
        }
    }
}
