//! Chat transport abstraction
//!
//! Pluggable boundary to whatever chat network the bot lives on:
//! ```text
//!         ┌──────────────────────┐
//!         │  ChatTransport Trait │  ◄── pluggable interface
//!         └─────────┬────────────┘
//!                   │
//!            ┌──────┴───────┐
//!            ▼              ▼
//!     (network binding)  MemoryTransport
//!                        (in-process, tests)
//! ```
//!
//! The server consumes inbound events and hands back notifications; it
//! never knows which network is behind the trait.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

use shared::{ChatId, InboundEvent, MessageId, Notification};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Transport closed")]
    Closed,
}

/// Chat network boundary
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Next inbound chat event; `None` when the transport has closed
    async fn next_event(&self) -> Option<InboundEvent>;

    /// Deliver a notification
    async fn deliver(&self, note: Notification) -> Result<(), TransportError>;

    /// Raw text of an already-delivered message, when the network keeps
    /// history. Post recovery uses this.
    async fn fetch_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<Option<String>, TransportError>;
}

// ============ Outbox ============

/// A queued notification, with an optional public fallback used when a
/// direct message bounces
#[derive(Debug, Clone)]
pub struct OutboundItem {
    pub note: Notification,
    pub fallback: Option<Notification>,
}

/// Handle for queueing notifications without awaiting delivery.
///
/// Senders never block and never see delivery errors; the worker logs
/// failures and applies fallbacks.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<OutboundItem>,
}

impl Outbox {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundItem>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn send(&self, note: Notification) {
        self.push(OutboundItem {
            note,
            fallback: None,
        });
    }

    /// Queue a direct message with a public reply to fall back on
    pub fn send_with_fallback(&self, note: Notification, fallback: Notification) {
        self.push(OutboundItem {
            note,
            fallback: Some(fallback),
        });
    }

    fn push(&self, item: OutboundItem) {
        if let Err(e) = self.tx.try_send(item) {
            tracing::warn!(error = %e, "Outbox full, dropping notification");
        }
    }
}

/// Drain the outbox into the transport until shutdown. Runs as a
/// background worker; a failed direct message falls back to its public
/// mirror, and nothing here is ever fatal.
pub async fn run_outbox(
    mut rx: mpsc::Receiver<OutboundItem>,
    transport: std::sync::Arc<dyn ChatTransport>,
    token: tokio_util::sync::CancellationToken,
) {
    loop {
        let item = tokio::select! {
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
            _ = token.cancelled() => break,
        };

        if let Err(e) = transport.deliver(item.note.clone()).await {
            tracing::warn!(error = %e, "Notification delivery failed");
            if let Some(fallback) = item.fallback
                && let Err(e) = transport.deliver(fallback).await
            {
                tracing::warn!(error = %e, "Fallback delivery failed too");
            }
        }
    }
}

// ============ In-process transport ============

/// In-process transport for tests and local runs.
///
/// Events are fed through [`MemoryTransport::inject`]; everything the
/// server says is recorded and inspectable.
pub struct MemoryTransport {
    inbound_tx: mpsc::Sender<InboundEvent>,
    inbound_rx: Mutex<mpsc::Receiver<InboundEvent>>,
    sent: parking_lot::Mutex<Vec<Notification>>,
    history: DashMap<(ChatId, MessageId), String>,
    /// Direct messages to these users fail, for DM-fallback tests
    undeliverable: DashMap<shared::UserId, ()>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            sent: parking_lot::Mutex::new(Vec::new()),
            history: DashMap::new(),
            undeliverable: DashMap::new(),
        }
    }

    /// Feed an inbound event, as if the network delivered it
    pub async fn inject(&self, event: InboundEvent) {
        self.history
            .insert((event.chat_id, event.message_id), event.text.clone());
        // Receiver dropping just means the server is gone
        let _ = self.inbound_tx.send(event).await;
    }

    /// Everything delivered so far
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    /// Make direct messages to a user bounce
    pub fn make_undeliverable(&self, user: shared::UserId) {
        self.undeliverable.insert(user, ());
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for MemoryTransport {
    async fn next_event(&self) -> Option<InboundEvent> {
        self.inbound_rx.lock().await.recv().await
    }

    async fn deliver(&self, note: Notification) -> Result<(), TransportError> {
        if let Notification::Direct { user_id, .. } = &note
            && self.undeliverable.contains_key(user_id)
        {
            return Err(TransportError::DeliveryFailed(format!(
                "user {user_id} blocks direct messages"
            )));
        }
        self.sent.lock().push(note);
        Ok(())
    }

    async fn fetch_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> Result<Option<String>, TransportError> {
        Ok(self
            .history
            .get(&(chat_id, message_id))
            .map(|t| t.value().clone()))
    }
}
