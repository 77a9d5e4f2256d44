//! In-process delivery over bounded mailboxes

use super::{Delivery, InboundMessage};
use crate::directory::AgentRecord;
use crate::error::TransportError;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Default mailbox depth per agent
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// One bounded mpsc mailbox per agent name. Messages from a single sender
/// arrive in send order.
pub struct ChannelDelivery {
    mailboxes: DashMap<String, mpsc::Sender<InboundMessage>>,
    capacity: usize,
}

impl ChannelDelivery {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAILBOX_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            mailboxes: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Open the mailbox for `name`, replacing any previous one
    pub fn mailbox(&self, name: &str) -> mpsc::Receiver<InboundMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.mailboxes.insert(name.to_string(), tx);
        rx
    }

    pub fn close(&self, name: &str) {
        self.mailboxes.remove(name);
    }

    pub fn has_mailbox(&self, name: &str) -> bool {
        self.mailboxes.contains_key(name)
    }

    /// Hand a message that arrived from outside the process to the
    /// mailbox named by its recipient
    pub async fn enqueue(&self, message: InboundMessage) -> Result<(), TransportError> {
        let recipient = message.recipient.clone();
        self.push(&recipient, message).await
    }

    async fn push(&self, name: &str, message: InboundMessage) -> Result<(), TransportError> {
        // Clone the sender so no map shard is held across the await
        let sender = self
            .mailboxes
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::Unreachable {
                name: name.to_string(),
                reason: "no mailbox open".to_string(),
            })?;

        sender
            .send(message)
            .await
            .map_err(|_| TransportError::Unreachable {
                name: name.to_string(),
                reason: "mailbox closed".to_string(),
            })
    }
}

impl Default for ChannelDelivery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Delivery for ChannelDelivery {
    async fn deliver(
        &self,
        record: &AgentRecord,
        message: InboundMessage,
    ) -> Result<(), TransportError> {
        self.push(&record.name, message).await
    }
}
