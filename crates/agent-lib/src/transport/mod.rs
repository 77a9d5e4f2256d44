//! Name-addressed message delivery between agents
//!
//! `Transport::send` resolves the recipient in the directory and hands the
//! envelope to a pluggable [`Delivery`]. Delivery is at-most-once with no
//! retry; the caller decides what a failure means for its operation.

mod channel;
mod http;

pub use channel::ChannelDelivery;
pub use http::HttpDelivery;

use crate::directory::{AgentDirectory, AgentRecord};
use crate::error::{DirectoryError, TransportError};
use crate::models::{Envelope, Message};
use crate::observability::AgentMetrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default bound on a single delivery
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Wire form of a delivered message, also the `/submit` request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub sender: String,
    pub recipient: String,
    pub envelope: Envelope,
}

/// Point-to-point delivery to an already resolved agent
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, record: &AgentRecord, message: InboundMessage)
        -> Result<(), TransportError>;
}

/// Directory-resolving sender shared by every worker of a process
#[derive(Clone)]
pub struct Transport {
    directory: Arc<AgentDirectory>,
    delivery: Arc<dyn Delivery>,
    timeout: Duration,
    metrics: AgentMetrics,
}

impl Transport {
    pub fn new(directory: Arc<AgentDirectory>, delivery: Arc<dyn Delivery>) -> Self {
        Self {
            directory,
            delivery,
            timeout: DEFAULT_DELIVERY_TIMEOUT,
            metrics: AgentMetrics::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn directory(&self) -> &Arc<AgentDirectory> {
        &self.directory
    }

    /// Wrap `message` in a fresh envelope and deliver it to `to`
    pub async fn send(
        &self,
        from: &str,
        to: &str,
        message: impl Into<Message>,
    ) -> Result<Envelope, TransportError> {
        let envelope = Envelope::new(message);
        self.send_envelope(from, to, envelope.clone()).await?;
        Ok(envelope)
    }

    /// Deliver an existing envelope to `to`
    pub async fn send_envelope(
        &self,
        from: &str,
        to: &str,
        envelope: Envelope,
    ) -> Result<(), TransportError> {
        let kind = envelope.kind();
        let result = self.deliver_resolved(from, to, envelope).await;

        match &result {
            Ok(()) => {
                self.metrics.inc_messages_sent(kind);
                debug!(from = %from, to = %to, kind = %kind, "Message delivered");
            }
            Err(e) => {
                let reason = match e {
                    TransportError::Unregistered { .. } => "unregistered",
                    TransportError::Unreachable { .. } => "unreachable",
                    TransportError::Timeout { .. } => "timeout",
                };
                self.metrics.inc_messages_failed(kind, reason);
            }
        }

        result
    }

    async fn deliver_resolved(
        &self,
        from: &str,
        to: &str,
        envelope: Envelope,
    ) -> Result<(), TransportError> {
        let record = self.directory.lookup(to).map_err(|e| match e {
            DirectoryError::NotFound { name } => TransportError::Unregistered { name },
            DirectoryError::PersistFailed { reason, .. } => TransportError::Unreachable {
                name: to.to_string(),
                reason,
            },
        })?;

        let inbound = InboundMessage {
            sender: from.to_string(),
            recipient: to.to_string(),
            envelope,
        };

        match tokio::time::timeout(self.timeout, self.delivery.deliver(&record, inbound)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                name: to.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}
