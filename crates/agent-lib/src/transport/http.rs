//! Delivery to a peer agent's `/submit` endpoint

use super::{Delivery, InboundMessage};
use crate::directory::AgentRecord;
use crate::error::TransportError;
use async_trait::async_trait;
use tracing::debug;
use url::Url;

pub struct HttpDelivery {
    client: reqwest::Client,
}

impl HttpDelivery {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn submit_url(record: &AgentRecord) -> Result<Url, TransportError> {
        Url::parse(&record.http_base())
            .and_then(|base| base.join("submit"))
            .map_err(|e| TransportError::Unreachable {
                name: record.name.clone(),
                reason: format!("invalid address: {}", e),
            })
    }
}

impl Default for HttpDelivery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Delivery for HttpDelivery {
    async fn deliver(
        &self,
        record: &AgentRecord,
        message: InboundMessage,
    ) -> Result<(), TransportError> {
        let url = Self::submit_url(record)?;
        debug!(url = %url, kind = %message.envelope.kind(), "Posting message");

        let response = self
            .client
            .post(url)
            .json(&message)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable {
                name: record.name.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Unreachable {
                name: record.name.clone(),
                reason: format!("HTTP {}", status),
            })
        }
    }
}
