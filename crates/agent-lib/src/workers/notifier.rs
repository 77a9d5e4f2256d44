//! Notifier worker: publishes status updates for finished actions

use super::{Inbox, WorkerContext};
use crate::health::components;
use crate::models::{Message, StatusUpdate};
use crate::notifier::Notifier;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub struct NotifierWorker {
    ctx: WorkerContext,
    notifier: Arc<Notifier>,
}

impl NotifierWorker {
    pub fn new(ctx: WorkerContext, notifier: Arc<Notifier>) -> Self {
        Self { ctx, notifier }
    }

    pub fn notifier(&self) -> Arc<Notifier> {
        self.notifier.clone()
    }

    pub async fn run(self, mut inbox: Inbox, mut shutdown: broadcast::Receiver<()>) {
        info!(agent = %self.ctx.name, "Notifier worker started");

        loop {
            tokio::select! {
                maybe = inbox.recv() => {
                    let Some(inbound) = maybe else {
                        info!("Notifier inbox closed");
                        break;
                    };
                    self.handle(inbound.envelope.message).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down notifier worker");
                    break;
                }
            }
        }
    }

    /// Publish a status update for a response action; other kinds are ignored
    pub async fn handle(&self, message: Message) -> Option<StatusUpdate> {
        match message {
            Message::ResponseAction(action) => {
                let update = self.notifier.publish(&action);
                self.ctx.logger.log_status_update(&update);
                self.ctx.health.set_healthy(components::NOTIFIER).await;
                Some(update)
            }
            other => {
                debug!(kind = other.kind(), "Notifier ignoring message");
                None
            }
        }
    }
}
