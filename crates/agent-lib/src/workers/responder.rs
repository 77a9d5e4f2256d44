//! Responder worker: drives each incident through decide, execute, notify

use super::{Inbox, WorkerContext, WorkerRole};
use crate::counters::Counter;
use crate::decision::{DecisionEngine, IncidentContext};
use crate::health::components;
use crate::incident::{IncidentState, IncidentTracker};
use crate::models::{ActionStatus, Envelope, Message, ResponseAction, Severity};
use crate::runbook::RunbookExecutor;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Alerts below this severity are logged but never acted on
pub const MIN_ACTIONABLE_SEVERITY: Severity = Severity::Medium;

/// How an incident left the responder
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentOutcome {
    /// The input did not warrant an incident
    Ignored,
    /// Another incident for the same subject was still in flight
    Dropped { open_incident: String },
    /// The action was handed to the notifier
    Notified {
        incident_id: String,
        action: ResponseAction,
    },
    /// The incident could not be completed
    Abandoned { incident_id: String, reason: String },
}

pub struct ResponderWorker {
    ctx: WorkerContext,
    engine: DecisionEngine,
    executor: RunbookExecutor,
    incidents: IncidentTracker,
}

impl ResponderWorker {
    pub fn new(ctx: WorkerContext, engine: DecisionEngine, executor: RunbookExecutor) -> Self {
        let engine = engine.health(ctx.health.clone());
        Self {
            ctx,
            engine,
            executor,
            incidents: IncidentTracker::new(),
        }
    }

    pub fn incidents(&self) -> &IncidentTracker {
        &self.incidents
    }

    pub async fn run(self, mut inbox: Inbox, mut shutdown: broadcast::Receiver<()>) {
        info!(
            agent = %self.ctx.name,
            oracle = self.engine.has_oracle(),
            "Responder worker started"
        );
        let worker = Arc::new(self);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                maybe = inbox.recv() => {
                    let Some(inbound) = maybe else {
                        info!("Responder inbox closed");
                        break;
                    };
                    let worker = worker.clone();
                    // Incidents run concurrently; the tracker serializes per subject
                    in_flight.spawn(async move { worker.handle(inbound.envelope.message).await; });
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                _ = shutdown.recv() => {
                    info!(in_flight = in_flight.len(), "Shutting down responder worker");
                    break;
                }
            }
        }

        // Runbook steps are never cut short; finish what is already running
        drop(inbox);
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Incident task failed");
            }
        }
        info!("Responder worker stopped");
    }

    /// Handle one inbound message to completion
    pub async fn handle(&self, message: Message) -> IncidentOutcome {
        let kind = message.kind();
        let ctx = match message {
            Message::AnomalyAlert(alert) => {
                if alert.severity < MIN_ACTIONABLE_SEVERITY {
                    debug!(
                        alert_id = %alert.alert_id,
                        severity = %alert.severity,
                        "Alert below actionable severity"
                    );
                    return IncidentOutcome::Ignored;
                }
                IncidentContext::from_alert(&alert)
            }
            Message::CanaryTestResult(result) => match IncidentContext::from_canary(&result) {
                Some(ctx) => ctx,
                None => {
                    debug!(
                        update_id = %result.update_id,
                        recommendation = %result.recommendation,
                        "Canary verdict needs no response"
                    );
                    return IncidentOutcome::Ignored;
                }
            },
            Message::UpdatePackage(_) | Message::ResponseAction(_) | Message::StatusUpdate(_) => {
                debug!(kind = kind, "Responder ignoring message");
                return IncidentOutcome::Ignored;
            }
        };

        self.respond(ctx).await
    }

    async fn respond(&self, incident: IncidentContext) -> IncidentOutcome {
        let subject = incident.subject_id.clone();
        let opened = match self.incidents.open(&subject) {
            Ok(opened) => opened,
            Err(open_incident) => {
                self.ctx.logger.log_incident_dropped(&subject, &open_incident);
                return IncidentOutcome::Dropped { open_incident };
            }
        };
        let incident_id = opened.incident_id;

        if let Err(e) = self.incidents.advance(&subject, IncidentState::Deciding) {
            return self.abandon(&subject, &incident_id, e.to_string());
        }
        let outcome = self.engine.decide(&incident).await;
        let used_oracle = outcome.used_oracle();
        if used_oracle {
            self.ctx.counters.increment(Counter::OracleDecisions);
        }
        let decision = outcome.into_decision();
        self.ctx.logger.log_decision(
            &incident_id,
            decision.action_type.as_str(),
            used_oracle,
            decision.confidence,
        );

        if let Err(e) = self.incidents.advance(&subject, IncidentState::Executing) {
            return self.abandon(&subject, &incident_id, e.to_string());
        }
        let action = self
            .executor
            .execute_decision(&decision, &incident.targets)
            .await;
        self.ctx.counters.increment(Counter::ActionsTaken);
        if action.status == ActionStatus::Completed {
            self.ctx.counters.increment(Counter::IncidentsResolved);
            self.ctx.health.set_healthy(components::EXECUTOR).await;
        } else {
            self.ctx
                .health
                .set_degraded(components::EXECUTOR, format!("{} failed", action.action_id))
                .await;
        }
        self.ctx.logger.log_action(&action);

        let delivered = self
            .ctx
            .send_to(
                WorkerRole::Notifier.agent_name(),
                Envelope::new(action.clone()),
            )
            .await;
        if !delivered {
            return self.abandon(&subject, &incident_id, "notifier unreachable".to_string());
        }

        match self.incidents.advance(&subject, IncidentState::Notified) {
            Ok(_) => IncidentOutcome::Notified {
                incident_id,
                action,
            },
            Err(e) => self.abandon(&subject, &incident_id, e.to_string()),
        }
    }

    fn abandon(&self, subject: &str, incident_id: &str, reason: String) -> IncidentOutcome {
        if let Err(e) = self.incidents.abandon(subject) {
            debug!(error = %e, "Incident already closed");
        }
        self.ctx.logger.log_incident_abandoned(incident_id, &reason);
        IncidentOutcome::Abandoned {
            incident_id: incident_id.to_string(),
            reason,
        }
    }
}
