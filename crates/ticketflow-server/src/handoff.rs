//! Agent-to-agent handoff negotiation.
//!
//! Exclusivity comes from the store: at most one pending handoff per ticket
//! (`insert_handoff_if_no_pending`) and a compare-and-swap on handoff status
//! when resolving, so a second concurrent resolution always loses.

use serde_json::json;
use std::fmt::Display;
use ticketflow_contracts::{
    Handoff, HandoffDecision, HandoffStatus, RequestHandoffRequest, ResolveHandoffRequest,
};

use crate::audit::AuditRecord;
use crate::collaborators::Notification;
use crate::error::{ServiceError, ServiceResult};
use crate::store::TicketStore;
use crate::{new_id, ticket_event, AppState};

impl AppState {
    pub async fn request_handoff(
        &self,
        ticket_id: &str,
        req: RequestHandoffRequest,
    ) -> ServiceResult<Handoff> {
        if req.from_agent.trim().is_empty()
            || req.to_agent.trim().is_empty()
            || req.reason.trim().is_empty()
        {
            return Err(ServiceError::Validation(
                "from_agent, to_agent and reason are required".to_string(),
            ));
        }
        if req.from_agent == req.to_agent {
            return Err(ServiceError::Validation(
                "cannot hand a ticket off to the same agent".to_string(),
            ));
        }
        let now = self.now();

        let handoff = {
            let mut store = self.store.lock().await;
            if store.get_ticket(ticket_id)?.is_none() {
                return Err(ServiceError::not_found("ticket", ticket_id));
            }
            for agent_id in [&req.from_agent, &req.to_agent] {
                if store.get_agent(agent_id)?.is_none() {
                    return Err(ServiceError::not_found("agent", agent_id));
                }
            }

            let handoff = Handoff {
                id: new_id("ho"),
                ticket_id: ticket_id.to_string(),
                from_agent: req.from_agent,
                to_agent: req.to_agent,
                reason: req.reason,
                status: HandoffStatus::Pending,
                created_at: now,
                accepted_at: None,
                resolved_at: None,
            };
            if !store.insert_handoff_if_no_pending(&handoff)? {
                return Err(ServiceError::Conflict(format!(
                    "ticket {ticket_id} already has a pending handoff"
                )));
            }
            store.insert_ticket_event(&ticket_event(
                ticket_id,
                "handoff_requested",
                Some(&handoff.from_agent),
                json!({
                    "handoff_id": handoff.id,
                    "to_agent": handoff.to_agent,
                    "reason": handoff.reason,
                }),
                now,
            ))?;
            handoff
        };

        tracing::info!(ticket_id, handoff_id = %handoff.id, "handoff requested");
        self.notify(Notification {
            agent_id: handoff.to_agent.clone(),
            title: "Handoff requested".to_string(),
            message: format!("{} asks you to take over: {}", handoff.from_agent, handoff.reason),
            ticket_id: ticket_id.to_string(),
        })
        .await;
        self.record(AuditRecord::new(
            &handoff.id,
            "request_handoff",
            "ok",
            "pending",
            now,
        ))
        .await;
        Ok(handoff)
    }

    pub async fn resolve_handoff(
        &self,
        handoff_id: &str,
        req: ResolveHandoffRequest,
    ) -> ServiceResult<Handoff> {
        if req.acting_agent.trim().is_empty() {
            return Err(ServiceError::Validation("acting_agent is required".to_string()));
        }
        let now = self.now();

        let resolved = {
            let mut store = self.store.lock().await;
            let handoff = store
                .get_handoff(handoff_id)?
                .ok_or_else(|| ServiceError::not_found("handoff", handoff_id))?;
            if req.acting_agent != handoff.to_agent {
                return Err(ServiceError::Forbidden(format!(
                    "only {} may resolve handoff {handoff_id}",
                    handoff.to_agent
                )));
            }
            if handoff.status != HandoffStatus::Pending {
                return Err(already_resolved(&handoff));
            }

            let mut resolved = handoff.clone();
            resolved.resolved_at = Some(now);
            resolved.status = match req.decision {
                HandoffDecision::Accepted => {
                    resolved.accepted_at = Some(now);
                    HandoffStatus::Accepted
                }
                HandoffDecision::Declined => HandoffStatus::Declined,
            };
            if !store.update_handoff_if_status(&resolved, HandoffStatus::Pending)? {
                return Err(already_resolved(&handoff));
            }

            // Past this point the handoff outcome is committed; later
            // sub-writes are reconciled, not rolled back.
            match resolved.status {
                HandoffStatus::Accepted => accept_follow_through(&mut **store, &resolved, now),
                _ => {
                    let declined = store.insert_ticket_event(&ticket_event(
                        &resolved.ticket_id,
                        "handoff_declined",
                        Some(&resolved.to_agent),
                        json!({ "handoff_id": resolved.id }),
                        now,
                    ));
                    if let Err(e) = declined {
                        reconciliation_warning(&resolved.id, "handoff_declined event", e);
                    }
                }
            }
            resolved
        };

        tracing::info!(
            handoff_id,
            ticket_id = %resolved.ticket_id,
            status = resolved.status.as_str(),
            "handoff resolved"
        );
        self.notify(Notification {
            agent_id: resolved.from_agent.clone(),
            title: format!("Handoff {}", resolved.status.as_str()),
            message: format!(
                "{} {} your handoff",
                resolved.to_agent,
                resolved.status.as_str()
            ),
            ticket_id: resolved.ticket_id.clone(),
        })
        .await;
        self.record(AuditRecord::new(
            handoff_id,
            "resolve_handoff",
            "ok",
            resolved.status.as_str(),
            now,
        ))
        .await;
        Ok(resolved)
    }

    pub(crate) async fn notify(&self, notification: Notification) {
        if let Err(e) = self.collaborators.notifier.emit(&notification).await {
            tracing::warn!(
                agent_id = %notification.agent_id,
                ticket_id = %notification.ticket_id,
                error = %e,
                "notification failed"
            );
        }
    }
}

/// Reassignment plus the two audit events of the accept path.
fn accept_follow_through(
    store: &mut dyn TicketStore,
    handoff: &Handoff,
    now: chrono::DateTime<chrono::Utc>,
) {
    match store.get_ticket(&handoff.ticket_id) {
        Ok(Some(mut ticket)) => {
            let previous = ticket.assigned_agent_id.clone();
            let status = ticket.status;
            ticket.assigned_agent_id = Some(handoff.to_agent.clone());
            ticket.updated_at = now;
            match store.update_ticket_if_status(&mut ticket, &[status]) {
                Ok(true) => {}
                Ok(false) => reconciliation_warning(&handoff.id, "reassign", "status changed"),
                Err(e) => reconciliation_warning(&handoff.id, "reassign", e),
            }
            let events = [
                ticket_event(
                    &handoff.ticket_id,
                    "handoff_accepted",
                    Some(&handoff.to_agent),
                    json!({ "handoff_id": handoff.id }),
                    now,
                ),
                ticket_event(
                    &handoff.ticket_id,
                    "reassigned",
                    Some(&handoff.to_agent),
                    json!({ "from": previous, "to": handoff.to_agent }),
                    now,
                ),
            ];
            for event in &events {
                if let Err(e) = store.insert_ticket_event(event) {
                    reconciliation_warning(&handoff.id, &event.kind, e);
                }
            }
        }
        Ok(None) => reconciliation_warning(&handoff.id, "reassign", "ticket missing"),
        Err(e) => reconciliation_warning(&handoff.id, "reassign", e),
    }
}

fn reconciliation_warning(handoff_id: &str, step: &str, error: impl Display) {
    tracing::warn!(
        handoff_id,
        step,
        error = %error,
        "handoff accepted but follow-up write failed; needs reconciliation"
    );
}

fn already_resolved(handoff: &Handoff) -> ServiceError {
    ServiceError::Conflict(format!("handoff {} is already resolved", handoff.id))
}
