//! Request-path ticket operations: creation, messages, status changes, CSAT.
//!
//! Each operation runs against the store under one lock acquisition, so the
//! escalation decision, the triggering message and the status write land
//! together. The message insert always precedes the ticket update.

use serde_json::json;
use ticketflow_contracts::{
    Agent, Channel, CreateAgentRequest, CreateChannelRequest, CreateCustomerRequest,
    CreateTicketRequest, Customer, EscalationOutcome, Feedback, FeedbackRequest, Message,
    PostMessageRequest, PostMessageResponse, Queue, SenderKind, Ticket, TicketStatus, TicketView,
    UpdateStatusRequest,
};
use ticketflow_kernel::{
    apply, ticket_sla, ConfidenceThresholds, EscalationInput, EscalationPolicy, LifecycleEvent,
};

use crate::audit::AuditRecord;
use crate::collaborators::Notification;
use crate::error::{ServiceError, ServiceResult};
use crate::store::TicketStore;
use crate::{hours, new_id, ticket_event, AppState};

impl AppState {
    pub async fn register_agent(&self, req: CreateAgentRequest) -> ServiceResult<Agent> {
        require("id", &req.id)?;
        require("name", &req.name)?;
        let agent = Agent {
            id: req.id,
            name: req.name,
            email: req.email,
        };
        self.store.lock().await.upsert_agent(&agent)?;
        Ok(agent)
    }

    pub async fn register_customer(&self, req: CreateCustomerRequest) -> ServiceResult<Customer> {
        require("id", &req.id)?;
        require("name", &req.name)?;
        let customer = Customer {
            id: req.id,
            name: req.name,
            email: req.email,
        };
        self.store.lock().await.upsert_customer(&customer)?;
        Ok(customer)
    }

    pub async fn register_channel(&self, req: CreateChannelRequest) -> ServiceResult<Channel> {
        require("id", &req.id)?;
        if let Some(t) = req.confidence_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(ServiceError::Validation(
                    "confidence_threshold must be within [0, 1]".to_string(),
                ));
            }
        }
        let channel = Channel {
            id: req.id,
            auto_respond: req.auto_respond,
            confidence_threshold: req.confidence_threshold,
        };
        self.store.lock().await.upsert_channel(&channel)?;
        Ok(channel)
    }

    pub async fn create_ticket(&self, req: CreateTicketRequest) -> ServiceResult<Ticket> {
        require("customer_id", &req.customer_id)?;
        require("subject", &req.subject)?;
        let now = self.now();
        let (first_due, resolution_due) = self.sla_targets().due_dates(req.priority, now);

        let ticket = Ticket {
            id: new_id("tkt"),
            customer_id: req.customer_id,
            channel_id: req.channel_id,
            subject: req.subject,
            status: TicketStatus::Open,
            priority: req.priority,
            queue: Queue::Ai,
            created_at: now,
            updated_at: now,
            first_response_at: None,
            first_response_due_at: Some(first_due),
            first_response_breached: false,
            resolution_due_at: Some(resolution_due),
            resolution_breached: false,
            resolved_at: None,
            escalated_at: None,
            ai_handled: true,
            ai_confidence: None,
            follow_up_at: None,
            auto_close_at: None,
            assigned_agent_id: None,
            tags: req.tags,
            version: 0,
        };

        {
            let mut store = self.store.lock().await;
            if store.get_customer(&ticket.customer_id)?.is_none() {
                return Err(ServiceError::not_found("customer", &ticket.customer_id));
            }
            if let Some(channel_id) = &ticket.channel_id {
                if store.get_channel(channel_id)?.is_none() {
                    return Err(ServiceError::not_found("channel", channel_id));
                }
            }
            store.insert_ticket(&ticket)?;
            store.insert_ticket_event(&ticket_event(
                &ticket.id,
                "created",
                Some(&ticket.customer_id),
                json!({ "priority": ticket.priority }),
                now,
            ))?;
        }
        tracing::info!(ticket_id = %ticket.id, priority = ?ticket.priority, "ticket created");
        self.record(AuditRecord::new(&ticket.id, "create_ticket", "ok", "created", now))
            .await;

        match req.body {
            Some(body) if !body.trim().is_empty() => {
                let opening = PostMessageRequest {
                    sender: SenderKind::Customer,
                    sender_id: Some(ticket.customer_id.clone()),
                    body,
                    internal: false,
                    confidence: None,
                };
                Ok(self.post_message(&ticket.id, opening).await?.ticket)
            }
            _ => Ok(ticket),
        }
    }

    pub async fn ticket_view(&self, ticket_id: &str) -> ServiceResult<TicketView> {
        let ticket = self
            .store
            .lock()
            .await
            .get_ticket(ticket_id)?
            .ok_or_else(|| ServiceError::not_found("ticket", ticket_id))?;
        let sla = ticket_sla(&ticket, self.now());
        Ok(TicketView { ticket, sla })
    }

    /// Appends a message and runs the state machine and escalation policy
    /// for it.
    pub async fn post_message(
        &self,
        ticket_id: &str,
        req: PostMessageRequest,
    ) -> ServiceResult<PostMessageResponse> {
        require("body", &req.body)?;
        if let Some(c) = req.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(ServiceError::Validation(
                    "confidence must be within [0, 1]".to_string(),
                ));
            }
        }
        let now = self.now();
        let event = LifecycleEvent::for_message(req.sender, req.internal);

        let (message, ticket, escalation) = {
            let mut store = self.store.lock().await;
            if req.sender == SenderKind::Agent {
                let agent_id = req.sender_id.as_deref().ok_or_else(|| {
                    ServiceError::Validation("sender_id is required for agent messages".to_string())
                })?;
                if store.get_agent(agent_id)?.is_none() {
                    return Err(ServiceError::not_found("agent", agent_id));
                }
            }
            let original = store
                .get_ticket(ticket_id)?
                .ok_or_else(|| ServiceError::not_found("ticket", ticket_id))?;
            let history = store.list_messages(ticket_id)?;

            let mut ticket = original.clone();
            apply(&mut ticket, event, now)?;

            if req.sender == SenderKind::Ai && ticket.ai_confidence.is_none() {
                ticket.ai_confidence = req.confidence;
            }

            let escalation = if policy_applies(&ticket, &req) {
                let thresholds = self.thresholds_for(&**store, &ticket)?;
                let customer_text = if req.sender == SenderKind::Customer {
                    req.body.as_str()
                } else {
                    history
                        .iter()
                        .rev()
                        .find(|m| m.sender == SenderKind::Customer && !m.internal)
                        .map(|m| m.body.as_str())
                        .unwrap_or("")
                };
                let input = EscalationInput {
                    confidence: if req.sender == SenderKind::Ai {
                        req.confidence
                    } else {
                        None
                    },
                    message: customer_text,
                    prior_messages: history.iter().filter(|m| !m.internal).count(),
                    intent: ticket.intent(),
                };
                Some(self.escalation_policy().evaluate(&input, &thresholds))
            } else {
                None
            };

            let escalated = escalation.as_ref().map(|o| o.escalate).unwrap_or(false);
            if escalated {
                apply(&mut ticket, LifecycleEvent::Escalate, now)?;
            }

            match event {
                LifecycleEvent::AgentReply | LifecycleEvent::AiReply
                    if ticket.status == TicketStatus::Pending =>
                {
                    self.schedule_markers(&mut ticket);
                }
                LifecycleEvent::CustomerReply => {
                    ticket.follow_up_at = None;
                    ticket.auto_close_at = None;
                }
                _ => {}
            }

            let message = Message {
                id: new_id("msg"),
                ticket_id: ticket_id.to_string(),
                sender: req.sender,
                sender_id: req.sender_id.clone(),
                body: req.body.clone(),
                internal: req.internal,
                created_at: now,
            };
            store.insert_message(&message)?;

            if ticket != original
                && !store.update_ticket_if_status(&mut ticket, &[original.status])?
            {
                return Err(ServiceError::Conflict(format!(
                    "ticket {ticket_id} changed concurrently"
                )));
            }
            if ticket.status != original.status {
                store.insert_ticket_event(&ticket_event(
                    ticket_id,
                    "status_changed",
                    req.sender_id.as_deref(),
                    json!({
                        "from": original.status,
                        "to": ticket.status,
                        "trigger": event.as_str(),
                    }),
                    now,
                ))?;
            }
            if let Some(outcome) = escalation.as_ref().filter(|o| o.escalate) {
                store.insert_ticket_event(&ticket_event(
                    ticket_id,
                    "escalated",
                    None,
                    json!({ "reason": outcome.reason, "threshold": outcome.threshold }),
                    now,
                ))?;
            }
            (message, ticket, escalation)
        };

        if let Some(outcome) = escalation.as_ref().filter(|o| o.escalate) {
            tracing::info!(ticket_id, reason = ?outcome.reason, "ticket escalated to human queue");
            self.notify_assignee(&ticket, outcome).await;
        }
        self.record(AuditRecord::new(ticket_id, "post_message", "ok", event.as_str(), now))
            .await;

        Ok(PostMessageResponse {
            message,
            ticket,
            escalation,
        })
    }

    pub async fn update_ticket_status(
        &self,
        ticket_id: &str,
        req: UpdateStatusRequest,
    ) -> ServiceResult<Ticket> {
        let now = self.now();
        let event = LifecycleEvent::for_target(req.status);

        let ticket = {
            let mut store = self.store.lock().await;
            if let Some(actor) = req.actor_id.as_deref() {
                if store.get_agent(actor)?.is_none() {
                    return Err(ServiceError::not_found("agent", actor));
                }
            }
            let original = store
                .get_ticket(ticket_id)?
                .ok_or_else(|| ServiceError::not_found("ticket", ticket_id))?;
            let mut ticket = original.clone();
            let step = apply(&mut ticket, event, now)?;
            if event == LifecycleEvent::AwaitCustomer && ticket.follow_up_at.is_none() {
                self.schedule_markers(&mut ticket);
            }

            if !store.update_ticket_if_status(&mut ticket, &[original.status])? {
                return Err(ServiceError::Conflict(format!(
                    "ticket {ticket_id} changed concurrently"
                )));
            }
            if step.changed() {
                store.insert_ticket_event(&ticket_event(
                    ticket_id,
                    "status_changed",
                    req.actor_id.as_deref(),
                    json!({ "from": step.from, "to": step.to, "trigger": event.as_str() }),
                    now,
                ))?;
            }
            ticket
        };

        tracing::info!(ticket_id, status = ticket.status.as_str(), "ticket status updated");
        self.record(AuditRecord::new(
            ticket_id,
            "update_ticket_status",
            "ok",
            event.as_str(),
            now,
        ))
        .await;
        Ok(ticket)
    }

    pub async fn record_feedback(
        &self,
        ticket_id: &str,
        req: FeedbackRequest,
    ) -> ServiceResult<Feedback> {
        if !(1..=5).contains(&req.rating) {
            return Err(ServiceError::Validation(
                "rating must be between 1 and 5".to_string(),
            ));
        }
        let now = self.now();
        let feedback = {
            let mut store = self.store.lock().await;
            let ticket = store
                .get_ticket(ticket_id)?
                .ok_or_else(|| ServiceError::not_found("ticket", ticket_id))?;
            let feedback = Feedback {
                id: new_id("fb"),
                ticket_id: ticket.id,
                customer_id: ticket.customer_id,
                rating: req.rating,
                created_at: now,
            };
            store.insert_feedback(&feedback)?;
            feedback
        };
        self.record(AuditRecord::new(ticket_id, "record_feedback", "ok", "csat", now))
            .await;
        Ok(feedback)
    }

    /// Calibrated thresholds for `ticket`: the channel default (or the
    /// configured one) plus the per-intent map from the last calibration.
    fn thresholds_for(
        &self,
        store: &dyn TicketStore,
        ticket: &Ticket,
    ) -> ServiceResult<ConfidenceThresholds> {
        let channel_default = match &ticket.channel_id {
            Some(id) => store.get_channel(id)?.and_then(|c| c.confidence_threshold),
            None => None,
        };
        let default =
            channel_default.unwrap_or(self.cfg.escalation.default_confidence_threshold);
        Ok(ConfidenceThresholds::new(default).with_intents(store.load_intent_thresholds()?))
    }

    fn escalation_policy(&self) -> EscalationPolicy {
        EscalationPolicy {
            frustration_min_prior_messages: self.cfg.escalation.frustration_min_prior_messages,
        }
    }

    pub(crate) fn schedule_markers(&self, ticket: &mut Ticket) {
        let now = ticket.updated_at;
        ticket.follow_up_at = Some(now + hours(self.cfg.lifecycle.follow_up_after_hours));
        ticket.auto_close_at = Some(now + hours(self.cfg.lifecycle.auto_close_after_hours));
    }

    async fn notify_assignee(&self, ticket: &Ticket, outcome: &EscalationOutcome) {
        let Some(agent_id) = ticket.assigned_agent_id.clone() else {
            return;
        };
        self.notify(Notification {
            agent_id,
            title: "Ticket escalated".to_string(),
            message: format!("{} needs a human ({:?})", ticket.subject, outcome.reason),
            ticket_id: ticket.id.clone(),
        })
        .await;
    }
}

/// Escalation runs on non-internal customer and AI messages while the AI
/// still owns a live ticket.
fn policy_applies(ticket: &Ticket, req: &PostMessageRequest) -> bool {
    !req.internal
        && ticket.ai_handled
        && matches!(req.sender, SenderKind::Customer | SenderKind::Ai)
        && matches!(ticket.status, TicketStatus::Open | TicketStatus::Pending)
}

fn require(field: &str, value: &str) -> ServiceResult<()> {
    if value.trim().is_empty() {
        return Err(ServiceError::Validation(format!("{field} is required")));
    }
    Ok(())
}
