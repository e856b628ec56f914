//! Ticket status state machine.
//!
//! [`transition`] is a pure function of (current status, event). [`apply`]
//! layers the field updates that ride along with a transition: AI hand-off
//! flags, first-response and resolution stamps, SLA breach capture.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ticketflow_contracts::{Queue, SenderKind, Ticket, TicketStatus};

use crate::sla::capture_breach;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    AgentReply,
    AiReply,
    CustomerReply,
    InternalNote,
    Escalate,
    Resolve,
    Reopen,
    AwaitCustomer,
}

impl LifecycleEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleEvent::AgentReply => "agent_reply",
            LifecycleEvent::AiReply => "ai_reply",
            LifecycleEvent::CustomerReply => "customer_reply",
            LifecycleEvent::InternalNote => "internal_note",
            LifecycleEvent::Escalate => "escalate",
            LifecycleEvent::Resolve => "resolve",
            LifecycleEvent::Reopen => "reopen",
            LifecycleEvent::AwaitCustomer => "await_customer",
        }
    }

    /// Event raised by posting a message.
    pub fn for_message(sender: SenderKind, internal: bool) -> Self {
        if internal {
            return LifecycleEvent::InternalNote;
        }
        match sender {
            SenderKind::Customer => LifecycleEvent::CustomerReply,
            SenderKind::Agent => LifecycleEvent::AgentReply,
            SenderKind::Ai => LifecycleEvent::AiReply,
            // System notices (follow-ups, revivals) never move status.
            SenderKind::System => LifecycleEvent::InternalNote,
        }
    }

    /// Event raised by an explicit status request.
    pub fn for_target(status: TicketStatus) -> Self {
        match status {
            TicketStatus::Open => LifecycleEvent::Reopen,
            TicketStatus::Pending => LifecycleEvent::AwaitCustomer,
            TicketStatus::Escalated => LifecycleEvent::Escalate,
            TicketStatus::Resolved => LifecycleEvent::Resolve,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: TicketStatus,
    pub to: TicketStatus,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {} a ticket that is {}", .event.as_str(), .from.as_str())]
    Invalid {
        from: TicketStatus,
        event: LifecycleEvent,
    },
}

pub fn transition(
    current: TicketStatus,
    event: LifecycleEvent,
) -> Result<Transition, TransitionError> {
    use LifecycleEvent as E;
    use TicketStatus as S;

    let to = match (current, event) {
        (s, E::InternalNote) => s,
        (_, E::CustomerReply) | (_, E::Reopen) => S::Open,
        (S::Resolved, E::AgentReply) | (S::Resolved, E::AiReply) => S::Resolved,
        (S::Escalated, E::AiReply) => S::Escalated,
        (_, E::AgentReply) | (_, E::AiReply) => S::Pending,
        (S::Resolved, E::Escalate) | (S::Resolved, E::Resolve) | (S::Resolved, E::AwaitCustomer) => {
            return Err(TransitionError::Invalid {
                from: current,
                event,
            })
        }
        (_, E::Escalate) => S::Escalated,
        (_, E::Resolve) => S::Resolved,
        (_, E::AwaitCustomer) => S::Pending,
    };
    Ok(Transition { from: current, to })
}

/// Runs `event` against `ticket` in place.
pub fn apply(
    ticket: &mut Ticket,
    event: LifecycleEvent,
    now: DateTime<Utc>,
) -> Result<Transition, TransitionError> {
    let step = transition(ticket.status, event)?;
    if event == LifecycleEvent::InternalNote {
        return Ok(step);
    }

    match event {
        LifecycleEvent::AgentReply => {
            ticket.ai_handled = false;
            ticket.queue = Queue::Human;
            record_first_response(ticket, now);
        }
        LifecycleEvent::AiReply => record_first_response(ticket, now),
        LifecycleEvent::Escalate => {
            ticket.ai_handled = false;
            ticket.queue = Queue::Human;
            if ticket.escalated_at.is_none() {
                ticket.escalated_at = Some(now);
            }
        }
        LifecycleEvent::Resolve => {
            ticket.resolved_at = Some(now);
            ticket.resolution_breached =
                capture_breach(ticket.resolution_breached, ticket.resolution_due_at, now);
        }
        LifecycleEvent::CustomerReply | LifecycleEvent::Reopen => {
            if step.from == TicketStatus::Resolved {
                ticket.resolved_at = None;
            }
        }
        LifecycleEvent::AwaitCustomer | LifecycleEvent::InternalNote => {}
    }

    ticket.status = step.to;
    ticket.updated_at = now;
    Ok(step)
}

fn record_first_response(ticket: &mut Ticket, now: DateTime<Utc>) {
    if ticket.first_response_at.is_some() {
        return;
    }
    ticket.first_response_at = Some(now);
    ticket.first_response_breached =
        capture_breach(ticket.first_response_breached, ticket.first_response_due_at, now);
}
