//! Lifecycle jobs: follow-up, auto-close, stalled revival, post-resolution
//! check-in and the SLA breach sweep.
//!
//! Every job follows the same shape: bounded candidate selection, a
//! per-item guard re-checked under the store lock, the side effect, then a
//! durable marker (a cleared scheduling field or an outreach row with a
//! deterministic id). Guards are race tolerant: overlapping runs may both
//! select a ticket, but only one of them passes the re-check.
//!
//! Revival, check-in and the SLA sweep select tickets that stay eligible
//! after being handled, so they page past them and cap each run at
//! `batch_limit` actions instead of `batch_limit` candidates.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::time::Duration as StdDuration;
use ticketflow_contracts::{
    JobReport, Message, OutreachChannel, OutreachKind, OutreachLog, SenderKind, Ticket,
    TicketStatus,
};
use ticketflow_kernel::{apply, day_bucket, overdue_flags, stable_outreach_id, LifecycleEvent};

use crate::collaborators::OutboundEmail;
use crate::error::{ServiceError, ServiceResult};
use crate::store::{OutreachSubject, TicketFilter, TicketStore};
use crate::{hours, new_id, ticket_event, AppState};

const FOLLOW_UP_PROMPT: &str =
    "Write a short, friendly follow-up asking whether the customer still needs help.";
const FOLLOW_UP_FALLBACK: &str =
    "Hi! We wanted to follow up on your request. Is there anything else we can help you with?";
const AUTO_CLOSE_TEXT: &str =
    "We haven't heard back from you, so we're closing this ticket. Reply any time to reopen it.";
const REVIVAL_TEXT: &str =
    "Just checking in: is this still an issue for you? Reply here and we'll pick it right back up.";
const CHECK_IN_SUBJECT: &str = "How did we do?";

const FOLLOW_UP_STATUSES: &[TicketStatus] = &[TicketStatus::Open, TicketStatus::Pending];
const AUTO_CLOSE_STATUSES: &[TicketStatus] = &[
    TicketStatus::Open,
    TicketStatus::Pending,
    TicketStatus::Resolved,
];
const UNRESOLVED: &[TicketStatus] = &[
    TicketStatus::Open,
    TicketStatus::Pending,
    TicketStatus::Escalated,
];

enum FollowUp {
    Sent { fallback: bool, email: Option<bool> },
    Skipped,
}

impl AppState {
    /// Follow-up, stalled revival and check-in, in that order.
    pub async fn run_follow_ups(&self) -> ServiceResult<JobReport> {
        let mut report = JobReport::new("follow_ups");
        report.merge_prefixed("follow_up", self.follow_up_pass().await?);
        report.merge_prefixed("revival", self.revival_pass().await?);
        report.merge_prefixed("check_in", self.check_in_pass().await?);
        tracing::info!(counts = ?report.counts, "follow-up job finished");
        self.record_job(&report).await;
        Ok(report)
    }

    pub async fn run_auto_closes(&self) -> ServiceResult<JobReport> {
        let now = self.now();
        let mut report = JobReport::new("auto_close");
        let candidates = self
            .select(TicketFilter {
                auto_close_before: Some(now),
                ..TicketFilter::with_statuses(AUTO_CLOSE_STATUSES)
            })
            .await?;

        for candidate in candidates {
            let mut store = self.store.lock().await;
            match auto_close_one(&mut **store, &candidate.id, now) {
                Ok(true) => report.bump("closed"),
                Ok(false) => report.bump("skipped"),
                Err(e) => {
                    report.bump("failed");
                    tracing::warn!(ticket_id = %candidate.id, error = %e, "auto-close failed");
                }
            }
        }
        tracing::info!(counts = ?report.counts, "auto-close job finished");
        self.record_job(&report).await;
        Ok(report)
    }

    /// Persists breach flags for deadlines that passed without the
    /// qualifying event.
    pub async fn run_sla_sweep(&self) -> ServiceResult<JobReport> {
        let now = self.now();
        let mut report = JobReport::new("sla_sweep");
        let mut pages = self.pages(TicketFilter::with_statuses(UNRESOLVED));
        let mut flagged = 0;

        'sweep: while let Some(page) = pages.next(self).await? {
            for candidate in page {
                if flagged >= self.cfg.lifecycle.batch_limit {
                    break 'sweep;
                }
                let (first, resolution) = overdue_flags(&candidate, now);
                if !first && !resolution {
                    continue;
                }
                let mut store = self.store.lock().await;
                match sweep_one(&mut **store, &candidate.id, now) {
                    Ok(Some((first, resolution))) => {
                        flagged += 1;
                        if first {
                            report.bump("first_response_breached");
                        }
                        if resolution {
                            report.bump("resolution_breached");
                        }
                    }
                    Ok(None) => report.bump("skipped"),
                    Err(e) => {
                        report.bump("failed");
                        tracing::warn!(ticket_id = %candidate.id, error = %e, "sla sweep failed");
                    }
                }
            }
        }
        self.record_job(&report).await;
        Ok(report)
    }

    /// One bounded batch. Only for jobs whose action clears the filter
    /// condition, so handled tickets drop out of the next selection.
    async fn select(&self, filter: TicketFilter) -> ServiceResult<Vec<Ticket>> {
        let filter = filter.limit(self.cfg.lifecycle.batch_limit);
        Ok(self.store.lock().await.list_tickets(&filter)?)
    }

    /// Walks every match in batch-sized pages. Jobs whose candidates stay
    /// selectable after being handled use this, so they cannot get stuck
    /// on the same oldest tickets.
    fn pages(&self, filter: TicketFilter) -> Pages {
        Pages {
            filter,
            size: self.cfg.lifecycle.batch_limit,
            done: false,
        }
    }

    async fn follow_up_pass(&self) -> ServiceResult<JobReport> {
        let now = self.now();
        let mut report = JobReport::new("follow_up");
        let candidates = self
            .select(TicketFilter {
                follow_up_before: Some(now),
                ..TicketFilter::with_statuses(FOLLOW_UP_STATUSES)
            })
            .await?;

        for ticket in candidates {
            match self.follow_up_one(&ticket, now).await {
                Ok(FollowUp::Sent { fallback, email }) => {
                    report.bump("sent");
                    if fallback {
                        report.bump("fallback");
                    }
                    match email {
                        Some(true) => report.bump("emailed"),
                        Some(false) => report.bump("email_failed"),
                        None => {}
                    }
                }
                Ok(FollowUp::Skipped) => report.bump("skipped"),
                Err(e) => {
                    report.bump("failed");
                    tracing::warn!(ticket_id = %ticket.id, error = %e, "follow-up failed");
                }
            }
        }
        Ok(report)
    }

    async fn follow_up_one(&self, ticket: &Ticket, now: DateTime<Utc>) -> ServiceResult<FollowUp> {
        let customer = self.store.lock().await.get_customer(&ticket.customer_id)?;
        let context = json!({
            "ticket_id": ticket.id,
            "subject": ticket.subject,
            "status": ticket.status,
            "customer_name": customer.as_ref().map(|c| c.name.clone()),
        });
        let (text, fallback) = self.generate_follow_up(&ticket.id, &context).await;

        let email_to = customer
            .and_then(|c| c.email)
            .filter(|_| self.cfg.lifecycle.email_follow_ups);

        {
            let mut store = self.store.lock().await;
            let Some(mut current) = store.get_ticket(&ticket.id)? else {
                return Ok(FollowUp::Skipped);
            };
            let due = match current.follow_up_at {
                Some(at) if at < now && FOLLOW_UP_STATUSES.contains(&current.status) => at,
                _ => return Ok(FollowUp::Skipped),
            };

            store.insert_message(&system_message(&current.id, &text, now))?;
            let status = current.status;
            current.follow_up_at = None;
            if !store.update_ticket_if_status(&mut current, &[status])? {
                return Err(ServiceError::Conflict(format!(
                    "ticket {} changed during follow-up",
                    current.id
                )));
            }
            store.insert_outreach(&OutreachLog {
                id: stable_outreach_id(OutreachKind::FollowUp, &current.id, due.timestamp()),
                kind: OutreachKind::FollowUp,
                customer_id: current.customer_id.clone(),
                ticket_id: Some(current.id.clone()),
                channel: if email_to.is_some() {
                    OutreachChannel::Email
                } else {
                    OutreachChannel::Message
                },
                created_at: now,
            })?;
        }

        let email = match email_to {
            Some(to) => {
                let receipt = self
                    .collaborators
                    .emailer
                    .send(&OutboundEmail {
                        to,
                        subject: format!("Re: {}", ticket.subject),
                        text: text.clone(),
                        html: None,
                    })
                    .await;
                if let Some(error) = &receipt.error {
                    tracing::warn!(ticket_id = %ticket.id, error = %error, "follow-up email failed");
                }
                Some(receipt.success)
            }
            None => None,
        };
        Ok(FollowUp::Sent { fallback, email })
    }

    /// Generated follow-up text, or the static fallback when the model
    /// fails, returns nothing, or exceeds the generation timeout.
    async fn generate_follow_up(&self, ticket_id: &str, context: &serde_json::Value) -> (String, bool) {
        let timeout = StdDuration::from_millis(self.cfg.lifecycle.generation_timeout_ms);
        let generation = self
            .collaborators
            .model
            .generate(FOLLOW_UP_PROMPT, context, timeout);
        match tokio::time::timeout(timeout, generation).await {
            Ok(Ok(g)) if !g.text.trim().is_empty() => (g.text, false),
            Ok(Ok(_)) => {
                tracing::warn!(ticket_id, "language model returned empty text; using fallback");
                (FOLLOW_UP_FALLBACK.to_string(), true)
            }
            Ok(Err(e)) => {
                tracing::warn!(ticket_id, error = %e, "language model failed; using fallback");
                (FOLLOW_UP_FALLBACK.to_string(), true)
            }
            Err(_) => {
                tracing::warn!(
                    ticket_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "language model timed out; using fallback"
                );
                (FOLLOW_UP_FALLBACK.to_string(), true)
            }
        }
    }

    async fn revival_pass(&self) -> ServiceResult<JobReport> {
        let now = self.now();
        let mut report = JobReport::new("revival");
        let stalled_after = hours(self.cfg.lifecycle.stalled_after_hours);
        let cooldown = Duration::days(self.cfg.lifecycle.revival_cooldown_days);
        let mut pages = self.pages(TicketFilter::with_statuses(&[TicketStatus::Pending]));
        let mut revived = 0;

        'revival: while let Some(page) = pages.next(self).await? {
            for candidate in page {
                if revived >= self.cfg.lifecycle.batch_limit {
                    break 'revival;
                }
                let mut store = self.store.lock().await;
                match revive_one(&mut **store, &candidate.id, now, stalled_after, cooldown) {
                    Ok(outcome) => {
                        if outcome == "revived" {
                            revived += 1;
                        }
                        report.bump(outcome);
                    }
                    Err(e) => {
                        report.bump("failed");
                        tracing::warn!(ticket_id = %candidate.id, error = %e, "revival failed");
                    }
                }
            }
        }
        Ok(report)
    }

    async fn check_in_pass(&self) -> ServiceResult<JobReport> {
        let now = self.now();
        let mut report = JobReport::new("check_in");
        let target_day = day_bucket(now) - self.cfg.lifecycle.check_in_after_days;
        let Some(day_start) = DateTime::<Utc>::from_timestamp(target_day * 86_400, 0) else {
            return Ok(report);
        };
        let mut pages = self.pages(TicketFilter {
            resolved_from: Some(day_start),
            resolved_until: Some(day_start + Duration::days(1)),
            ..TicketFilter::with_statuses(&[TicketStatus::Resolved])
        });
        let mut sent = 0;

        'check_in: while let Some(page) = pages.next(self).await? {
            for ticket in page {
                if sent >= self.cfg.lifecycle.batch_limit {
                    break 'check_in;
                }
                match self.check_in_one(&ticket, now).await {
                    Ok(outcome) => {
                        if outcome == "sent" {
                            sent += 1;
                        }
                        report.bump(outcome);
                    }
                    Err(e) => {
                        report.bump("failed");
                        tracing::warn!(ticket_id = %ticket.id, error = %e, "check-in failed");
                    }
                }
            }
        }
        Ok(report)
    }

    async fn check_in_one(&self, ticket: &Ticket, now: DateTime<Utc>) -> ServiceResult<&'static str> {
        let customer = {
            let store = self.store.lock().await;
            if store
                .last_outreach_at(OutreachKind::CheckIn, OutreachSubject::Ticket(&ticket.id))?
                .is_some()
            {
                return Ok("already_sent");
            }
            store.get_customer(&ticket.customer_id)?
        };
        let Some((name, to)) = customer.and_then(|c| c.email.map(|e| (c.name, e))) else {
            return Ok("no_email");
        };

        let receipt = self
            .collaborators
            .emailer
            .send(&OutboundEmail {
                to,
                subject: CHECK_IN_SUBJECT.to_string(),
                text: format!(
                    "Hi {name}, a few days ago we resolved \"{}\". Is everything still working? \
                     Reply to this email if you need anything else.",
                    ticket.subject
                ),
                html: None,
            })
            .await;
        if !receipt.success {
            tracing::warn!(
                ticket_id = %ticket.id,
                error = receipt.error.as_deref().unwrap_or("unknown"),
                "check-in email failed"
            );
            return Ok("email_failed");
        }

        let logged = self.store.lock().await.insert_outreach(&OutreachLog {
            id: stable_outreach_id(OutreachKind::CheckIn, &ticket.id, 0),
            kind: OutreachKind::CheckIn,
            customer_id: ticket.customer_id.clone(),
            ticket_id: Some(ticket.id.clone()),
            channel: OutreachChannel::Email,
            created_at: now,
        })?;
        Ok(if logged { "sent" } else { "already_sent" })
    }
}

/// Cursor over `(created_at, id)` order.
struct Pages {
    filter: TicketFilter,
    size: usize,
    done: bool,
}

impl Pages {
    async fn next(&mut self, state: &AppState) -> ServiceResult<Option<Vec<Ticket>>> {
        if self.done {
            return Ok(None);
        }
        let page = state
            .store
            .lock()
            .await
            .list_tickets(&self.filter.clone().limit(self.size))?;
        match page.last() {
            Some(last) if page.len() == self.size => {
                self.filter.after = Some((last.created_at, last.id.clone()));
            }
            _ => self.done = true,
        }
        if page.is_empty() {
            return Ok(None);
        }
        Ok(Some(page))
    }
}

fn system_message(ticket_id: &str, body: &str, now: DateTime<Utc>) -> Message {
    Message {
        id: new_id("msg"),
        ticket_id: ticket_id.to_string(),
        sender: SenderKind::System,
        sender_id: None,
        body: body.to_string(),
        internal: false,
        created_at: now,
    }
}

fn auto_close_one(
    store: &mut dyn TicketStore,
    ticket_id: &str,
    now: DateTime<Utc>,
) -> ServiceResult<bool> {
    let Some(mut ticket) = store.get_ticket(ticket_id)? else {
        return Ok(false);
    };
    let due = match ticket.auto_close_at {
        Some(at) if at < now && AUTO_CLOSE_STATUSES.contains(&ticket.status) => at,
        _ => return Ok(false),
    };
    let from = ticket.status;

    store.insert_message(&system_message(ticket_id, AUTO_CLOSE_TEXT, now))?;
    if from != TicketStatus::Resolved {
        apply(&mut ticket, LifecycleEvent::Resolve, now)?;
    }
    ticket.follow_up_at = None;
    ticket.auto_close_at = None;
    if !store.update_ticket_if_status(&mut ticket, &[from])? {
        return Ok(false);
    }
    if from != ticket.status {
        store.insert_ticket_event(&ticket_event(
            ticket_id,
            "status_changed",
            None,
            json!({ "from": from, "to": ticket.status, "trigger": "auto_close" }),
            now,
        ))?;
    }
    store.insert_outreach(&OutreachLog {
        id: stable_outreach_id(OutreachKind::AutoClose, ticket_id, due.timestamp()),
        kind: OutreachKind::AutoClose,
        customer_id: ticket.customer_id.clone(),
        ticket_id: Some(ticket_id.to_string()),
        channel: OutreachChannel::Message,
        created_at: now,
    })?;
    Ok(true)
}

fn revive_one(
    store: &mut dyn TicketStore,
    ticket_id: &str,
    now: DateTime<Utc>,
    stalled_after: Duration,
    cooldown: Duration,
) -> ServiceResult<&'static str> {
    let Some(ticket) = store.get_ticket(ticket_id)? else {
        return Ok("skipped");
    };
    if ticket.status != TicketStatus::Pending {
        return Ok("skipped");
    }
    let messages = store.list_messages(ticket_id)?;
    let Some(last) = messages.iter().rev().find(|m| !m.internal) else {
        return Ok("no_messages");
    };
    if last.sender == SenderKind::Customer {
        return Ok("awaiting_agent");
    }
    if now - last.created_at < stalled_after {
        return Ok("not_stalled");
    }
    let recent = store
        .last_outreach_at(OutreachKind::Revival, OutreachSubject::Ticket(ticket_id))?
        .map(|at| now - at < cooldown)
        .unwrap_or(false);
    if recent {
        return Ok("cooldown");
    }

    // Keyed on the stalled message, so overlapping runs claim it once.
    let claimed = store.insert_outreach(&OutreachLog {
        id: stable_outreach_id(OutreachKind::Revival, &last.id, 0),
        kind: OutreachKind::Revival,
        customer_id: ticket.customer_id.clone(),
        ticket_id: Some(ticket_id.to_string()),
        channel: OutreachChannel::Message,
        created_at: now,
    })?;
    if !claimed {
        return Ok("cooldown");
    }
    store.insert_message(&system_message(ticket_id, REVIVAL_TEXT, now))?;
    Ok("revived")
}

/// Raises whichever breach flags are still due on the stored ticket.
fn sweep_one(
    store: &mut dyn TicketStore,
    ticket_id: &str,
    now: DateTime<Utc>,
) -> ServiceResult<Option<(bool, bool)>> {
    let Some(mut ticket) = store.get_ticket(ticket_id)? else {
        return Ok(None);
    };
    let (first, resolution) = overdue_flags(&ticket, now);
    if !first && !resolution {
        return Ok(None);
    }
    let status = ticket.status;
    ticket.first_response_breached |= first;
    ticket.resolution_breached |= resolution;
    if !store.update_ticket_if_status(&mut ticket, &[status])? {
        return Ok(None);
    }
    store.insert_ticket_event(&ticket_event(
        ticket_id,
        "sla_breached",
        None,
        json!({ "first_response": first, "resolution": resolution }),
        now,
    ))?;
    Ok(Some((first, resolution)))
}
