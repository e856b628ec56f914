//! SLA deadlines and breach status.

use chrono::{DateTime, Duration, Utc};
use ticketflow_contracts::{Priority, SlaSnapshot, SlaStatus, Ticket, TicketSla};

const MAX_PERCENTAGE: f64 = 150.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaTarget {
    pub first_response: Duration,
    pub resolution: Duration,
}

impl SlaTarget {
    pub fn minutes(first_response: i64, resolution: i64) -> Self {
        Self {
            first_response: Duration::minutes(first_response),
            resolution: Duration::minutes(resolution),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaTargets {
    pub urgent: SlaTarget,
    pub high: SlaTarget,
    pub medium: SlaTarget,
    pub low: SlaTarget,
}

impl Default for SlaTargets {
    fn default() -> Self {
        Self {
            urgent: SlaTarget::minutes(60, 4 * 60),
            high: SlaTarget::minutes(4 * 60, 24 * 60),
            medium: SlaTarget::minutes(8 * 60, 48 * 60),
            low: SlaTarget::minutes(24 * 60, 72 * 60),
        }
    }
}

impl SlaTargets {
    pub fn for_priority(&self, priority: Priority) -> SlaTarget {
        match priority {
            Priority::Urgent => self.urgent,
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }

    /// (first response due, resolution due) for a ticket created at `created_at`.
    pub fn due_dates(
        &self,
        priority: Priority,
        created_at: DateTime<Utc>,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        let target = self.for_priority(priority);
        (
            created_at + target.first_response,
            created_at + target.resolution,
        )
    }
}

/// Breach flag after the qualifying event fires at `now`. Monotonic: a set
/// flag stays set.
pub fn capture_breach(flag: bool, due_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    flag || due_at.map(|due| now >= due).unwrap_or(false)
}

pub fn elapsed_percentage(
    created_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> f64 {
    let total = (due_at - created_at).num_milliseconds();
    if total <= 0 {
        return if now >= due_at { MAX_PERCENTAGE } else { 0.0 };
    }
    let elapsed = (now - created_at).num_milliseconds() as f64;
    (elapsed / total as f64 * 100.0).clamp(0.0, MAX_PERCENTAGE)
}

/// Status of one deadline. Once `satisfied_at` is set the snapshot is
/// frozen at 100% and its status comes only from the captured flag.
pub fn sla_snapshot(
    created_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
    satisfied_at: Option<DateTime<Utc>>,
    breached: bool,
    now: DateTime<Utc>,
) -> SlaSnapshot {
    if satisfied_at.is_some() {
        return SlaSnapshot {
            due_at,
            percentage: 100.0,
            status: if breached {
                SlaStatus::Breached
            } else {
                SlaStatus::Ok
            },
            frozen: true,
        };
    }

    let percentage = elapsed_percentage(created_at, due_at, now);
    let status = if breached || percentage >= 100.0 {
        SlaStatus::Breached
    } else if percentage >= 50.0 {
        SlaStatus::Warning
    } else {
        SlaStatus::Ok
    };
    SlaSnapshot {
        due_at,
        percentage,
        status,
        frozen: false,
    }
}

pub fn ticket_sla(ticket: &Ticket, now: DateTime<Utc>) -> TicketSla {
    TicketSla {
        first_response: ticket.first_response_due_at.map(|due| {
            sla_snapshot(
                ticket.created_at,
                due,
                ticket.first_response_at,
                ticket.first_response_breached,
                now,
            )
        }),
        resolution: ticket.resolution_due_at.map(|due| {
            sla_snapshot(
                ticket.created_at,
                due,
                ticket.resolved_at,
                ticket.resolution_breached,
                now,
            )
        }),
    }
}

/// Which breach flags the sweep should raise on `ticket` at `now`:
/// (first response, resolution).
pub fn overdue_flags(ticket: &Ticket, now: DateTime<Utc>) -> (bool, bool) {
    let first = !ticket.first_response_breached
        && ticket.first_response_at.is_none()
        && ticket.first_response_due_at.map(|d| now >= d).unwrap_or(false);
    let resolution = !ticket.resolution_breached
        && ticket.resolved_at.is_none()
        && ticket.resolution_due_at.map(|d| now >= d).unwrap_or(false);
    (first, resolution)
}
