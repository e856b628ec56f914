use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use ticketflow_contracts::{
    CustomerAlert, HealthScore, JobReport, OutreachChannel, OutreachKind, OutreachLog, Ticket,
};
use ticketflow_kernel::{
    compute_health, needs_alert, stable_alert_id, stable_outreach_id, window_bucket,
    CustomerActivity,
};

use crate::error::ServiceResult;
use crate::store::{TicketFilter, TicketStore};
use crate::AppState;

enum Scored {
    Quiet,
    Alerted,
    Suppressed,
}

impl AppState {
    /// Rescores every customer with ticket activity inside the health window.
    pub async fn run_health_scores(&self) -> ServiceResult<JobReport> {
        let now = self.now();
        let since = now - Duration::days(self.cfg.health.window_days);
        let cooldown = Duration::days(self.cfg.health.alert_cooldown_days);
        let mut report = JobReport::new("health_scores");

        let (by_customer, ratings) = {
            let store = self.store.lock().await;
            let tickets = store.list_tickets(&TicketFilter {
                active_since: Some(since),
                ..Default::default()
            })?;
            let mut by_customer: BTreeMap<String, Vec<Ticket>> = BTreeMap::new();
            for ticket in tickets {
                by_customer
                    .entry(ticket.customer_id.clone())
                    .or_default()
                    .push(ticket);
            }
            let mut ratings: BTreeMap<String, Vec<u8>> = BTreeMap::new();
            for feedback in store.list_feedback_since(since)? {
                ratings
                    .entry(feedback.customer_id)
                    .or_default()
                    .push(feedback.rating);
            }
            (by_customer, ratings)
        };

        for (customer_id, tickets) in by_customer {
            let activity = CustomerActivity::from_snapshot(
                &tickets,
                ratings.get(&customer_id).map(|r| r.as_slice()).unwrap_or(&[]),
            );
            let mut store = self.store.lock().await;
            match score_one(&mut **store, &customer_id, &activity, now, cooldown) {
                Ok((score, outcome)) => {
                    report.bump("scored");
                    match outcome {
                        Scored::Quiet => {}
                        Scored::Alerted => {
                            report.bump("alerted");
                            tracing::info!(
                                customer_id = %customer_id,
                                score = score.score,
                                risk = ?score.risk_level,
                                trend = ?score.trend,
                                "customer health alert raised"
                            );
                        }
                        Scored::Suppressed => report.bump("alert_suppressed"),
                    }
                }
                Err(e) => {
                    report.bump("failed");
                    tracing::warn!(customer_id = %customer_id, error = %e, "health scoring failed");
                }
            }
        }

        self.record_job(&report).await;
        Ok(report)
    }
}

fn score_one(
    store: &mut dyn TicketStore,
    customer_id: &str,
    activity: &CustomerActivity,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> ServiceResult<(HealthScore, Scored)> {
    let previous = store.get_health_score(customer_id)?;
    let score = compute_health(customer_id, activity, previous.as_ref(), now);
    store.upsert_health_score(&score)?;
    if !needs_alert(&score) {
        return Ok((score, Scored::Quiet));
    }

    let recent = store
        .latest_alert_at(customer_id)?
        .map(|at| now - at < cooldown)
        .unwrap_or(false);
    if recent {
        return Ok((score, Scored::Suppressed));
    }
    // Check-then-write can race across overlapping runs; the bucketed id
    // collapses those duplicates to one row.
    let bucket = window_bucket(now, cooldown);
    let alert = CustomerAlert {
        id: stable_alert_id(customer_id, bucket),
        customer_id: customer_id.to_string(),
        kind: "health_risk".to_string(),
        message: format!(
            "health score {} ({}, {})",
            score.score,
            risk_label(&score),
            trend_label(&score)
        ),
        created_at: now,
    };
    if !store.insert_alert(&alert)? {
        return Ok((score, Scored::Suppressed));
    }
    store.insert_outreach(&OutreachLog {
        id: stable_outreach_id(OutreachKind::HealthAlert, customer_id, bucket),
        kind: OutreachKind::HealthAlert,
        customer_id: customer_id.to_string(),
        ticket_id: None,
        channel: OutreachChannel::Internal,
        created_at: now,
    })?;
    Ok((score, Scored::Alerted))
}

fn risk_label(score: &HealthScore) -> &'static str {
    match score.risk_level {
        ticketflow_contracts::RiskLevel::Healthy => "healthy",
        ticketflow_contracts::RiskLevel::AtRisk => "at_risk",
        ticketflow_contracts::RiskLevel::Critical => "critical",
    }
}

fn trend_label(score: &HealthScore) -> &'static str {
    match score.trend {
        ticketflow_contracts::Trend::Improving => "improving",
        ticketflow_contracts::Trend::Stable => "stable",
        ticketflow_contracts::Trend::Declining => "declining",
    }
}
