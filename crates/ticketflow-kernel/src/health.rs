//! Customer health scoring.

use chrono::{DateTime, Utc};
use ticketflow_contracts::{HealthScore, RiskLevel, Ticket, TicketStatus, Trend};

const BASE_SCORE: i64 = 70;
const HEALTHY_AT: i64 = 60;
const AT_RISK_AT: i64 = 40;
const TREND_DELTA: i64 = 5;

/// Ticket and CSAT counts for one customer inside the scoring window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomerActivity {
    pub total_tickets: usize,
    pub open_tickets: usize,
    pub escalated_tickets: usize,
    pub resolved_tickets: usize,
    pub avg_csat: Option<f64>,
}

impl CustomerActivity {
    pub fn from_snapshot(tickets: &[Ticket], ratings: &[u8]) -> Self {
        let mut activity = CustomerActivity {
            total_tickets: tickets.len(),
            ..Default::default()
        };
        for ticket in tickets {
            match ticket.status {
                TicketStatus::Open | TicketStatus::Pending => activity.open_tickets += 1,
                TicketStatus::Escalated => activity.escalated_tickets += 1,
                TicketStatus::Resolved => activity.resolved_tickets += 1,
            }
        }
        if !ratings.is_empty() {
            let sum: f64 = ratings.iter().map(|r| f64::from(*r)).sum();
            activity.avg_csat = Some(sum / ratings.len() as f64);
        }
        activity
    }

    pub fn resolution_rate(&self) -> f64 {
        if self.total_tickets == 0 {
            return 0.0;
        }
        self.resolved_tickets as f64 / self.total_tickets as f64
    }
}

pub fn score_activity(activity: &CustomerActivity) -> i64 {
    let mut score = BASE_SCORE;
    if let Some(csat) = activity.avg_csat {
        score += ((csat - 3.0) * 10.0).round() as i64;
    }
    score -= (activity.open_tickets as i64 * 5).min(25);
    score -= (activity.escalated_tickets as i64 * 10).min(30);
    score += (activity.resolved_tickets as i64).min(10);
    if activity.resolution_rate() > 0.8 {
        score += 10;
    }
    score.clamp(0, 100)
}

pub fn classify_risk(score: i64) -> RiskLevel {
    if score >= HEALTHY_AT {
        RiskLevel::Healthy
    } else if score >= AT_RISK_AT {
        RiskLevel::AtRisk
    } else {
        RiskLevel::Critical
    }
}

/// First computation is always stable.
pub fn trend_from(previous: Option<i64>, current: i64) -> Trend {
    match previous {
        Some(prev) if current - prev > TREND_DELTA => Trend::Improving,
        Some(prev) if prev - current > TREND_DELTA => Trend::Declining,
        _ => Trend::Stable,
    }
}

pub fn compute_health(
    customer_id: &str,
    activity: &CustomerActivity,
    previous: Option<&HealthScore>,
    now: DateTime<Utc>,
) -> HealthScore {
    let score = score_activity(activity);
    HealthScore {
        customer_id: customer_id.to_string(),
        score,
        risk_level: classify_risk(score),
        trend: trend_from(previous.map(|p| p.score), score),
        computed_at: now,
    }
}

pub fn needs_alert(score: &HealthScore) -> bool {
    score.risk_level == RiskLevel::Critical || score.trend == Trend::Declining
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(open: usize, escalated: usize, resolved: usize, csat: Option<f64>) -> CustomerActivity {
        CustomerActivity {
            total_tickets: open + escalated + resolved,
            open_tickets: open,
            escalated_tickets: escalated,
            resolved_tickets: resolved,
            avg_csat: csat,
        }
    }

    #[test]
    fn formula_matches_components() {
        // 70 + round(1.5*10)=15 - 5 - 0 + 9 + 10 (9/10 > 0.8)
        assert_eq!(score_activity(&activity(1, 0, 9, Some(4.5))), 99);
        // 70 - 25 (capped) - 30 (capped) + 0
        assert_eq!(score_activity(&activity(6, 4, 0, None)), 15);
        // 70 + round(-2*10) - 10 - 10 + 1 = 31
        assert_eq!(score_activity(&activity(2, 1, 1, Some(1.0))), 31);
    }

    #[test]
    fn score_is_clamped() {
        assert_eq!(score_activity(&activity(0, 0, 40, Some(5.0))), 100);
        assert_eq!(score_activity(&activity(10, 10, 0, Some(1.0))), 0);
    }

    #[test]
    fn risk_thresholds() {
        assert_eq!(classify_risk(60), RiskLevel::Healthy);
        assert_eq!(classify_risk(59), RiskLevel::AtRisk);
        assert_eq!(classify_risk(40), RiskLevel::AtRisk);
        assert_eq!(classify_risk(39), RiskLevel::Critical);
    }

    #[test]
    fn trend_needs_more_than_five_points() {
        assert_eq!(trend_from(None, 10), Trend::Stable);
        assert_eq!(trend_from(Some(50), 55), Trend::Stable);
        assert_eq!(trend_from(Some(50), 56), Trend::Improving);
        assert_eq!(trend_from(Some(50), 45), Trend::Stable);
        assert_eq!(trend_from(Some(50), 44), Trend::Declining);
    }

    #[test]
    fn identical_snapshots_score_identically() {
        let now = crate::parse_rfc3339("2026-06-01T00:00:00Z").unwrap();
        let a = activity(2, 1, 3, Some(3.4));
        let first = compute_health("c-1", &a, None, now);
        let again = compute_health("c-1", &a, None, now);
        assert_eq!(first, again);

        let rescored = compute_health("c-1", &a, Some(&first), now);
        assert_eq!(rescored.score, first.score);
        assert_eq!(rescored.trend, Trend::Stable);
    }

    #[test]
    fn alerts_for_critical_or_declining() {
        let now = crate::parse_rfc3339("2026-06-01T00:00:00Z").unwrap();
        let prior = compute_health("c-1", &activity(0, 0, 5, Some(4.0)), None, now);
        let worse = compute_health("c-1", &activity(3, 1, 5, Some(3.0)), Some(&prior), now);
        assert_eq!(worse.trend, Trend::Declining);
        assert!(needs_alert(&worse));
        assert!(!needs_alert(&prior));
    }

    #[test]
    fn activity_counts_pending_as_open() {
        let now = crate::parse_rfc3339("2026-06-01T00:00:00Z").unwrap();
        let mut t = crate::test_support::ticket_at(now);
        t.status = TicketStatus::Pending;
        let a = CustomerActivity::from_snapshot(&[t], &[4, 5]);
        assert_eq!(a.open_tickets, 1);
        assert_eq!(a.avg_csat, Some(4.5));
    }
}
