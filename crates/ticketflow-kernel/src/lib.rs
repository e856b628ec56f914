pub mod calibration;
pub mod clock;
pub mod escalation;
pub mod health;
pub mod lifecycle;
pub mod sla;

pub use calibration::{
    global_threshold, intent_thresholds, recommend_threshold, summarize_intents, IntentCalibration,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use escalation::{
    evaluate_escalation, ConfidenceThresholds, EscalationInput, EscalationPolicy,
    DEFAULT_CONFIDENCE_THRESHOLD,
};
pub use health::{
    classify_risk, compute_health, needs_alert, score_activity, trend_from, CustomerActivity,
};
pub use lifecycle::{apply, transition, LifecycleEvent, Transition, TransitionError};
pub use sla::{capture_breach, overdue_flags, sla_snapshot, ticket_sla, SlaTarget, SlaTargets};

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use ticketflow_contracts::OutreachKind;

pub fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|v| v.with_timezone(&Utc))
}

/// Days since the unix epoch, in UTC.
pub fn day_bucket(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(86_400)
}

/// Index of the `window`-wide slot containing `at`. A zero or negative
/// window collapses to one-day slots.
pub fn window_bucket(at: DateTime<Utc>, window: Duration) -> i64 {
    let secs = window.num_seconds().max(86_400);
    at.timestamp().div_euclid(secs)
}

/// Deterministic outreach row id: one row per (kind, subject, window).
pub fn stable_outreach_id(kind: OutreachKind, subject_id: &str, bucket: i64) -> String {
    hash_id("out", &[kind.as_str(), subject_id, &bucket.to_string()])
}

pub fn stable_alert_id(customer_id: &str, bucket: i64) -> String {
    hash_id("alert", &[customer_id, &bucket.to_string()])
}

pub fn stable_sample_id(ticket_id: &str) -> String {
    hash_id("cal", &[ticket_id])
}

fn hash_id(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    let digest = hasher.finalize();
    let short: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("{prefix}_{short}")
}
