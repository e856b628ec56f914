use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const API_VERSION: &str = "1.0.0";

/// Intent used when a ticket carries no tags.
pub const DEFAULT_INTENT: &str = "general";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Pending,
    Escalated,
    Resolved,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::Pending => "pending",
            TicketStatus::Escalated => "escalated",
            TicketStatus::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(TicketStatus::Open),
            "pending" => Some(TicketStatus::Pending),
            "escalated" => Some(TicketStatus::Escalated),
            "resolved" => Some(TicketStatus::Resolved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    #[default]
    Ai,
    Human,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    pub id: String,
    pub customer_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    pub subject: String,
    pub status: TicketStatus,
    pub priority: Priority,
    pub queue: Queue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub first_response_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub first_response_due_at: Option<DateTime<Utc>>,
    pub first_response_breached: bool,
    #[serde(default)]
    pub resolution_due_at: Option<DateTime<Utc>>,
    pub resolution_breached: bool,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub escalated_at: Option<DateTime<Utc>>,
    pub ai_handled: bool,
    #[serde(default)]
    pub ai_confidence: Option<f64>,
    #[serde(default)]
    pub follow_up_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auto_close_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assigned_agent_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Bumped by every conditional write.
    #[serde(default)]
    pub version: u64,
}

impl Ticket {
    /// First tag, or [`DEFAULT_INTENT`] when the ticket is untagged.
    pub fn intent(&self) -> &str {
        self.tags
            .first()
            .map(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(DEFAULT_INTENT)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    Customer,
    Agent,
    Ai,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub ticket_id: String,
    pub sender: SenderKind,
    #[serde(default)]
    pub sender_id: Option<String>,
    pub body: String,
    pub internal: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    Pending,
    Accepted,
    Declined,
}

impl HandoffStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HandoffStatus::Pending => "pending",
            HandoffStatus::Accepted => "accepted",
            HandoffStatus::Declined => "declined",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandoffDecision {
    Accepted,
    Declined,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Handoff {
    pub id: String,
    pub ticket_id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub reason: String,
    pub status: HandoffStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Audit row attached to a ticket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketEvent {
    pub id: String,
    pub ticket_id: String,
    pub kind: String,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub detail: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    pub id: String,
    pub auto_respond: bool,
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feedback {
    pub id: String,
    pub ticket_id: String,
    pub customer_id: String,
    pub rating: u8,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Healthy,
    AtRisk,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthScore {
    pub customer_id: String,
    pub score: i64,
    pub risk_level: RiskLevel,
    pub trend: Trend,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerAlert {
    pub id: String,
    pub customer_id: String,
    pub kind: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutreachKind {
    FollowUp,
    Revival,
    CheckIn,
    HealthAlert,
    AutoClose,
}

impl OutreachKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutreachKind::FollowUp => "follow_up",
            OutreachKind::Revival => "revival",
            OutreachKind::CheckIn => "check_in",
            OutreachKind::HealthAlert => "health_alert",
            OutreachKind::AutoClose => "auto_close",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutreachChannel {
    Message,
    Email,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutreachLog {
    pub id: String,
    pub kind: OutreachKind,
    pub customer_id: String,
    #[serde(default)]
    pub ticket_id: Option<String>,
    pub channel: OutreachChannel,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationOutcome {
    ResolvedByAi,
    EscalatedHelpful,
    EscalatedUnnecessary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationSample {
    pub ticket_id: String,
    pub initial_confidence: f64,
    pub outcome: CalibrationOutcome,
    #[serde(default)]
    pub csat: Option<f64>,
    pub intent_category: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlaStatus {
    Ok,
    Warning,
    Breached,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlaSnapshot {
    pub due_at: DateTime<Utc>,
    pub percentage: f64,
    pub status: SlaStatus,
    pub frozen: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketSla {
    #[serde(default)]
    pub first_response: Option<SlaSnapshot>,
    #[serde(default)]
    pub resolution: Option<SlaSnapshot>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    HumanRequested,
    SecurityConcern,
    BillingDispute,
    CustomerFrustration,
    LowConfidence,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscalationOutcome {
    pub escalate: bool,
    #[serde(default)]
    pub reason: Option<EscalationReason>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateAgentRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCustomerRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChannelRequest {
    pub id: String,
    pub auto_respond: bool,
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTicketRequest {
    pub customer_id: String,
    pub subject: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Opening customer message; runs through the escalation keywords.
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostMessageRequest {
    pub sender: SenderKind,
    #[serde(default)]
    pub sender_id: Option<String>,
    pub body: String,
    #[serde(default)]
    pub internal: bool,
    /// Confidence hint attached to an AI reply.
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageResponse {
    pub message: Message,
    pub ticket: Ticket,
    #[serde(default)]
    pub escalation: Option<EscalationOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateStatusRequest {
    pub status: TicketStatus,
    #[serde(default)]
    pub actor_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedbackRequest {
    pub rating: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestHandoffRequest {
    pub from_agent: String,
    pub to_agent: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolveHandoffRequest {
    pub acting_agent: String,
    pub decision: HandoffDecision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketView {
    pub ticket: Ticket,
    pub sla: TicketSla,
}

/// Result of one job trigger: `{success, counts}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct JobReport {
    pub job: String,
    pub success: bool,
    pub counts: BTreeMap<String, u64>,
}

impl JobReport {
    pub fn new(job: &str) -> Self {
        Self {
            job: job.to_string(),
            success: true,
            counts: BTreeMap::new(),
        }
    }

    pub fn bump(&mut self, outcome: &str) {
        *self.counts.entry(outcome.to_string()).or_insert(0) += 1;
    }

    pub fn count(&self, outcome: &str) -> u64 {
        self.counts.get(outcome).copied().unwrap_or(0)
    }

    /// Folds another report's counts in under `prefix.`.
    pub fn merge_prefixed(&mut self, prefix: &str, other: JobReport) {
        self.success &= other.success;
        for (key, value) in other.counts {
            *self.counts.entry(format!("{prefix}.{key}")).or_insert(0) += value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_wire_names_are_snake_case() {
        assert_eq!(
            serde_json::to_value(TicketStatus::Escalated).unwrap(),
            json!("escalated")
        );
        assert_eq!(TicketStatus::parse("pending"), Some(TicketStatus::Pending));
        assert_eq!(TicketStatus::parse("closed"), None);
    }

    #[test]
    fn post_message_rejects_unknown_fields() {
        let err = serde_json::from_value::<PostMessageRequest>(json!({
            "sender": "customer",
            "body": "hi",
            "mood": "angry"
        }));
        assert!(err.is_err());
    }

    #[test]
    fn job_report_merges_with_prefix() {
        let mut outer = JobReport::new("follow_ups");
        let mut inner = JobReport::new("revival");
        inner.bump("revived");
        inner.bump("revived");
        inner.success = false;
        outer.merge_prefixed("revival", inner);
        assert_eq!(outer.count("revival.revived"), 2);
        assert!(!outer.success);
    }
}
