//! Human-escalation decision for AI-handled tickets.
//!
//! Rules are checked in a fixed order and the first match wins:
//! human request, security, billing dispute, repeated frustration, then
//! confidence below the calibrated threshold for the ticket's intent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ticketflow_contracts::{EscalationOutcome, EscalationReason};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

const HUMAN_REQUEST: &[&str] = &[
    "speak to a human",
    "talk to a human",
    "speak with a human",
    "talk with a human",
    "speak to a person",
    "talk to a person",
    "real person",
    "actual person",
    "human agent",
    "live agent",
    "speak to an agent",
    "talk to an agent",
    "speak to someone",
    "talk to someone",
    "speak to a representative",
    "talk to a representative",
    "speak to a manager",
    "talk to a manager",
    "not a bot",
];

const SECURITY: &[&str] = &[
    "hacked",
    "compromised",
    "unauthorized access",
    "unauthorised access",
    "someone logged into",
    "suspicious login",
    "stolen",
    "fraud",
    "phishing",
    "security breach",
    "data breach",
    "identity theft",
];

const BILLING_SUBJECT: &[&str] = &[
    "charge", "billing", "billed", "invoice", "refund", "payment", "subscription",
];

const BILLING_DISPUTE: &[&str] = &[
    "dispute",
    "wrong",
    "incorrect",
    "twice",
    "double",
    "overcharged",
    "chargeback",
    "did not authorize",
    "didn't authorize",
    "never authorized",
    "unexpected",
];

const FRUSTRATION: &[&str] = &[
    "frustrated",
    "frustrating",
    "angry",
    "annoyed",
    "ridiculous",
    "unacceptable",
    "terrible",
    "worst",
    "useless",
    "waste of time",
    "fed up",
    "still not working",
    "still broken",
];

/// Confidence thresholds handed to the policy by value at decision time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceThresholds {
    pub default: f64,
    #[serde(default)]
    pub per_intent: BTreeMap<String, f64>,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl ConfidenceThresholds {
    pub fn new(default: f64) -> Self {
        Self {
            default,
            per_intent: BTreeMap::new(),
        }
    }

    pub fn with_intents(mut self, per_intent: BTreeMap<String, f64>) -> Self {
        self.per_intent = per_intent;
        self
    }

    pub fn for_intent(&self, intent: &str) -> f64 {
        self.per_intent.get(intent).copied().unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EscalationInput<'a> {
    /// AI confidence for the pending reply; `None` skips the confidence rule.
    pub confidence: Option<f64>,
    pub message: &'a str,
    pub prior_messages: usize,
    pub intent: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct EscalationPolicy {
    pub frustration_min_prior_messages: usize,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            frustration_min_prior_messages: 3,
        }
    }
}

impl EscalationPolicy {
    pub fn evaluate(
        &self,
        input: &EscalationInput<'_>,
        thresholds: &ConfidenceThresholds,
    ) -> EscalationOutcome {
        let threshold = thresholds.for_intent(input.intent);
        let reason = self.matched_rule(input, threshold);
        EscalationOutcome {
            escalate: reason.is_some(),
            reason,
            threshold: Some(threshold),
        }
    }

    fn matched_rule(&self, input: &EscalationInput<'_>, threshold: f64) -> Option<EscalationReason> {
        let text = input.message.to_lowercase();
        if contains_any(&text, HUMAN_REQUEST) {
            return Some(EscalationReason::HumanRequested);
        }
        if contains_any(&text, SECURITY) {
            return Some(EscalationReason::SecurityConcern);
        }
        if contains_any(&text, BILLING_SUBJECT) && contains_any(&text, BILLING_DISPUTE) {
            return Some(EscalationReason::BillingDispute);
        }
        if input.prior_messages >= self.frustration_min_prior_messages
            && contains_any(&text, FRUSTRATION)
        {
            return Some(EscalationReason::CustomerFrustration);
        }
        match input.confidence {
            Some(c) if !c.is_finite() || c < threshold => Some(EscalationReason::LowConfidence),
            _ => None,
        }
    }
}

/// Convenience wrapper with the default rule settings.
pub fn evaluate_escalation(
    input: &EscalationInput<'_>,
    thresholds: &ConfidenceThresholds,
) -> EscalationOutcome {
    EscalationPolicy::default().evaluate(input, thresholds)
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(message: &str, confidence: Option<f64>, prior: usize) -> EscalationInput<'_> {
        EscalationInput {
            confidence,
            message,
            prior_messages: prior,
            intent: "general",
        }
    }

    #[test]
    fn human_request_escalates_regardless_of_confidence() {
        let out = evaluate_escalation(
            &input("I want to speak to a human", Some(0.99), 0),
            &ConfidenceThresholds::default(),
        );
        assert!(out.escalate);
        assert_eq!(out.reason, Some(EscalationReason::HumanRequested));
    }

    #[test]
    fn rules_are_checked_in_priority_order() {
        let out = evaluate_escalation(
            &input("my account was hacked, let me talk to a human", Some(0.1), 5),
            &ConfidenceThresholds::default(),
        );
        assert_eq!(out.reason, Some(EscalationReason::HumanRequested));

        let out = evaluate_escalation(
            &input("fraud on my invoice, charged twice, this is ridiculous", Some(0.1), 5),
            &ConfidenceThresholds::default(),
        );
        assert_eq!(out.reason, Some(EscalationReason::SecurityConcern));
    }

    #[test]
    fn billing_needs_both_subject_and_dispute_words() {
        let thresholds = ConfidenceThresholds::default();
        let plain = evaluate_escalation(&input("where is my invoice?", Some(0.9), 0), &thresholds);
        assert!(!plain.escalate);

        let dispute = evaluate_escalation(
            &input("I was charged twice this month", Some(0.9), 0),
            &thresholds,
        );
        assert_eq!(dispute.reason, Some(EscalationReason::BillingDispute));
    }

    #[test]
    fn frustration_requires_message_history() {
        let thresholds = ConfidenceThresholds::default();
        let early = evaluate_escalation(&input("this is useless", Some(0.9), 2), &thresholds);
        assert!(!early.escalate);
        let later = evaluate_escalation(&input("this is useless", Some(0.9), 3), &thresholds);
        assert_eq!(later.reason, Some(EscalationReason::CustomerFrustration));
    }

    #[test]
    fn low_confidence_uses_intent_threshold() {
        let thresholds = ConfidenceThresholds::new(0.7)
            .with_intents(BTreeMap::from([("billing".to_string(), 0.6)]));
        let billing = EscalationInput {
            confidence: Some(0.65),
            message: "how do I update my card",
            prior_messages: 0,
            intent: "billing",
        };
        let out = evaluate_escalation(&billing, &thresholds);
        assert!(!out.escalate);
        assert_eq!(out.threshold, Some(0.6));

        let general = EscalationInput {
            intent: "general",
            ..billing
        };
        let out = evaluate_escalation(&general, &thresholds);
        assert_eq!(out.reason, Some(EscalationReason::LowConfidence));
        assert_eq!(out.threshold, Some(0.7));
    }

    #[test]
    fn missing_confidence_skips_threshold_rule() {
        let out = evaluate_escalation(
            &input("how do I reset my password", None, 0),
            &ConfidenceThresholds::default(),
        );
        assert!(!out.escalate);
        assert_eq!(out.reason, None);
    }

    #[test]
    fn nan_confidence_escalates() {
        let out = evaluate_escalation(
            &input("hello", Some(f64::NAN), 0),
            &ConfidenceThresholds::default(),
        );
        assert_eq!(out.reason, Some(EscalationReason::LowConfidence));
    }
}
