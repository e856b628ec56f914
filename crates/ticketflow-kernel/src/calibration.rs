//! Confidence-threshold calibration from resolved-ticket outcomes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ticketflow_contracts::{CalibrationOutcome, CalibrationSample, Ticket};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentCalibration {
    pub intent: String,
    pub sample_count: usize,
    pub success_rate: f64,
    #[serde(default)]
    pub avg_csat: Option<f64>,
    pub recommended_threshold: f64,
}

/// Step function over success rate (non-escalated share) and mean CSAT.
pub fn recommend_threshold(success_rate: f64, avg_csat: Option<f64>) -> f64 {
    let satisfied = avg_csat.map(|c| c >= 4.0).unwrap_or(false);
    if success_rate >= 0.9 && satisfied {
        0.6
    } else if success_rate >= 0.8 {
        0.7
    } else if success_rate >= 0.6 {
        0.8
    } else {
        0.9
    }
}

/// An escalation counts as unnecessary when the AI was already confident
/// enough to clear the default gate, so a rule other than confidence fired.
pub fn classify_outcome(
    escalated: bool,
    initial_confidence: f64,
    default_threshold: f64,
) -> CalibrationOutcome {
    if !escalated {
        CalibrationOutcome::ResolvedByAi
    } else if initial_confidence >= default_threshold {
        CalibrationOutcome::EscalatedUnnecessary
    } else {
        CalibrationOutcome::EscalatedHelpful
    }
}

/// Sample for a resolved ticket, or `None` when the AI never scored it.
pub fn sample_for(
    ticket: &Ticket,
    csat: Option<f64>,
    default_threshold: f64,
) -> Option<CalibrationSample> {
    let confidence = ticket.ai_confidence?;
    Some(CalibrationSample {
        ticket_id: ticket.id.clone(),
        initial_confidence: confidence,
        outcome: classify_outcome(ticket.escalated_at.is_some(), confidence, default_threshold),
        csat,
        intent_category: ticket.intent().to_string(),
    })
}

/// Per-intent recommendation for every intent with at least `min_samples`.
pub fn summarize_intents(samples: &[CalibrationSample], min_samples: usize) -> Vec<IntentCalibration> {
    let mut grouped: BTreeMap<&str, Vec<&CalibrationSample>> = BTreeMap::new();
    for sample in samples {
        grouped
            .entry(sample.intent_category.as_str())
            .or_default()
            .push(sample);
    }

    grouped
        .into_iter()
        .filter(|(_, rows)| rows.len() >= min_samples.max(1))
        .map(|(intent, rows)| {
            let successes = rows
                .iter()
                .filter(|s| s.outcome == CalibrationOutcome::ResolvedByAi)
                .count();
            let success_rate = successes as f64 / rows.len() as f64;
            let ratings: Vec<f64> = rows.iter().filter_map(|s| s.csat).collect();
            let avg_csat = if ratings.is_empty() {
                None
            } else {
                Some(ratings.iter().sum::<f64>() / ratings.len() as f64)
            };
            IntentCalibration {
                intent: intent.to_string(),
                sample_count: rows.len(),
                success_rate,
                avg_csat,
                recommended_threshold: recommend_threshold(success_rate, avg_csat),
            }
        })
        .collect()
}

/// Mean recommendation across intents, rounded to three places.
pub fn global_threshold(rows: &[IntentCalibration]) -> Option<f64> {
    if rows.is_empty() {
        return None;
    }
    let mean = rows.iter().map(|r| r.recommended_threshold).sum::<f64>() / rows.len() as f64;
    Some((mean * 1000.0).round() / 1000.0)
}

pub fn intent_thresholds(rows: &[IntentCalibration]) -> BTreeMap<String, f64> {
    rows.iter()
        .map(|r| (r.intent.clone(), r.recommended_threshold))
        .collect()
}
