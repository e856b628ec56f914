use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use ticketflow_contracts::{JobReport, TicketStatus};
use ticketflow_kernel::calibration::sample_for;
use ticketflow_kernel::{global_threshold, intent_thresholds, summarize_intents};

use crate::error::ServiceResult;
use crate::store::{TicketFilter, TicketStore};
use crate::AppState;

impl AppState {
    /// Recomputes per-intent thresholds from tickets resolved inside the
    /// calibration window. Intents without enough samples keep no entry;
    /// a run with no qualifying intent leaves the stored thresholds alone.
    pub async fn run_calibration(&self) -> ServiceResult<JobReport> {
        let now = self.now();
        let mut report = JobReport::new("calibration");
        let global = {
            let mut store = self.store.lock().await;
            self.calibrate(&mut **store, now, &mut report)?
        };
        match global {
            Some(global) => {
                tracing::info!(global_threshold = global, counts = ?report.counts, "calibration finished")
            }
            None => report.bump("insufficient_data"),
        }
        self.record_job(&report).await;
        Ok(report)
    }

    fn calibrate(
        &self,
        store: &mut dyn TicketStore,
        now: DateTime<Utc>,
        report: &mut JobReport,
    ) -> ServiceResult<Option<f64>> {
        let since = now - Duration::days(self.cfg.calibration.window_days);
        let default = self.cfg.escalation.default_confidence_threshold;

        let resolved = store.list_tickets(&TicketFilter {
            resolved_from: Some(since),
            ..TicketFilter::with_statuses(&[TicketStatus::Resolved])
        })?;
        let mut csat: HashMap<String, Vec<u8>> = HashMap::new();
        for feedback in store.list_feedback_since(since)? {
            csat.entry(feedback.ticket_id).or_default().push(feedback.rating);
        }

        let mut samples = Vec::new();
        for ticket in &resolved {
            let rating = csat
                .get(&ticket.id)
                .map(|r| r.iter().map(|v| f64::from(*v)).sum::<f64>() / r.len() as f64);
            let Some(sample) = sample_for(ticket, rating, default) else {
                continue;
            };
            match store.upsert_calibration_sample(&sample) {
                Ok(()) => samples.push(sample),
                Err(e) => {
                    report.bump("failed");
                    tracing::warn!(ticket_id = %ticket.id, error = %e, "calibration sample write failed");
                }
            }
        }
        report
            .counts
            .insert("samples".to_string(), samples.len() as u64);

        let rows = summarize_intents(&samples, self.cfg.calibration.min_samples);
        let Some(global) = global_threshold(&rows) else {
            return Ok(None);
        };
        for row in &rows {
            tracing::info!(
                intent = %row.intent,
                samples = row.sample_count,
                success_rate = row.success_rate,
                threshold = row.recommended_threshold,
                "intent calibrated"
            );
        }
        store.save_intent_thresholds(&intent_thresholds(&rows))?;
        report
            .counts
            .insert("intents_calibrated".to_string(), rows.len() as u64);

        for mut channel in store.list_channels()? {
            if !channel.auto_respond {
                continue;
            }
            channel.confidence_threshold = Some(global);
            match store.upsert_channel(&channel) {
                Ok(()) => report.bump("channels_updated"),
                Err(e) => {
                    report.bump("failed");
                    tracing::warn!(channel_id = %channel.id, error = %e, "channel threshold write failed");
                }
            }
        }
        Ok(Some(global))
    }
}
