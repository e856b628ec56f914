use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use ticketflow_contracts::{
    Agent, CalibrationSample, Channel, Customer, CustomerAlert, Feedback, Handoff, HandoffStatus,
    HealthScore, Message, OutreachKind, OutreachLog, Ticket, TicketEvent, TicketStatus,
};

use super::{OutreachSubject, StoreResult, TicketFilter, TicketStore};

#[derive(Default)]
pub struct MemoryStore {
    agents: HashMap<String, Agent>,
    customers: HashMap<String, Customer>,
    channels: HashMap<String, Channel>,
    tickets: HashMap<String, Ticket>,
    messages: HashMap<String, Vec<Message>>,
    handoffs: Vec<Handoff>,
    events: Vec<TicketEvent>,
    feedback: Vec<Feedback>,
    health: HashMap<String, HealthScore>,
    alerts: Vec<CustomerAlert>,
    outreach: Vec<OutreachLog>,
    thresholds: BTreeMap<String, f64>,
    samples: HashMap<String, CalibrationSample>,
}

impl TicketStore for MemoryStore {
    fn upsert_agent(&mut self, agent: &Agent) -> StoreResult<()> {
        self.agents.insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    fn get_agent(&self, id: &str) -> StoreResult<Option<Agent>> {
        Ok(self.agents.get(id).cloned())
    }

    fn upsert_customer(&mut self, customer: &Customer) -> StoreResult<()> {
        self.customers.insert(customer.id.clone(), customer.clone());
        Ok(())
    }

    fn get_customer(&self, id: &str) -> StoreResult<Option<Customer>> {
        Ok(self.customers.get(id).cloned())
    }

    fn upsert_channel(&mut self, channel: &Channel) -> StoreResult<()> {
        self.channels.insert(channel.id.clone(), channel.clone());
        Ok(())
    }

    fn get_channel(&self, id: &str) -> StoreResult<Option<Channel>> {
        Ok(self.channels.get(id).cloned())
    }

    fn list_channels(&self) -> StoreResult<Vec<Channel>> {
        let mut out: Vec<Channel> = self.channels.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    fn insert_ticket(&mut self, ticket: &Ticket) -> StoreResult<()> {
        self.tickets.insert(ticket.id.clone(), ticket.clone());
        Ok(())
    }

    fn get_ticket(&self, id: &str) -> StoreResult<Option<Ticket>> {
        Ok(self.tickets.get(id).cloned())
    }

    fn update_ticket_if_status(
        &mut self,
        ticket: &mut Ticket,
        expected: &[TicketStatus],
    ) -> StoreResult<bool> {
        match self.tickets.get_mut(&ticket.id) {
            Some(current)
                if current.version == ticket.version && expected.contains(&current.status) =>
            {
                ticket.version += 1;
                *current = ticket.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list_tickets(&self, filter: &TicketFilter) -> StoreResult<Vec<Ticket>> {
        let mut out: Vec<Ticket> = self
            .tickets
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn insert_message(&mut self, message: &Message) -> StoreResult<()> {
        self.messages
            .entry(message.ticket_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    fn list_messages(&self, ticket_id: &str) -> StoreResult<Vec<Message>> {
        Ok(self.messages.get(ticket_id).cloned().unwrap_or_default())
    }

    fn insert_handoff_if_no_pending(&mut self, handoff: &Handoff) -> StoreResult<bool> {
        let blocked = self
            .handoffs
            .iter()
            .any(|h| h.ticket_id == handoff.ticket_id && h.status == HandoffStatus::Pending);
        if blocked {
            return Ok(false);
        }
        self.handoffs.push(handoff.clone());
        Ok(true)
    }

    fn get_handoff(&self, id: &str) -> StoreResult<Option<Handoff>> {
        Ok(self.handoffs.iter().find(|h| h.id == id).cloned())
    }

    fn list_handoffs(&self, ticket_id: &str) -> StoreResult<Vec<Handoff>> {
        Ok(self
            .handoffs
            .iter()
            .filter(|h| h.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    fn update_handoff_if_status(
        &mut self,
        handoff: &Handoff,
        expected: HandoffStatus,
    ) -> StoreResult<bool> {
        match self.handoffs.iter_mut().find(|h| h.id == handoff.id) {
            Some(current) if current.status == expected => {
                *current = handoff.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn insert_ticket_event(&mut self, event: &TicketEvent) -> StoreResult<()> {
        self.events.push(event.clone());
        Ok(())
    }

    fn list_ticket_events(&self, ticket_id: &str) -> StoreResult<Vec<TicketEvent>> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    fn insert_feedback(&mut self, feedback: &Feedback) -> StoreResult<()> {
        self.feedback.push(feedback.clone());
        Ok(())
    }

    fn list_feedback_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Feedback>> {
        Ok(self
            .feedback
            .iter()
            .filter(|f| f.created_at >= since)
            .cloned()
            .collect())
    }

    fn get_health_score(&self, customer_id: &str) -> StoreResult<Option<HealthScore>> {
        Ok(self.health.get(customer_id).cloned())
    }

    fn upsert_health_score(&mut self, score: &HealthScore) -> StoreResult<()> {
        self.health.insert(score.customer_id.clone(), score.clone());
        Ok(())
    }

    fn insert_alert(&mut self, alert: &CustomerAlert) -> StoreResult<bool> {
        if self.alerts.iter().any(|a| a.id == alert.id) {
            return Ok(false);
        }
        self.alerts.push(alert.clone());
        Ok(true)
    }

    fn latest_alert_at(&self, customer_id: &str) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self
            .alerts
            .iter()
            .filter(|a| a.customer_id == customer_id)
            .map(|a| a.created_at)
            .max())
    }

    fn list_alerts(&self, customer_id: &str) -> StoreResult<Vec<CustomerAlert>> {
        Ok(self
            .alerts
            .iter()
            .filter(|a| a.customer_id == customer_id)
            .cloned()
            .collect())
    }

    fn insert_outreach(&mut self, row: &OutreachLog) -> StoreResult<bool> {
        if self.outreach.iter().any(|o| o.id == row.id) {
            return Ok(false);
        }
        self.outreach.push(row.clone());
        Ok(true)
    }

    fn last_outreach_at(
        &self,
        kind: OutreachKind,
        subject: OutreachSubject<'_>,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self
            .outreach
            .iter()
            .filter(|o| o.kind == kind)
            .filter(|o| match subject {
                OutreachSubject::Ticket(id) => o.ticket_id.as_deref() == Some(id),
                OutreachSubject::Customer(id) => o.customer_id == id,
            })
            .map(|o| o.created_at)
            .max())
    }

    fn list_outreach(&self, kind: OutreachKind) -> StoreResult<Vec<OutreachLog>> {
        Ok(self
            .outreach
            .iter()
            .filter(|o| o.kind == kind)
            .cloned()
            .collect())
    }

    fn load_intent_thresholds(&self) -> StoreResult<BTreeMap<String, f64>> {
        Ok(self.thresholds.clone())
    }

    fn save_intent_thresholds(&mut self, thresholds: &BTreeMap<String, f64>) -> StoreResult<()> {
        self.thresholds = thresholds.clone();
        Ok(())
    }

    fn upsert_calibration_sample(&mut self, sample: &CalibrationSample) -> StoreResult<()> {
        self.samples.insert(sample.ticket_id.clone(), sample.clone());
        Ok(())
    }
}
