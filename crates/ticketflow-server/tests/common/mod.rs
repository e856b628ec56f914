#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use ticketflow_config::{Audit, Config, Server, Store};
use ticketflow_contracts::{
    Agent, CalibrationSample, Channel, CreateAgentRequest, CreateCustomerRequest,
    CreateTicketRequest, Customer, CustomerAlert, Feedback, Handoff, HandoffStatus, HealthScore,
    Message, OutreachKind, OutreachLog, PostMessageRequest, PostMessageResponse, Priority,
    SenderKind, Ticket, TicketEvent, TicketStatus,
};
use ticketflow_kernel::{parse_rfc3339, Clock, ManualClock};
use ticketflow_server::collaborators::{
    CollaboratorError, EmailReceipt, Emailer, Generation, LanguageModel, Notification, Notifier,
    OutboundEmail, StaticLanguageModel,
};
use ticketflow_server::store::{
    shared, MemoryStore, OutreachSubject, SharedStore, StoreError, StoreResult, TicketFilter,
    TicketStore,
};
use ticketflow_server::{AppState, Collaborators};

pub const START: &str = "2026-03-02T09:00:00Z";

pub fn temp_path(name: &str, ext: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_nanos();
    std::env::temp_dir()
        .join(format!("ticketflow-{name}-{nanos}.{ext}"))
        .to_string_lossy()
        .to_string()
}

pub fn test_config() -> Config {
    Config {
        server: Server {
            listen_addr: "127.0.0.1:0".to_string(),
        },
        store: Store {
            kind: "memory".to_string(),
            sqlite_path: None,
        },
        sla: Default::default(),
        escalation: Default::default(),
        lifecycle: Default::default(),
        health: Default::default(),
        calibration: Default::default(),
        collaborators: Default::default(),
        audit: Audit {
            jsonl_path: temp_path("audit", "jsonl"),
        },
    }
}

pub fn start() -> DateTime<Utc> {
    parse_rfc3339(START).unwrap()
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn for_agent(&self, agent_id: &str) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.agent_id == agent_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn emit(&self, notification: &Notification) -> Result<(), CollaboratorError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEmailer {
    pub sent: Mutex<Vec<OutboundEmail>>,
}

impl RecordingEmailer {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Emailer for RecordingEmailer {
    async fn send(&self, email: &OutboundEmail) -> EmailReceipt {
        self.sent.lock().unwrap().push(email.clone());
        EmailReceipt::sent()
    }
}

/// Never answers inside any sane generation timeout.
pub struct SlowModel;

#[async_trait]
impl LanguageModel for SlowModel {
    async fn generate(
        &self,
        _prompt: &str,
        _context: &Value,
        _timeout: Duration,
    ) -> Result<Generation, CollaboratorError> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(Generation {
            text: "too late".to_string(),
            confidence_hint: None,
        })
    }
}

/// Memory store whose conditional ticket writes error out for the ids in
/// `failing`. Everything else passes through.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    pub failing: Arc<Mutex<Vec<String>>>,
}

impl FlakyStore {
    fn broken(&self, ticket_id: &str) -> bool {
        self.failing.lock().unwrap().iter().any(|id| id == ticket_id)
    }
}

impl TicketStore for FlakyStore {
    fn upsert_agent(&mut self, agent: &Agent) -> StoreResult<()> {
        self.inner.upsert_agent(agent)
    }
    fn get_agent(&self, id: &str) -> StoreResult<Option<Agent>> {
        self.inner.get_agent(id)
    }
    fn upsert_customer(&mut self, customer: &Customer) -> StoreResult<()> {
        self.inner.upsert_customer(customer)
    }
    fn get_customer(&self, id: &str) -> StoreResult<Option<Customer>> {
        self.inner.get_customer(id)
    }
    fn upsert_channel(&mut self, channel: &Channel) -> StoreResult<()> {
        self.inner.upsert_channel(channel)
    }
    fn get_channel(&self, id: &str) -> StoreResult<Option<Channel>> {
        self.inner.get_channel(id)
    }
    fn list_channels(&self) -> StoreResult<Vec<Channel>> {
        self.inner.list_channels()
    }
    fn insert_ticket(&mut self, ticket: &Ticket) -> StoreResult<()> {
        self.inner.insert_ticket(ticket)
    }
    fn get_ticket(&self, id: &str) -> StoreResult<Option<Ticket>> {
        self.inner.get_ticket(id)
    }
    fn update_ticket_if_status(
        &mut self,
        ticket: &mut Ticket,
        expected: &[TicketStatus],
    ) -> StoreResult<bool> {
        if self.broken(&ticket.id) {
            let cause = serde_json::from_str::<Value>("{").unwrap_err();
            return Err(StoreError::Serialization(cause));
        }
        self.inner.update_ticket_if_status(ticket, expected)
    }
    fn list_tickets(&self, filter: &TicketFilter) -> StoreResult<Vec<Ticket>> {
        self.inner.list_tickets(filter)
    }
    fn insert_message(&mut self, message: &Message) -> StoreResult<()> {
        self.inner.insert_message(message)
    }
    fn list_messages(&self, ticket_id: &str) -> StoreResult<Vec<Message>> {
        self.inner.list_messages(ticket_id)
    }
    fn insert_handoff_if_no_pending(&mut self, handoff: &Handoff) -> StoreResult<bool> {
        self.inner.insert_handoff_if_no_pending(handoff)
    }
    fn get_handoff(&self, id: &str) -> StoreResult<Option<Handoff>> {
        self.inner.get_handoff(id)
    }
    fn list_handoffs(&self, ticket_id: &str) -> StoreResult<Vec<Handoff>> {
        self.inner.list_handoffs(ticket_id)
    }
    fn update_handoff_if_status(
        &mut self,
        handoff: &Handoff,
        expected: HandoffStatus,
    ) -> StoreResult<bool> {
        self.inner.update_handoff_if_status(handoff, expected)
    }
    fn insert_ticket_event(&mut self, event: &TicketEvent) -> StoreResult<()> {
        self.inner.insert_ticket_event(event)
    }
    fn list_ticket_events(&self, ticket_id: &str) -> StoreResult<Vec<TicketEvent>> {
        self.inner.list_ticket_events(ticket_id)
    }
    fn insert_feedback(&mut self, feedback: &Feedback) -> StoreResult<()> {
        self.inner.insert_feedback(feedback)
    }
    fn list_feedback_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Feedback>> {
        self.inner.list_feedback_since(since)
    }
    fn get_health_score(&self, customer_id: &str) -> StoreResult<Option<HealthScore>> {
        self.inner.get_health_score(customer_id)
    }
    fn upsert_health_score(&mut self, score: &HealthScore) -> StoreResult<()> {
        self.inner.upsert_health_score(score)
    }
    fn insert_alert(&mut self, alert: &CustomerAlert) -> StoreResult<bool> {
        self.inner.insert_alert(alert)
    }
    fn latest_alert_at(&self, customer_id: &str) -> StoreResult<Option<DateTime<Utc>>> {
        self.inner.latest_alert_at(customer_id)
    }
    fn list_alerts(&self, customer_id: &str) -> StoreResult<Vec<CustomerAlert>> {
        self.inner.list_alerts(customer_id)
    }
    fn insert_outreach(&mut self, row: &OutreachLog) -> StoreResult<bool> {
        self.inner.insert_outreach(row)
    }
    fn last_outreach_at(
        &self,
        kind: OutreachKind,
        subject: OutreachSubject<'_>,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        self.inner.last_outreach_at(kind, subject)
    }
    fn list_outreach(&self, kind: OutreachKind) -> StoreResult<Vec<OutreachLog>> {
        self.inner.list_outreach(kind)
    }
    fn load_intent_thresholds(&self) -> StoreResult<BTreeMap<String, f64>> {
        self.inner.load_intent_thresholds()
    }
    fn save_intent_thresholds(&mut self, thresholds: &BTreeMap<String, f64>) -> StoreResult<()> {
        self.inner.save_intent_thresholds(thresholds)
    }
    fn upsert_calibration_sample(&mut self, sample: &CalibrationSample) -> StoreResult<()> {
        self.inner.upsert_calibration_sample(sample)
    }
}

pub struct Harness {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub emailer: Arc<RecordingEmailer>,
}

impl Harness {
    pub async fn new(cfg: Config) -> Self {
        Self::with_model(cfg, Arc::new(StaticLanguageModel)).await
    }

    pub async fn with_model(cfg: Config, model: Arc<dyn LanguageModel>) -> Self {
        Self::build(cfg, model, shared(MemoryStore::default())).await
    }

    pub async fn with_store(cfg: Config, store: SharedStore) -> Self {
        Self::build(cfg, Arc::new(StaticLanguageModel), store).await
    }

    async fn build(cfg: Config, model: Arc<dyn LanguageModel>, store: SharedStore) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let notifier = Arc::new(RecordingNotifier::default());
        let emailer = Arc::new(RecordingEmailer::default());
        let collaborators = Collaborators {
            model,
            notifier: notifier.clone(),
            emailer: emailer.clone(),
        };
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let state = AppState::with_parts(cfg, store, dyn_clock, collaborators)
            .await
            .unwrap();
        Self {
            state,
            clock,
            notifier,
            emailer,
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.clock.advance(by);
    }

    pub async fn agent(&self, id: &str) {
        self.state
            .register_agent(CreateAgentRequest {
                id: id.to_string(),
                name: format!("Agent {id}"),
                email: None,
            })
            .await
            .unwrap();
    }

    pub async fn customer(&self, id: &str, email: Option<&str>) {
        self.state
            .register_customer(CreateCustomerRequest {
                id: id.to_string(),
                name: format!("Customer {id}"),
                email: email.map(|e| e.to_string()),
            })
            .await
            .unwrap();
    }

    pub async fn ticket(&self, customer_id: &str, priority: Priority, tags: &[&str]) -> Ticket {
        self.state
            .create_ticket(CreateTicketRequest {
                customer_id: customer_id.to_string(),
                subject: "Cannot export invoices".to_string(),
                priority,
                channel_id: None,
                tags: tags.iter().map(|t| t.to_string()).collect(),
                body: None,
            })
            .await
            .unwrap()
    }

    pub async fn say(
        &self,
        ticket_id: &str,
        sender: SenderKind,
        body: &str,
        confidence: Option<f64>,
    ) -> PostMessageResponse {
        self.state
            .post_message(
                ticket_id,
                PostMessageRequest {
                    sender,
                    sender_id: None,
                    body: body.to_string(),
                    internal: false,
                    confidence,
                },
            )
            .await
            .unwrap()
    }

    pub async fn stored(&self, ticket_id: &str) -> Ticket {
        self.state
            .store()
            .lock()
            .await
            .get_ticket(ticket_id)
            .unwrap()
            .unwrap()
    }

    pub async fn event_kinds(&self, ticket_id: &str) -> Vec<String> {
        self.state
            .store()
            .lock()
            .await
            .list_ticket_events(ticket_id)
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect()
    }
}
