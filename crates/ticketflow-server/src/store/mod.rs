//! Ticket store: the transactional CRUD and conditional-update seam.
//!
//! Every backend hands back the same typed records from
//! `ticketflow-contracts`; joined or partial shapes never leak past here.
//! Mutual exclusion for handoffs and status changes lives in the
//! conditional operations (`*_if_status`, `insert_handoff_if_no_pending`),
//! not in callers.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use ticketflow_config::Config;
use ticketflow_contracts::{
    Agent, CalibrationSample, Channel, Customer, CustomerAlert, Feedback, Handoff, HandoffStatus,
    HealthScore, Message, OutreachKind, OutreachLog, Ticket, TicketEvent, TicketStatus,
};
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub type SharedStore = Arc<Mutex<Box<dyn TicketStore>>>;

pub fn shared(store: impl TicketStore + 'static) -> SharedStore {
    Arc::new(Mutex::new(Box::new(store)))
}

pub fn open_store(cfg: &Config) -> Result<SharedStore, String> {
    if cfg.store.kind == "sqlite" {
        let sqlite_path = cfg
            .store
            .sqlite_path
            .clone()
            .ok_or_else(|| "store.sqlite_path is required for sqlite store".to_string())?;
        Ok(shared(SqliteStore::new(&sqlite_path).map_err(|e| e.to_string())?))
    } else {
        Ok(shared(MemoryStore::default()))
    }
}

/// Candidate selection for tickets. Empty `statuses` means any status.
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub statuses: Vec<TicketStatus>,
    pub customer_id: Option<String>,
    pub follow_up_before: Option<DateTime<Utc>>,
    pub auto_close_before: Option<DateTime<Utc>>,
    pub resolved_from: Option<DateTime<Utc>>,
    pub resolved_until: Option<DateTime<Utc>>,
    /// Created or updated at or after this instant.
    pub active_since: Option<DateTime<Utc>>,
    /// Paging cursor: only tickets ordered strictly after this
    /// `(created_at, id)` pair.
    pub after: Option<(DateTime<Utc>, String)>,
    pub limit: Option<usize>,
}

impl TicketFilter {
    pub fn with_statuses(statuses: &[TicketStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Default::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, ticket: &Ticket) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&ticket.status) {
            return false;
        }
        if let Some(customer_id) = &self.customer_id {
            if &ticket.customer_id != customer_id {
                return false;
            }
        }
        if let Some(before) = self.follow_up_before {
            match ticket.follow_up_at {
                Some(at) if at < before => {}
                _ => return false,
            }
        }
        if let Some(before) = self.auto_close_before {
            match ticket.auto_close_at {
                Some(at) if at < before => {}
                _ => return false,
            }
        }
        if self.resolved_from.is_some() || self.resolved_until.is_some() {
            let Some(resolved_at) = ticket.resolved_at else {
                return false;
            };
            if self.resolved_from.map(|from| resolved_at < from).unwrap_or(false) {
                return false;
            }
            if self.resolved_until.map(|until| resolved_at >= until).unwrap_or(false) {
                return false;
            }
        }
        if let Some(since) = self.active_since {
            if ticket.created_at < since && ticket.updated_at < since {
                return false;
            }
        }
        if let Some((created_at, id)) = &self.after {
            if (ticket.created_at, ticket.id.as_str()) <= (*created_at, id.as_str()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutreachSubject<'a> {
    Ticket(&'a str),
    Customer(&'a str),
}

pub trait TicketStore: Send {
    fn upsert_agent(&mut self, agent: &Agent) -> StoreResult<()>;
    fn get_agent(&self, id: &str) -> StoreResult<Option<Agent>>;
    fn upsert_customer(&mut self, customer: &Customer) -> StoreResult<()>;
    fn get_customer(&self, id: &str) -> StoreResult<Option<Customer>>;
    fn upsert_channel(&mut self, channel: &Channel) -> StoreResult<()>;
    fn get_channel(&self, id: &str) -> StoreResult<Option<Channel>>;
    fn list_channels(&self) -> StoreResult<Vec<Channel>>;

    fn insert_ticket(&mut self, ticket: &Ticket) -> StoreResult<()>;
    fn get_ticket(&self, id: &str) -> StoreResult<Option<Ticket>>;
    /// Writes `ticket` only if the stored status is one of `expected` and the
    /// stored version still equals `ticket.version`. On success the version
    /// is bumped on both the stored row and `ticket`.
    fn update_ticket_if_status(
        &mut self,
        ticket: &mut Ticket,
        expected: &[TicketStatus],
    ) -> StoreResult<bool>;
    /// Matching tickets ordered by creation time, then id.
    fn list_tickets(&self, filter: &TicketFilter) -> StoreResult<Vec<Ticket>>;

    fn insert_message(&mut self, message: &Message) -> StoreResult<()>;
    /// Messages in posting order.
    fn list_messages(&self, ticket_id: &str) -> StoreResult<Vec<Message>>;

    /// Inserts `handoff` unless the ticket already has a pending one.
    fn insert_handoff_if_no_pending(&mut self, handoff: &Handoff) -> StoreResult<bool>;
    fn get_handoff(&self, id: &str) -> StoreResult<Option<Handoff>>;
    fn list_handoffs(&self, ticket_id: &str) -> StoreResult<Vec<Handoff>>;
    /// Compare-and-swap on handoff status.
    fn update_handoff_if_status(
        &mut self,
        handoff: &Handoff,
        expected: HandoffStatus,
    ) -> StoreResult<bool>;

    fn insert_ticket_event(&mut self, event: &TicketEvent) -> StoreResult<()>;
    fn list_ticket_events(&self, ticket_id: &str) -> StoreResult<Vec<TicketEvent>>;

    fn insert_feedback(&mut self, feedback: &Feedback) -> StoreResult<()>;
    fn list_feedback_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Feedback>>;

    fn get_health_score(&self, customer_id: &str) -> StoreResult<Option<HealthScore>>;
    fn upsert_health_score(&mut self, score: &HealthScore) -> StoreResult<()>;

    /// Returns false when an alert with the same id already exists.
    fn insert_alert(&mut self, alert: &CustomerAlert) -> StoreResult<bool>;
    fn latest_alert_at(&self, customer_id: &str) -> StoreResult<Option<DateTime<Utc>>>;
    fn list_alerts(&self, customer_id: &str) -> StoreResult<Vec<CustomerAlert>>;

    /// Returns false when a row with the same id already exists.
    fn insert_outreach(&mut self, row: &OutreachLog) -> StoreResult<bool>;
    fn last_outreach_at(
        &self,
        kind: OutreachKind,
        subject: OutreachSubject<'_>,
    ) -> StoreResult<Option<DateTime<Utc>>>;
    fn list_outreach(&self, kind: OutreachKind) -> StoreResult<Vec<OutreachLog>>;

    fn load_intent_thresholds(&self) -> StoreResult<BTreeMap<String, f64>>;
    /// Replaces the whole per-intent map.
    fn save_intent_thresholds(&mut self, thresholds: &BTreeMap<String, f64>) -> StoreResult<()>;
    fn upsert_calibration_sample(&mut self, sample: &CalibrationSample) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ticketflow_contracts::{Priority, Queue};

    fn ticket(id: &str, status: TicketStatus, created_at: DateTime<Utc>) -> Ticket {
        Ticket {
            id: id.to_string(),
            customer_id: "c-1".to_string(),
            channel_id: None,
            subject: "s".to_string(),
            status,
            priority: Priority::Medium,
            queue: Queue::Ai,
            created_at,
            updated_at: created_at,
            first_response_at: None,
            first_response_due_at: None,
            first_response_breached: false,
            resolution_due_at: None,
            resolution_breached: false,
            resolved_at: None,
            escalated_at: None,
            ai_handled: true,
            ai_confidence: None,
            follow_up_at: None,
            auto_close_at: None,
            assigned_agent_id: None,
            tags: vec![],
            version: 0,
        }
    }

    fn handoff(id: &str, ticket_id: &str, created_at: DateTime<Utc>) -> Handoff {
        Handoff {
            id: id.to_string(),
            ticket_id: ticket_id.to_string(),
            from_agent: "a".to_string(),
            to_agent: "b".to_string(),
            reason: "shift change".to_string(),
            status: HandoffStatus::Pending,
            created_at,
            accepted_at: None,
            resolved_at: None,
        }
    }

    fn now() -> DateTime<Utc> {
        ticketflow_kernel::parse_rfc3339("2026-04-01T12:00:00Z").unwrap()
    }

    fn conditional_ticket_update(store: &mut dyn TicketStore) {
        let mut t = ticket("t-1", TicketStatus::Open, now());
        store.insert_ticket(&t).unwrap();

        let mut stale = t.clone();
        t.status = TicketStatus::Pending;
        assert!(store
            .update_ticket_if_status(&mut t, &[TicketStatus::Open])
            .unwrap());
        assert_eq!(t.version, 1);
        t.status = TicketStatus::Resolved;
        assert!(!store
            .update_ticket_if_status(&mut t, &[TicketStatus::Open])
            .unwrap());
        assert_eq!(t.version, 1);

        // Right status, but read before the first write landed.
        stale.assigned_agent_id = Some("agent-late".to_string());
        assert!(!store
            .update_ticket_if_status(&mut stale, &[TicketStatus::Open, TicketStatus::Pending])
            .unwrap());

        let stored = store.get_ticket("t-1").unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Pending);
        assert_eq!(stored.version, 1);
        assert_eq!(stored.assigned_agent_id, None);
    }

    fn one_pending_handoff_per_ticket(store: &mut dyn TicketStore) {
        assert!(store
            .insert_handoff_if_no_pending(&handoff("h-1", "t-9", now()))
            .unwrap());
        assert!(!store
            .insert_handoff_if_no_pending(&handoff("h-2", "t-9", now()))
            .unwrap());

        let mut first = store.get_handoff("h-1").unwrap().unwrap();
        first.status = HandoffStatus::Accepted;
        assert!(store
            .update_handoff_if_status(&first, HandoffStatus::Pending)
            .unwrap());
        assert!(!store
            .update_handoff_if_status(&first, HandoffStatus::Pending)
            .unwrap());

        assert!(store
            .insert_handoff_if_no_pending(&handoff("h-3", "t-9", now()))
            .unwrap());
        let pending = store
            .list_handoffs("t-9")
            .unwrap()
            .into_iter()
            .filter(|h| h.status == HandoffStatus::Pending)
            .count();
        assert_eq!(pending, 1);
    }

    fn filters_and_ordering(store: &mut dyn TicketStore) {
        let base = now();
        let mut a = ticket("t-a", TicketStatus::Pending, base);
        a.follow_up_at = Some(base - Duration::hours(1));
        let mut b = ticket("t-b", TicketStatus::Open, base - Duration::hours(2));
        b.follow_up_at = Some(base - Duration::minutes(5));
        let mut c = ticket("t-c", TicketStatus::Escalated, base - Duration::hours(3));
        c.follow_up_at = Some(base - Duration::minutes(5));
        let d = ticket("t-d", TicketStatus::Open, base - Duration::hours(4));
        for t in [&a, &b, &c, &d] {
            store.insert_ticket(t).unwrap();
        }

        let filter = TicketFilter {
            follow_up_before: Some(base),
            ..TicketFilter::with_statuses(&[TicketStatus::Open, TicketStatus::Pending])
        };
        let ids: Vec<String> = store
            .list_tickets(&filter)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["t-b".to_string(), "t-a".to_string()]);

        let limited = store.list_tickets(&filter.clone().limit(1)).unwrap();
        assert_eq!(limited.len(), 1);

        let next = TicketFilter {
            after: Some((limited[0].created_at, limited[0].id.clone())),
            ..filter.clone()
        };
        let rest: Vec<String> = store
            .list_tickets(&next.limit(1))
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(rest, vec!["t-a".to_string()]);

        let everything = TicketFilter::default();
        let last = store.list_tickets(&everything).unwrap().pop().unwrap();
        let past_end = TicketFilter {
            after: Some((last.created_at, last.id)),
            ..everything
        };
        assert!(store.list_tickets(&past_end).unwrap().is_empty());
    }

    fn outreach_dedup(store: &mut dyn TicketStore) {
        let row = OutreachLog {
            id: "out_1".to_string(),
            kind: OutreachKind::Revival,
            customer_id: "c-1".to_string(),
            ticket_id: Some("t-1".to_string()),
            channel: ticketflow_contracts::OutreachChannel::Message,
            created_at: now(),
        };
        assert!(store.insert_outreach(&row).unwrap());
        assert!(!store.insert_outreach(&row).unwrap());
        assert_eq!(
            store
                .last_outreach_at(OutreachKind::Revival, OutreachSubject::Ticket("t-1"))
                .unwrap(),
            Some(now())
        );
        assert_eq!(
            store
                .last_outreach_at(OutreachKind::CheckIn, OutreachSubject::Ticket("t-1"))
                .unwrap(),
            None
        );
        assert!(store
            .last_outreach_at(OutreachKind::Revival, OutreachSubject::Customer("c-1"))
            .unwrap()
            .is_some());
    }

    fn thresholds_replace(store: &mut dyn TicketStore) {
        let first = BTreeMap::from([("billing".to_string(), 0.6), ("general".to_string(), 0.8)]);
        store.save_intent_thresholds(&first).unwrap();
        let second = BTreeMap::from([("billing".to_string(), 0.7)]);
        store.save_intent_thresholds(&second).unwrap();
        assert_eq!(store.load_intent_thresholds().unwrap(), second);
    }

    fn run_all(store: &mut dyn TicketStore) {
        conditional_ticket_update(store);
        one_pending_handoff_per_ticket(store);
        filters_and_ordering(store);
        outreach_dedup(store);
        thresholds_replace(store);
    }

    #[test]
    fn memory_store_contract() {
        let mut store = MemoryStore::default();
        run_all(&mut store);
    }

    #[test]
    fn sqlite_store_contract() {
        let mut store = SqliteStore::new(":memory:").unwrap();
        run_all(&mut store);
    }

    fn temp_db(name: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("ticketflow-{name}-{nanos}.db"));
        path.to_string_lossy().to_string()
    }

    #[test]
    fn sqlite_store_survives_reopen() {
        let path = temp_db("store");
        {
            let mut store = SqliteStore::new(&path).unwrap();
            store
                .insert_ticket(&ticket("t-keep", TicketStatus::Open, now()))
                .unwrap();
        }
        let store = SqliteStore::new(&path).unwrap();
        assert!(store.get_ticket("t-keep").unwrap().is_some());
    }

    #[test]
    fn sqlite_writers_sharing_a_file_do_not_lose_updates() {
        let path = temp_db("shared");
        let mut first = SqliteStore::new(&path).unwrap();
        let mut second = SqliteStore::new(&path).unwrap();
        first
            .insert_ticket(&ticket("t-race", TicketStatus::Open, now()))
            .unwrap();

        let mut from_first = first.get_ticket("t-race").unwrap().unwrap();
        let mut from_second = second.get_ticket("t-race").unwrap().unwrap();

        from_second.assigned_agent_id = Some("agent-b".to_string());
        assert!(second
            .update_ticket_if_status(&mut from_second, &[TicketStatus::Open])
            .unwrap());

        from_first.follow_up_at = Some(now());
        assert!(!first
            .update_ticket_if_status(&mut from_first, &[TicketStatus::Open])
            .unwrap());

        let stored = first.get_ticket("t-race").unwrap().unwrap();
        assert_eq!(stored.assigned_agent_id.as_deref(), Some("agent-b"));
        assert_eq!(stored.follow_up_at, None);
        assert_eq!(stored.version, 1);
    }
}
