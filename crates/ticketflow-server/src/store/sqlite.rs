use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use ticketflow_contracts::{
    Agent, CalibrationSample, Channel, Customer, CustomerAlert, Feedback, Handoff, HandoffStatus,
    HealthScore, Message, OutreachKind, OutreachLog, Ticket, TicketEvent, TicketStatus,
};

use super::{OutreachSubject, StoreResult, TicketFilter, TicketStore};

/// Records are stored as JSON next to the columns used for lookups and
/// conditional writes.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new(path: &str) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                record_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS customers (
                id TEXT PRIMARY KEY,
                record_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS channels (
                id TEXT PRIMARY KEY,
                record_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS tickets (
                id TEXT PRIMARY KEY,
                customer_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_ms INTEGER NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                record_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS tickets_status ON tickets(status, created_ms);
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                ticket_id TEXT NOT NULL,
                record_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS messages_ticket ON messages(ticket_id);
            CREATE TABLE IF NOT EXISTS handoffs (
                id TEXT PRIMARY KEY,
                ticket_id TEXT NOT NULL,
                status TEXT NOT NULL,
                record_json TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS handoffs_one_pending
                ON handoffs(ticket_id) WHERE status = 'pending';
            CREATE TABLE IF NOT EXISTS ticket_events (
                id TEXT PRIMARY KEY,
                ticket_id TEXT NOT NULL,
                record_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS feedback (
                id TEXT PRIMARY KEY,
                created_ms INTEGER NOT NULL,
                record_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS health_scores (
                customer_id TEXT PRIMARY KEY,
                record_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS customer_alerts (
                id TEXT PRIMARY KEY,
                customer_id TEXT NOT NULL,
                created_ms INTEGER NOT NULL,
                record_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS outreach_log (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                customer_id TEXT NOT NULL,
                ticket_id TEXT,
                created_ms INTEGER NOT NULL,
                record_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS intent_thresholds (
                intent TEXT PRIMARY KEY,
                threshold REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS calibration_samples (
                ticket_id TEXT PRIMARY KEY,
                record_json TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self { conn })
    }

    fn upsert_json<T: Serialize>(&self, table: &str, id: &str, record: &T) -> StoreResult<()> {
        let json = serde_json::to_string(record)?;
        self.conn.execute(
            &format!("INSERT OR REPLACE INTO {table}(id, record_json) VALUES (?1, ?2)"),
            params![id, json],
        )?;
        Ok(())
    }

    fn query_one<T: DeserializeOwned, P: Params>(&self, sql: &str, p: P) -> StoreResult<Option<T>> {
        let json: Option<String> = self
            .conn
            .query_row(sql, p, |row| row.get(0))
            .optional()?;
        match json {
            Some(v) => Ok(Some(serde_json::from_str(&v)?)),
            None => Ok(None),
        }
    }

    fn query_all<T: DeserializeOwned, P: Params>(&self, sql: &str, p: P) -> StoreResult<Vec<T>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(p, |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for json in rows {
            out.push(serde_json::from_str(&json?)?);
        }
        Ok(out)
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn status_list(statuses: &[TicketStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

impl TicketStore for SqliteStore {
    fn upsert_agent(&mut self, agent: &Agent) -> StoreResult<()> {
        self.upsert_json("agents", &agent.id, agent)
    }

    fn get_agent(&self, id: &str) -> StoreResult<Option<Agent>> {
        self.query_one("SELECT record_json FROM agents WHERE id = ?1", params![id])
    }

    fn upsert_customer(&mut self, customer: &Customer) -> StoreResult<()> {
        self.upsert_json("customers", &customer.id, customer)
    }

    fn get_customer(&self, id: &str) -> StoreResult<Option<Customer>> {
        self.query_one("SELECT record_json FROM customers WHERE id = ?1", params![id])
    }

    fn upsert_channel(&mut self, channel: &Channel) -> StoreResult<()> {
        self.upsert_json("channels", &channel.id, channel)
    }

    fn get_channel(&self, id: &str) -> StoreResult<Option<Channel>> {
        self.query_one("SELECT record_json FROM channels WHERE id = ?1", params![id])
    }

    fn list_channels(&self) -> StoreResult<Vec<Channel>> {
        self.query_all("SELECT record_json FROM channels ORDER BY id", [])
    }

    fn insert_ticket(&mut self, ticket: &Ticket) -> StoreResult<()> {
        let json = serde_json::to_string(ticket)?;
        self.conn.execute(
            "INSERT INTO tickets(id, customer_id, status, created_ms, version, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ticket.id,
                ticket.customer_id,
                ticket.status.as_str(),
                millis(ticket.created_at),
                ticket.version as i64,
                json
            ],
        )?;
        Ok(())
    }

    fn get_ticket(&self, id: &str) -> StoreResult<Option<Ticket>> {
        self.query_one("SELECT record_json FROM tickets WHERE id = ?1", params![id])
    }

    fn update_ticket_if_status(
        &mut self,
        ticket: &mut Ticket,
        expected: &[TicketStatus],
    ) -> StoreResult<bool> {
        if expected.is_empty() {
            return Ok(false);
        }
        let seen = ticket.version;
        let next = Ticket {
            version: seen + 1,
            ..ticket.clone()
        };
        let json = serde_json::to_string(&next)?;
        let changed = self.conn.execute(
            &format!(
                "UPDATE tickets SET status = ?1, version = ?2, record_json = ?3
                 WHERE id = ?4 AND version = ?5 AND status IN ({})",
                status_list(expected)
            ),
            params![
                next.status.as_str(),
                next.version as i64,
                json,
                next.id,
                seen as i64
            ],
        )?;
        if changed == 1 {
            ticket.version = next.version;
        }
        Ok(changed == 1)
    }

    fn list_tickets(&self, filter: &TicketFilter) -> StoreResult<Vec<Ticket>> {
        let mut sql = "SELECT record_json FROM tickets".to_string();
        if !filter.statuses.is_empty() {
            sql.push_str(&format!(" WHERE status IN ({})", status_list(&filter.statuses)));
        }
        sql.push_str(" ORDER BY created_ms, id");
        let mut rows: Vec<Ticket> = self.query_all(&sql, [])?;
        // created_ms drops sub-millisecond precision the cursor compares on.
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let matching = rows.into_iter().filter(|t| filter.matches(t));
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    fn insert_message(&mut self, message: &Message) -> StoreResult<()> {
        let json = serde_json::to_string(message)?;
        self.conn.execute(
            "INSERT INTO messages(id, ticket_id, record_json) VALUES (?1, ?2, ?3)",
            params![message.id, message.ticket_id, json],
        )?;
        Ok(())
    }

    fn list_messages(&self, ticket_id: &str) -> StoreResult<Vec<Message>> {
        self.query_all(
            "SELECT record_json FROM messages WHERE ticket_id = ?1 ORDER BY rowid",
            params![ticket_id],
        )
    }

    fn insert_handoff_if_no_pending(&mut self, handoff: &Handoff) -> StoreResult<bool> {
        let json = serde_json::to_string(handoff)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO handoffs(id, ticket_id, status, record_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![handoff.id, handoff.ticket_id, handoff.status.as_str(), json],
        )?;
        Ok(inserted == 1)
    }

    fn get_handoff(&self, id: &str) -> StoreResult<Option<Handoff>> {
        self.query_one("SELECT record_json FROM handoffs WHERE id = ?1", params![id])
    }

    fn list_handoffs(&self, ticket_id: &str) -> StoreResult<Vec<Handoff>> {
        self.query_all(
            "SELECT record_json FROM handoffs WHERE ticket_id = ?1 ORDER BY rowid",
            params![ticket_id],
        )
    }

    fn update_handoff_if_status(
        &mut self,
        handoff: &Handoff,
        expected: HandoffStatus,
    ) -> StoreResult<bool> {
        let json = serde_json::to_string(handoff)?;
        let changed = self.conn.execute(
            "UPDATE handoffs SET status = ?1, record_json = ?2 WHERE id = ?3 AND status = ?4",
            params![handoff.status.as_str(), json, handoff.id, expected.as_str()],
        )?;
        Ok(changed == 1)
    }

    fn insert_ticket_event(&mut self, event: &TicketEvent) -> StoreResult<()> {
        let json = serde_json::to_string(event)?;
        self.conn.execute(
            "INSERT INTO ticket_events(id, ticket_id, record_json) VALUES (?1, ?2, ?3)",
            params![event.id, event.ticket_id, json],
        )?;
        Ok(())
    }

    fn list_ticket_events(&self, ticket_id: &str) -> StoreResult<Vec<TicketEvent>> {
        self.query_all(
            "SELECT record_json FROM ticket_events WHERE ticket_id = ?1 ORDER BY rowid",
            params![ticket_id],
        )
    }

    fn insert_feedback(&mut self, feedback: &Feedback) -> StoreResult<()> {
        let json = serde_json::to_string(feedback)?;
        self.conn.execute(
            "INSERT INTO feedback(id, created_ms, record_json) VALUES (?1, ?2, ?3)",
            params![feedback.id, millis(feedback.created_at), json],
        )?;
        Ok(())
    }

    fn list_feedback_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Feedback>> {
        self.query_all(
            "SELECT record_json FROM feedback WHERE created_ms >= ?1 ORDER BY rowid",
            params![millis(since)],
        )
    }

    fn get_health_score(&self, customer_id: &str) -> StoreResult<Option<HealthScore>> {
        self.query_one(
            "SELECT record_json FROM health_scores WHERE customer_id = ?1",
            params![customer_id],
        )
    }

    fn upsert_health_score(&mut self, score: &HealthScore) -> StoreResult<()> {
        let json = serde_json::to_string(score)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO health_scores(customer_id, record_json) VALUES (?1, ?2)",
            params![score.customer_id, json],
        )?;
        Ok(())
    }

    fn insert_alert(&mut self, alert: &CustomerAlert) -> StoreResult<bool> {
        let json = serde_json::to_string(alert)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO customer_alerts(id, customer_id, created_ms, record_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![alert.id, alert.customer_id, millis(alert.created_at), json],
        )?;
        Ok(inserted == 1)
    }

    fn latest_alert_at(&self, customer_id: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let latest: Option<CustomerAlert> = self.query_one(
            "SELECT record_json FROM customer_alerts WHERE customer_id = ?1
             ORDER BY created_ms DESC LIMIT 1",
            params![customer_id],
        )?;
        Ok(latest.map(|a| a.created_at))
    }

    fn list_alerts(&self, customer_id: &str) -> StoreResult<Vec<CustomerAlert>> {
        self.query_all(
            "SELECT record_json FROM customer_alerts WHERE customer_id = ?1 ORDER BY created_ms",
            params![customer_id],
        )
    }

    fn insert_outreach(&mut self, row: &OutreachLog) -> StoreResult<bool> {
        let json = serde_json::to_string(row)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO outreach_log(id, kind, customer_id, ticket_id, created_ms, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.id,
                row.kind.as_str(),
                row.customer_id,
                row.ticket_id,
                millis(row.created_at),
                json
            ],
        )?;
        Ok(inserted == 1)
    }

    fn last_outreach_at(
        &self,
        kind: OutreachKind,
        subject: OutreachSubject<'_>,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let (column, id) = match subject {
            OutreachSubject::Ticket(id) => ("ticket_id", id),
            OutreachSubject::Customer(id) => ("customer_id", id),
        };
        let latest: Option<OutreachLog> = self.query_one(
            &format!(
                "SELECT record_json FROM outreach_log WHERE kind = ?1 AND {column} = ?2
                 ORDER BY created_ms DESC LIMIT 1"
            ),
            params![kind.as_str(), id],
        )?;
        Ok(latest.map(|o| o.created_at))
    }

    fn list_outreach(&self, kind: OutreachKind) -> StoreResult<Vec<OutreachLog>> {
        self.query_all(
            "SELECT record_json FROM outreach_log WHERE kind = ?1 ORDER BY created_ms, id",
            params![kind.as_str()],
        )
    }

    fn load_intent_thresholds(&self) -> StoreResult<BTreeMap<String, f64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT intent, threshold FROM intent_thresholds")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (intent, threshold) = row?;
            out.insert(intent, threshold);
        }
        Ok(out)
    }

    fn save_intent_thresholds(&mut self, thresholds: &BTreeMap<String, f64>) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM intent_thresholds", [])?;
        for (intent, threshold) in thresholds {
            tx.execute(
                "INSERT INTO intent_thresholds(intent, threshold) VALUES (?1, ?2)",
                params![intent, threshold],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn upsert_calibration_sample(&mut self, sample: &CalibrationSample) -> StoreResult<()> {
        let json = serde_json::to_string(sample)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO calibration_samples(ticket_id, record_json) VALUES (?1, ?2)",
            params![sample.ticket_id, json],
        )?;
        Ok(())
    }
}
