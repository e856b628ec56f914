//! Hash-chained JSONL audit trail for request operations and job runs.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct AuditJsonl {
    file: Arc<Mutex<tokio::fs::File>>,
    sqlite: Option<Arc<Mutex<Connection>>>,
    last_hash: Arc<Mutex<Option<String>>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditRecord {
    pub audit_id: String,
    pub subject_id: String,
    pub operation: String,
    pub result: String,
    pub reason_code: String,
    pub ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    pub record_hash: String,
}

impl AuditRecord {
    pub fn new(
        subject_id: &str,
        operation: &str,
        result: &str,
        reason_code: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            audit_id: format!("audit_{}", uuid::Uuid::new_v4().as_simple()),
            subject_id: subject_id.to_string(),
            operation: operation.to_string(),
            result: result.to_string(),
            reason_code: reason_code.to_string(),
            ts: now.to_rfc3339(),
            detail: None,
            prev_hash: None,
            record_hash: String::new(),
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

impl AuditJsonl {
    pub async fn new(path: &str, sqlite_path: Option<&str>) -> Result<Self, String> {
        let last_hash = std::fs::read_to_string(path).ok().and_then(|text| {
            text.lines().rev().find_map(|line| {
                serde_json::from_str::<Value>(line).ok().and_then(|v| {
                    v.get("record_hash")
                        .and_then(|hash| hash.as_str())
                        .map(|s| s.to_string())
                })
            })
        });

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| e.to_string())?;

        let sqlite = match sqlite_path {
            Some(path) => {
                let conn = Connection::open(path).map_err(|e| e.to_string())?;
                conn.execute_batch(
                    "
                    CREATE TABLE IF NOT EXISTS audit_records (
                        audit_id TEXT PRIMARY KEY,
                        subject_id TEXT NOT NULL,
                        operation TEXT NOT NULL,
                        result TEXT NOT NULL,
                        reason_code TEXT NOT NULL,
                        ts TEXT NOT NULL,
                        record_json TEXT NOT NULL
                    );
                    ",
                )
                .map_err(|e| e.to_string())?;
                Some(Arc::new(Mutex::new(conn)))
            }
            None => None,
        };

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            sqlite,
            last_hash: Arc::new(Mutex::new(last_hash)),
        })
    }

    /// Best effort: a failed audit write never fails the operation it records.
    pub async fn append(&self, mut rec: AuditRecord) {
        // Held across the write so concurrent appends keep the chain linear.
        let mut last_hash = self.last_hash.lock().await;
        rec.prev_hash = last_hash.clone();
        match seal(&rec) {
            Ok(hash) => rec.record_hash = hash,
            Err(e) => {
                tracing::warn!(error = %e, "audit record seal failed");
                return;
            }
        }

        let line = match serde_json::to_string(&rec) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "audit record serialize failed");
                return;
            }
        };

        {
            use tokio::io::AsyncWriteExt;
            let mut file = self.file.lock().await;
            let written = file.write_all(format!("{line}\n").as_bytes()).await;
            if let Err(e) = written.and(file.flush().await) {
                tracing::warn!(error = %e, "audit append failed");
                return;
            }
        }
        *last_hash = Some(rec.record_hash.clone());

        if let Some(sqlite) = &self.sqlite {
            let conn = sqlite.lock().await;
            if let Err(e) = conn.execute(
                "
                INSERT OR REPLACE INTO audit_records
                (audit_id, subject_id, operation, result, reason_code, ts, record_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ",
                params![
                    rec.audit_id,
                    rec.subject_id,
                    rec.operation,
                    rec.result,
                    rec.reason_code,
                    rec.ts,
                    line
                ],
            ) {
                tracing::warn!(error = %e, "audit sqlite mirror failed");
            }
        }
    }
}

/// SHA-256 over the record serialized with an empty `record_hash`, so the
/// hash covers `prev_hash` and links each record to the one before it.
fn seal(rec: &AuditRecord) -> Result<String, serde_json::Error> {
    let unsealed = AuditRecord {
        record_hash: String::new(),
        ..rec.clone()
    };
    let bytes = serde_json::to_vec(&unsealed)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Walks an audit log and checks every link. Returns a one-line summary,
/// or the first broken record (1-based, blank lines skipped).
pub fn verify_audit_chain(path: &str) -> Result<String, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("cannot read {path}: {e}"))?;
    let records = text.lines().filter(|line| !line.trim().is_empty());

    let mut head: Option<String> = None;
    let mut checked = 0usize;
    for (n, line) in records.enumerate().map(|(i, line)| (i + 1, line)) {
        let rec: AuditRecord =
            serde_json::from_str(line).map_err(|e| format!("audit record {n}: unreadable: {e}"))?;
        if rec.prev_hash != head {
            return Err(format!(
                "audit record {n}: links to {}, previous record is {}",
                rec.prev_hash.as_deref().unwrap_or("nothing"),
                head.as_deref().unwrap_or("nothing"),
            ));
        }
        let sealed = seal(&rec).map_err(|e| format!("audit record {n}: cannot reseal: {e}"))?;
        if sealed != rec.record_hash {
            return Err(format!("audit record {n} ({}) was altered", rec.audit_id));
        }
        head = Some(rec.record_hash);
        checked += 1;
    }

    Ok(format!("{checked} audit records verified"))
}
