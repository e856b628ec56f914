//! Outbound collaborators: content generation, agent notifications, email.
//!
//! The server only depends on the traits; the `static`/`log` variants keep a
//! single-node deployment self-contained, the `http` variants post JSON to
//! an external service.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use ticketflow_config::Config;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("request failed: {0}")]
    Request(String),
    #[error("upstream returned status {0}")]
    Status(u16),
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CollaboratorError::Timeout(0)
        } else {
            CollaboratorError::Request(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Generation {
    pub text: String,
    #[serde(default)]
    pub confidence_hint: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub agent_id: String,
    pub title: String,
    pub message: String,
    pub ticket_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    #[serde(default)]
    pub html: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailReceipt {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl EmailReceipt {
    pub fn sent() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        context: &Value,
        timeout: Duration,
    ) -> Result<Generation, CollaboratorError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn emit(&self, notification: &Notification) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait Emailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> EmailReceipt;
}

#[derive(Clone)]
pub struct Collaborators {
    pub model: Arc<dyn LanguageModel>,
    pub notifier: Arc<dyn Notifier>,
    pub emailer: Arc<dyn Emailer>,
}

impl Collaborators {
    pub fn from_config(cfg: &Config) -> Result<Self, String> {
        let model: Arc<dyn LanguageModel> = match cfg.collaborators.language_model.mode.as_str() {
            "http" => {
                let endpoint = cfg
                    .collaborators
                    .language_model
                    .endpoint
                    .clone()
                    .ok_or_else(|| "collaborators.language_model.endpoint is required".to_string())?;
                Arc::new(HttpLanguageModel::new(endpoint))
            }
            _ => Arc::new(StaticLanguageModel),
        };
        let emailer: Arc<dyn Emailer> = match cfg.collaborators.emailer.mode.as_str() {
            "http" => {
                let endpoint = cfg
                    .collaborators
                    .emailer
                    .endpoint
                    .clone()
                    .ok_or_else(|| "collaborators.emailer.endpoint is required".to_string())?;
                Arc::new(HttpEmailer::new(
                    endpoint,
                    cfg.collaborators.emailer.from_address.clone(),
                    Duration::from_millis(cfg.collaborators.emailer.timeout_ms),
                ))
            }
            _ => Arc::new(LogEmailer),
        };
        Ok(Self {
            model,
            notifier: Arc::new(LogNotifier),
            emailer,
        })
    }
}

/// Returns a fixed nudge and no confidence hint.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticLanguageModel;

#[async_trait]
impl LanguageModel for StaticLanguageModel {
    async fn generate(
        &self,
        _prompt: &str,
        context: &Value,
        _timeout: Duration,
    ) -> Result<Generation, CollaboratorError> {
        let subject = context
            .get("subject")
            .and_then(|v| v.as_str())
            .unwrap_or("your request");
        Ok(Generation {
            text: format!(
                "Just checking in on \"{subject}\". Is there anything else we can help with?"
            ),
            confidence_hint: None,
        })
    }
}

pub struct HttpLanguageModel {
    client: Client,
    endpoint: String,
}

impl HttpLanguageModel {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn generate(
        &self,
        prompt: &str,
        context: &Value,
        timeout: Duration,
    ) -> Result<Generation, CollaboratorError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&json!({ "prompt": prompt, "context": context }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollaboratorError::Timeout(timeout.as_millis() as u64)
                } else {
                    CollaboratorError::Request(e.to_string())
                }
            })?;
        if !resp.status().is_success() {
            return Err(CollaboratorError::Status(resp.status().as_u16()));
        }
        Ok(resp.json::<Generation>().await?)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn emit(&self, n: &Notification) -> Result<(), CollaboratorError> {
        tracing::info!(
            agent_id = %n.agent_id,
            ticket_id = %n.ticket_id,
            title = %n.title,
            "agent notification"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmailer;

#[async_trait]
impl Emailer for LogEmailer {
    async fn send(&self, email: &OutboundEmail) -> EmailReceipt {
        tracing::info!(to = %email.to, subject = %email.subject, "email (log only)");
        EmailReceipt::sent()
    }
}

pub struct HttpEmailer {
    client: Client,
    endpoint: String,
    from_address: String,
    timeout: Duration,
}

impl HttpEmailer {
    pub fn new(endpoint: String, from_address: String, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            from_address,
            timeout,
        }
    }
}

#[async_trait]
impl Emailer for HttpEmailer {
    async fn send(&self, email: &OutboundEmail) -> EmailReceipt {
        let body = json!({
            "from": self.from_address,
            "to": email.to,
            "subject": email.subject,
            "text": email.text,
            "html": email.html,
        });
        match self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => EmailReceipt::sent(),
            Ok(resp) => EmailReceipt::failed(format!("status {}", resp.status().as_u16())),
            Err(e) => EmailReceipt::failed(e.to_string()),
        }
    }
}
