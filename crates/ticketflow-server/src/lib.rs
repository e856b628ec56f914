use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use ticketflow_config::Config;
use ticketflow_contracts::{
    Agent, Channel, CreateAgentRequest, CreateChannelRequest, CreateCustomerRequest,
    CreateTicketRequest, Customer, Feedback, FeedbackRequest, Handoff, JobReport,
    PostMessageRequest, PostMessageResponse, RequestHandoffRequest, ResolveHandoffRequest, Ticket,
    TicketEvent, TicketView, UpdateStatusRequest, API_VERSION,
};
use ticketflow_kernel::{Clock, SlaTarget, SlaTargets, SystemClock};

pub mod audit;
mod calibration;
pub mod collaborators;
pub mod error;
mod handoff;
mod health;
mod scheduler;
pub mod store;
mod tickets;

pub use audit::verify_audit_chain;
pub use collaborators::Collaborators;
pub use error::{ServiceError, ServiceResult};

use audit::{AuditJsonl, AuditRecord};
use store::SharedStore;

pub async fn serve<F>(cfg: Config, shutdown: F) -> Result<(), String>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let app = build_app(cfg).await?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    tracing::info!(%addr, "ticketflow listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| format!("serve failed: {e}"))
}

pub async fn build_app(cfg: Config) -> Result<Router, String> {
    Ok(router(AppState::new(cfg).await?))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/agents", post(create_agent))
        .route("/v1/customers", post(create_customer))
        .route("/v1/channels", post(create_channel))
        .route("/v1/tickets", post(create_ticket))
        .route("/v1/tickets/{id}", get(get_ticket))
        .route("/v1/tickets/{id}/messages", post(post_message))
        .route("/v1/tickets/{id}/status", post(update_status))
        .route("/v1/tickets/{id}/feedback", post(record_feedback))
        .route("/v1/tickets/{id}/handoffs", post(request_handoff))
        .route("/v1/handoffs/{id}/resolve", post(resolve_handoff))
        .route("/v1/jobs/follow-ups", post(run_follow_ups))
        .route("/v1/jobs/auto-close", post(run_auto_closes))
        .route("/v1/jobs/health-scores", post(run_health_scores))
        .route("/v1/jobs/calibration", post(run_calibration))
        .route("/v1/jobs/sla-sweep", post(run_sla_sweep))
        .with_state(state)
}

/// Shared handles for request operations and jobs. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    cfg: Arc<Config>,
    store: SharedStore,
    audit: Arc<AuditJsonl>,
    clock: Arc<dyn Clock>,
    collaborators: Collaborators,
}

impl AppState {
    pub async fn new(cfg: Config) -> Result<Self, String> {
        let store = store::open_store(&cfg)?;
        let collaborators = Collaborators::from_config(&cfg)?;
        Self::with_parts(cfg, store, Arc::new(SystemClock), collaborators).await
    }

    pub async fn with_parts(
        cfg: Config,
        store: SharedStore,
        clock: Arc<dyn Clock>,
        collaborators: Collaborators,
    ) -> Result<Self, String> {
        let audit = AuditJsonl::new(&cfg.audit.jsonl_path, cfg.store.sqlite_path.as_deref()).await?;
        Ok(Self {
            cfg: Arc::new(cfg),
            store,
            audit: Arc::new(audit),
            clock,
            collaborators,
        })
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn sla_targets(&self) -> SlaTargets {
        let target = |t: ticketflow_config::SlaTarget| {
            SlaTarget::minutes(t.first_response_minutes, t.resolution_minutes)
        };
        SlaTargets {
            urgent: target(self.cfg.sla.urgent),
            high: target(self.cfg.sla.high),
            medium: target(self.cfg.sla.medium),
            low: target(self.cfg.sla.low),
        }
    }

    async fn record(&self, rec: AuditRecord) {
        self.audit.append(rec).await;
    }

    async fn record_job(&self, report: &JobReport) {
        let detail = serde_json::to_value(&report.counts).unwrap_or(Value::Null);
        let result = if report.success { "ok" } else { "partial" };
        self.record(
            AuditRecord::new(&report.job, "job_run", result, "completed", self.now())
                .with_detail(detail),
        )
        .await;
    }
}

fn ticket_event(
    ticket_id: &str,
    kind: &str,
    actor: Option<&str>,
    detail: Value,
    now: DateTime<Utc>,
) -> TicketEvent {
    TicketEvent {
        id: new_id("evt"),
        ticket_id: ticket_id.to_string(),
        kind: kind.to_string(),
        actor: actor.map(|a| a.to_string()),
        detail,
        created_at: now,
    }
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().as_simple())
}

fn hours(h: i64) -> Duration {
    Duration::hours(h)
}

fn payload<T>(input: Result<Json<T>, JsonRejection>) -> ServiceResult<T> {
    input
        .map(|Json(v)| v)
        .map_err(|e| ServiceError::Validation(e.body_text()))
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok", "api_version": API_VERSION }))
}

async fn create_agent(
    State(state): State<AppState>,
    input: Result<Json<CreateAgentRequest>, JsonRejection>,
) -> ServiceResult<(StatusCode, Json<Agent>)> {
    let agent = state.register_agent(payload(input)?).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

async fn create_customer(
    State(state): State<AppState>,
    input: Result<Json<CreateCustomerRequest>, JsonRejection>,
) -> ServiceResult<(StatusCode, Json<Customer>)> {
    let customer = state.register_customer(payload(input)?).await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

async fn create_channel(
    State(state): State<AppState>,
    input: Result<Json<CreateChannelRequest>, JsonRejection>,
) -> ServiceResult<(StatusCode, Json<Channel>)> {
    let channel = state.register_channel(payload(input)?).await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

async fn create_ticket(
    State(state): State<AppState>,
    input: Result<Json<CreateTicketRequest>, JsonRejection>,
) -> ServiceResult<(StatusCode, Json<Ticket>)> {
    let ticket = state.create_ticket(payload(input)?).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

async fn get_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServiceResult<Json<TicketView>> {
    state.ticket_view(&id).await.map(Json)
}

async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    input: Result<Json<PostMessageRequest>, JsonRejection>,
) -> ServiceResult<(StatusCode, Json<PostMessageResponse>)> {
    let out = state.post_message(&id, payload(input)?).await?;
    Ok((StatusCode::CREATED, Json(out)))
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    input: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> ServiceResult<Json<Ticket>> {
    state.update_ticket_status(&id, payload(input)?).await.map(Json)
}

async fn record_feedback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    input: Result<Json<FeedbackRequest>, JsonRejection>,
) -> ServiceResult<(StatusCode, Json<Feedback>)> {
    let feedback = state.record_feedback(&id, payload(input)?).await?;
    Ok((StatusCode::CREATED, Json(feedback)))
}

async fn request_handoff(
    State(state): State<AppState>,
    Path(id): Path<String>,
    input: Result<Json<RequestHandoffRequest>, JsonRejection>,
) -> ServiceResult<(StatusCode, Json<Handoff>)> {
    let handoff = state.request_handoff(&id, payload(input)?).await?;
    Ok((StatusCode::CREATED, Json(handoff)))
}

async fn resolve_handoff(
    State(state): State<AppState>,
    Path(id): Path<String>,
    input: Result<Json<ResolveHandoffRequest>, JsonRejection>,
) -> ServiceResult<Json<Handoff>> {
    state.resolve_handoff(&id, payload(input)?).await.map(Json)
}

async fn run_follow_ups(State(state): State<AppState>) -> ServiceResult<Json<JobReport>> {
    state.run_follow_ups().await.map(Json)
}

async fn run_auto_closes(State(state): State<AppState>) -> ServiceResult<Json<JobReport>> {
    state.run_auto_closes().await.map(Json)
}

async fn run_health_scores(State(state): State<AppState>) -> ServiceResult<Json<JobReport>> {
    state.run_health_scores().await.map(Json)
}

async fn run_calibration(State(state): State<AppState>) -> ServiceResult<Json<JobReport>> {
    state.run_calibration().await.map(Json)
}

async fn run_sla_sweep(State(state): State<AppState>) -> ServiceResult<Json<JobReport>> {
    state.run_sla_sweep().await.map(Json)
}
