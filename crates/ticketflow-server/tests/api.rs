mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{temp_path, test_config};
use serde_json::{json, Value};
use ticketflow_config::Config;
use ticketflow_contracts::API_VERSION;
use ticketflow_server::{build_app, verify_audit_chain};
use tower::util::ServiceExt;

fn test_config_sqlite(db_path: &str) -> Config {
    let mut cfg = test_config();
    cfg.store.kind = "sqlite".to_string();
    cfg.store.sqlite_path = Some(db_path.to_string());
    cfg
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let payload = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, payload)
}

async fn seed_customer(app: &Router, id: &str) {
    let (status, _) = call(
        app,
        "POST",
        "/v1/customers",
        Some(json!({ "id": id, "name": "Dana", "email": "dana@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn open_ticket(app: &Router, customer_id: &str, body: Option<&str>) -> Value {
    let mut req = json!({
        "customer_id": customer_id,
        "subject": "Export keeps failing",
        "priority": "high",
        "tags": ["exports"]
    });
    if let Some(body) = body {
        req["body"] = json!(body);
    }
    let (status, ticket) = call(app, "POST", "/v1/tickets", Some(req)).await;
    assert_eq!(status, StatusCode::CREATED);
    ticket
}

#[tokio::test]
async fn healthz_reports_api_version() {
    let app = build_app(test_config()).await.unwrap();
    let (status, payload) = call(&app, "GET", "/v1/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], "ok");
    assert_eq!(payload["api_version"], API_VERSION);
}

#[tokio::test]
async fn ticket_view_carries_sla_snapshots() {
    let app = build_app(test_config()).await.unwrap();
    seed_customer(&app, "c1").await;
    let ticket = open_ticket(&app, "c1", None).await;
    assert_eq!(ticket["status"], "open");
    assert_eq!(ticket["queue"], "ai");

    let id = ticket["id"].as_str().unwrap();
    let (status, view) = call(&app, "GET", &format!("/v1/tickets/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["ticket"]["id"], id);
    assert_eq!(view["sla"]["first_response"]["status"], "ok");
    assert_eq!(view["sla"]["first_response"]["frozen"], false);
    assert_eq!(view["sla"]["resolution"]["status"], "ok");
}

#[tokio::test]
async fn unknown_ticket_returns_404() {
    let app = build_app(test_config()).await.unwrap();
    let (status, payload) = call(&app, "GET", "/v1/tickets/tkt_missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(payload["error"]["code"], "not_found");
}

#[tokio::test]
async fn ticket_for_unknown_customer_is_rejected() {
    let app = build_app(test_config()).await.unwrap();
    let (status, payload) = call(
        &app,
        "POST",
        "/v1/tickets",
        Some(json!({ "customer_id": "ghost", "subject": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(payload["error"]["code"], "not_found");
}

#[tokio::test]
async fn malformed_payloads_return_validation_errors() {
    let app = build_app(test_config()).await.unwrap();
    seed_customer(&app, "c1").await;
    let ticket = open_ticket(&app, "c1", None).await;
    let id = ticket["id"].as_str().unwrap();

    let (status, payload) = call(
        &app,
        "POST",
        &format!("/v1/tickets/{id}/messages"),
        Some(json!({ "sender": "customer", "body": "hi", "mood": "angry" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(payload["error"]["code"], "validation_error");

    let (status, payload) = call(
        &app,
        "POST",
        &format!("/v1/tickets/{id}/messages"),
        Some(json!({ "sender": "ai", "body": "answer", "confidence": 1.5 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(payload["error"]["code"], "validation_error");

    let (status, _) = call(
        &app,
        "POST",
        &format!("/v1/tickets/{id}/feedback"),
        Some(json!({ "rating": 6 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn opening_message_asking_for_a_human_escalates() {
    let app = build_app(test_config()).await.unwrap();
    seed_customer(&app, "c1").await;
    let ticket = open_ticket(&app, "c1", Some("Please let me speak to a human")).await;
    assert_eq!(ticket["status"], "escalated");
    assert_eq!(ticket["queue"], "human");
    assert_eq!(ticket["ai_handled"], false);
}

#[tokio::test]
async fn ai_reply_moves_ticket_to_pending() {
    let app = build_app(test_config()).await.unwrap();
    seed_customer(&app, "c1").await;
    let ticket = open_ticket(&app, "c1", Some("The CSV export is empty")).await;
    let id = ticket["id"].as_str().unwrap();

    let (status, out) = call(
        &app,
        "POST",
        &format!("/v1/tickets/{id}/messages"),
        Some(json!({ "sender": "ai", "body": "Try the new exporter.", "confidence": 0.92 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(out["ticket"]["status"], "pending");
    assert_eq!(out["escalation"]["escalate"], false);
    assert!(out["ticket"]["first_response_at"].is_string());
    assert!(out["ticket"]["follow_up_at"].is_string());

    let (status, resolved) = call(
        &app,
        "POST",
        &format!("/v1/tickets/{id}/status"),
        Some(json!({ "status": "resolved" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["status"], "resolved");

    let (status, payload) = call(
        &app,
        "POST",
        &format!("/v1/tickets/{id}/status"),
        Some(json!({ "status": "escalated" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(payload["error"]["code"], "conflict");
}

#[tokio::test]
async fn handoff_negotiation_over_http() {
    let app = build_app(test_config()).await.unwrap();
    for agent in ["a1", "a2"] {
        let (status, _) = call(
            &app,
            "POST",
            "/v1/agents",
            Some(json!({ "id": agent, "name": agent })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    seed_customer(&app, "c1").await;
    let ticket = open_ticket(&app, "c1", None).await;
    let id = ticket["id"].as_str().unwrap();

    let (status, handoff) = call(
        &app,
        "POST",
        &format!("/v1/tickets/{id}/handoffs"),
        Some(json!({ "from_agent": "a1", "to_agent": "a2", "reason": "timezone" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(handoff["status"], "pending");
    let handoff_id = handoff["id"].as_str().unwrap();

    let (status, payload) = call(
        &app,
        "POST",
        &format!("/v1/handoffs/{handoff_id}/resolve"),
        Some(json!({ "acting_agent": "a1", "decision": "accepted" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(payload["error"]["code"], "forbidden");

    let (status, accepted) = call(
        &app,
        "POST",
        &format!("/v1/handoffs/{handoff_id}/resolve"),
        Some(json!({ "acting_agent": "a2", "decision": "accepted" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["status"], "accepted");

    let (status, _) = call(
        &app,
        "POST",
        &format!("/v1/handoffs/{handoff_id}/resolve"),
        Some(json!({ "acting_agent": "a2", "decision": "declined" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, view) = call(&app, "GET", &format!("/v1/tickets/{id}"), None).await;
    assert_eq!(view["ticket"]["assigned_agent_id"], "a2");
}

#[tokio::test]
async fn job_endpoints_report_success() {
    let app = build_app(test_config()).await.unwrap();
    seed_customer(&app, "c1").await;
    open_ticket(&app, "c1", None).await;

    for (uri, job) in [
        ("/v1/jobs/follow-ups", "follow_ups"),
        ("/v1/jobs/auto-close", "auto_close"),
        ("/v1/jobs/health-scores", "health_scores"),
        ("/v1/jobs/calibration", "calibration"),
        ("/v1/jobs/sla-sweep", "sla_sweep"),
    ] {
        let (status, report) = call(&app, "POST", uri, None).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(report["job"], job);
        assert_eq!(report["success"], true);
        assert!(report["counts"].is_object());
    }
}

#[tokio::test]
async fn sqlite_store_survives_app_rebuild() {
    let db_path = temp_path("store", "db");
    let cfg = test_config_sqlite(&db_path);

    let id = {
        let app = build_app(cfg.clone()).await.unwrap();
        seed_customer(&app, "c1").await;
        let ticket = open_ticket(&app, "c1", Some("Export is stuck")).await;
        ticket["id"].as_str().unwrap().to_string()
    };

    let app = build_app(cfg).await.unwrap();
    let (status, view) = call(&app, "GET", &format!("/v1/tickets/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["ticket"]["customer_id"], "c1");
    assert_eq!(view["ticket"]["tags"], json!(["exports"]));
}

#[tokio::test]
async fn request_operations_leave_a_verifiable_audit_chain() {
    let cfg = test_config();
    let audit_path = cfg.audit.jsonl_path.clone();
    let app = build_app(cfg).await.unwrap();
    seed_customer(&app, "c1").await;
    open_ticket(&app, "c1", Some("Where is my order?")).await;
    call(&app, "POST", "/v1/jobs/sla-sweep", None).await;

    let summary = verify_audit_chain(&audit_path).unwrap();
    assert!(summary.ends_with("audit records verified"), "{summary}");

    let text = std::fs::read_to_string(&audit_path).unwrap();
    assert!(text.lines().count() >= 3);
    std::fs::write(&audit_path, text.replace("create_ticket", "delete_ticket")).unwrap();
    assert!(verify_audit_chain(&audit_path).is_err());
}
