use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use gated_agents::actions::ActionExecutor;
use gated_agents::pipeline::{DraftPipeline, InteractionPipeline};
use gated_agents::quality::{QualityGate, RetryLoop};
use gated_agents::run::{AgentRegistry, RunClient, RunController, RunSettings};
use gated_agents::server::{AppState, router};
use gated_agents::stage::AgentRuntime;
use gated_agents::testing::ScriptedRunClient;

fn app(client: &Arc<ScriptedRunClient>) -> axum::Router {
    let dyn_client: Arc<dyn RunClient> = Arc::<ScriptedRunClient>::clone(client);
    let runtime = Arc::new(AgentRuntime::new(
        RunController::new(
            dyn_client,
            RunSettings {
                poll_interval: Duration::from_millis(20),
                max_polls: 5,
                request_timeout: Duration::from_secs(5),
            },
        ),
        Arc::new(AgentRegistry::new()),
    ));
    let gate = QualityGate::default();
    router(AppState {
        draft: Arc::new(DraftPipeline::new(Arc::clone(&runtime), "m", RetryLoop::new(gate, 2))),
        interaction: Arc::new(InteractionPipeline::new(
            runtime,
            "m",
            gate,
            ActionExecutor::disabled(),
            None,
            None,
        )),
    })
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_reports_ok() {
    let client = Arc::new(ScriptedRunClient::new());
    let response = app(&client)
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "status": "ok" }));
}

#[tokio::test(start_paused = true)]
async fn draft_route_returns_the_gated_draft() {
    let client = Arc::new(ScriptedRunClient::new());
    client.reply("agent-writer", "```json\n{\"draft\":\"Hi there\"}\n```");
    client.reply("agent-safeguard", r#"{"label":"green","score":5}"#);

    let response = app(&client)
        .oneshot(post(
            "/api/draft",
            &json!({ "subject_id": "fan-1", "correlation_id": "c-9", "objectives": { "tone": "warm" } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["draft"], json!("Hi there"));
    assert_eq!(body["correlation_id"], json!("c-9"));
    assert_eq!(body["iterations"], json!(1));
    assert!(body.get("failure").is_none());
}

#[tokio::test(start_paused = true)]
async fn interaction_stage_failure_is_a_needs_review_body() {
    let client = Arc::new(ScriptedRunClient::new());
    // No triage script: the submit fails and the triage stage reports it.
    let response = app(&client)
        .oneshot(post(
            "/api/interactions",
            &json!({ "subject_id": "cust-1", "message": "hello" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], json!("needs_review"));
    assert_eq!(body["failure"]["stage"], json!("triage"));
    assert_eq!(body["executed"], Value::Null);
}

#[tokio::test]
async fn session_failure_maps_to_bad_gateway() {
    let client = Arc::new(ScriptedRunClient::new());
    client.fail_sessions();

    let response = app(&client)
        .oneshot(post("/api/draft", &json!({ "subject_id": "fan-1" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("session"));
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let client = Arc::new(ScriptedRunClient::new());
    let response = app(&client)
        .oneshot(post("/api/interactions", &json!({ "message": "no subject" })))
        .await
        .unwrap();

    assert!(response.status().is_client_error());
    assert!(client.calls().is_empty());
}
