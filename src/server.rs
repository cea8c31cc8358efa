//! Thin HTTP host over the two pipelines.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::actions::{ActionExecutor, ActionSink, WebhookActionSink};
use crate::config::{AppConfig, non_empty};
use crate::pipeline::{
    DraftPipeline, DraftRequest, DraftResponse, InteractionOutcome, InteractionPipeline, InteractionRequest,
    PipelineError,
};
use crate::providers::{
    ContextProvider, HttpContextProvider, HttpContextSettings, HttpSafetyClassifier, HttpSafetySettings,
    HttpTriageClassifier, HttpTriageSettings, SafetyClassifier, TriageClassifier,
};
use crate::quality::{QualityGate, RetryLoop};
use crate::run::{AgentRegistry, HttpRunClient, RunClient, RunController};
use crate::stage::AgentRuntime;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub draft: Arc<DraftPipeline>,
    pub interaction: Arc<InteractionPipeline>,
}

impl AppState {
    /// Wire both pipelines over `client` using the settings in `config`.
    pub fn build(config: &AppConfig, client: Arc<dyn RunClient>) -> anyhow::Result<Self> {
        let runtime = Arc::new(AgentRuntime::new(
            RunController::new(client, config.run_settings()),
            Arc::new(AgentRegistry::new()),
        ));
        let gate = QualityGate::new(config.quality.review_threshold);
        let context = context_provider(config)?;
        let classifier = safety_classifier(config)?;
        let triage = triage_classifier(config)?;
        let sink = action_sink(config)?;
        let model = config.remote.model.as_str();

        let draft = DraftPipeline::new(
            Arc::clone(&runtime),
            model,
            RetryLoop::new(gate, config.quality.max_iterations),
        )
        .with_context_provider(context.clone())
        .with_classifier(classifier);

        let interaction = InteractionPipeline::new(
            runtime,
            model,
            gate,
            ActionExecutor::new(sink, config.actions.publish_attempts),
            context,
            triage,
        );

        Ok(Self {
            draft: Arc::new(draft),
            interaction: Arc::new(interaction),
        })
    }
}

fn context_provider(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn ContextProvider>>> {
    let Some(endpoint) = non_empty(config.context.endpoint.as_deref()) else {
        info!("No context endpoint configured, profiles resolve to empty objects");
        return Ok(None);
    };
    let provider = HttpContextProvider::new(HttpContextSettings {
        endpoint: endpoint.to_string(),
        api_key: config.context.api_key.clone(),
        window_days: config.context.window_days,
        lang: config.context.lang.clone(),
    })?;
    Ok(Some(Arc::new(provider)))
}

fn safety_classifier(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn SafetyClassifier>>> {
    let Some(endpoint) = non_empty(config.safety.endpoint.as_deref()) else {
        info!("No safety classifier configured, analyze_safety answers with its default verdict");
        return Ok(None);
    };
    let classifier = HttpSafetyClassifier::new(HttpSafetySettings {
        endpoint: endpoint.to_string(),
        api_key: config.safety.api_key.clone(),
        api_version: config.safety.api_version.clone(),
    })?;
    Ok(Some(Arc::new(classifier)))
}

fn triage_classifier(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn TriageClassifier>>> {
    let Some(endpoint) = non_empty(config.triage.endpoint.as_deref()) else {
        info!("No triage classifier configured, the triage agent classifies every message");
        return Ok(None);
    };
    let classifier = HttpTriageClassifier::new(HttpTriageSettings {
        endpoint: endpoint.to_string(),
        api_key: config.triage.api_key.clone(),
    })?;
    Ok(Some(Arc::new(classifier)))
}

fn action_sink(config: &AppConfig) -> anyhow::Result<Option<Arc<dyn ActionSink>>> {
    let Some(url) = non_empty(config.actions.webhook_url.as_deref()) else {
        info!("No action webhook configured, plans are acknowledged without publishing");
        return Ok(None);
    };
    Ok(Some(Arc::new(WebhookActionSink::new(url)?)))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/draft", post(api_draft))
        .route("/api/interactions", post(api_interactions))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the listener fails.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let remote = config
        .remote_settings()
        .context("remote.endpoint must be set to serve (GATED__REMOTE__ENDPOINT)")?;
    info!(
        name: "remote.config.loaded",
        endpoint = %remote.endpoint,
        model = %config.remote.model,
        "Remote run service configured"
    );
    let client: Arc<dyn RunClient> = Arc::new(HttpRunClient::new(&remote)?);
    let app = router(AppState::build(&config, client)?);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(name: "server.started", %addr, "Listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn api_draft(State(state): State<AppState>, Json(request): Json<DraftRequest>) -> Response {
    respond::<DraftResponse>(state.draft.process(request).await)
}

async fn api_interactions(State(state): State<AppState>, Json(request): Json<InteractionRequest>) -> Response {
    respond::<InteractionOutcome>(state.interaction.process(request).await)
}

fn respond<T: serde::Serialize>(result: Result<T, PipelineError>) -> Response {
    match result {
        Ok(body) => Json(body).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Pipeline could not start");
            (StatusCode::BAD_GATEWAY, Json(json!({ "error": err.to_string() }))).into_response()
        }
    }
}
