use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{get, post, routes, State};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use common::Config;

use crate::aggregator::{Aggregator, QueryError};
use crate::llm::{followup_prompt, LlmRequest};
use crate::models::{EnrichedSource, QueryResult};
use crate::storage;

/// Application state stored inside Rocket managed state.
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub aggregator: Arc<Aggregator>,
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    limit: Option<usize>,
    /// Per-request override for the configured search credential.
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct FollowupRequest {
    question: String,
}

#[derive(Serialize)]
struct FollowupResponse {
    source_id: String,
    question: String,
    answer: String,
}

#[derive(Serialize)]
struct StatusResponse {
    service: &'static str,
    version: &'static str,
    status: &'static str,
    uptime_seconds: i64,
    database: &'static str,
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    let database = match sqlx::query("SELECT 1").execute(state.aggregator.db()).await {
        Ok(_) => "ok",
        Err(e) => {
            error!(error = %e, "database check failed");
            "unreachable"
        }
    };
    Json(StatusResponse {
        service: "spectroscope",
        version: env!("CARGO_PKG_VERSION"),
        status: "ok",
        uptime_seconds: uptime,
        database,
    })
}

/// Run the aggregate pipeline for a topic and return the balanced, enriched
/// result set.
#[post("/api/v1/query", data = "<body>")]
async fn query(
    state: &State<AppState>,
    body: Json<QueryRequest>,
) -> Result<Json<QueryResult>, Status> {
    let topic = body.query.trim();
    if topic.is_empty() {
        return Err(Status::BadRequest);
    }
    let limit = body.limit.unwrap_or_else(|| state.aggregator.default_limit());

    match state.aggregator.run_query(topic, limit, body.api_key.as_deref()).await {
        Ok(result) => Ok(Json(result)),
        Err(QueryError::MissingCredentials) => {
            warn!("query rejected: no search API key available");
            Err(Status::ServiceUnavailable)
        }
        Err(QueryError::SearchUnavailable) => {
            error!(topic, "all leaning queries failed");
            Err(Status::BadGateway)
        }
        Err(QueryError::Internal(e)) => {
            error!(topic, error = %e, "query run failed");
            Err(Status::InternalServerError)
        }
    }
}

/// Parse a stored-source identifier from a path segment. Fallback ids
/// (`temp_…`) were never persisted, so they are not-found rather than
/// malformed; anything non-numeric is a client error.
fn parse_source_id(id: &str) -> Result<i64, Status> {
    if id.starts_with(storage::FALLBACK_ID_PREFIX) {
        return Err(Status::NotFound);
    }
    id.parse::<i64>().map_err(|_| Status::BadRequest)
}

#[get("/api/v1/source/<id>")]
async fn get_source(
    state: &State<AppState>,
    id: &str,
) -> Result<Json<EnrichedSource>, Status> {
    let source_id = parse_source_id(id)?;
    match storage::find_source(state.aggregator.db(), source_id).await {
        Ok(Some(source)) => Ok(Json(source)),
        Ok(None) => Err(Status::NotFound),
        Err(e) => {
            error!(id, error = %e, "failed to load source");
            Err(Status::InternalServerError)
        }
    }
}

/// Answer a follow-up question about a stored source by delegating to the
/// configured LLM collaborator; the stored article text is its only context.
#[post("/api/v1/followup/<id>", data = "<body>")]
async fn followup(
    state: &State<AppState>,
    id: &str,
    body: Json<FollowupRequest>,
) -> Result<Json<FollowupResponse>, Status> {
    let question = body.question.trim();
    if question.is_empty() {
        return Err(Status::BadRequest);
    }
    let source_id = parse_source_id(id)?;

    let Some(provider) = state.aggregator.insight_provider() else {
        warn!("follow-up rejected: no LLM collaborator configured");
        return Err(Status::ServiceUnavailable);
    };

    let source = match storage::find_source(state.aggregator.db(), source_id).await {
        Ok(Some(source)) => source,
        Ok(None) => return Err(Status::NotFound),
        Err(e) => {
            error!(id, error = %e, "failed to load source for follow-up");
            return Err(Status::InternalServerError);
        }
    };

    let article_text = source.text.as_deref().unwrap_or(&source.snippet);
    let request = LlmRequest {
        prompt: followup_prompt(article_text, question),
        max_tokens: None,
        temperature: None,
        timeout_seconds: None,
    };
    match provider.generate(request).await {
        Ok(response) => Ok(Json(FollowupResponse {
            source_id: source.id,
            question: question.to_string(),
            answer: response.content,
        })),
        Err(e) => {
            error!(id, error = %e, "follow-up answering failed");
            Err(Status::BadGateway)
        }
    }
}

/// Build and launch the Rocket server; blocks until shutdown. Pool creation
/// and schema setup are the caller's responsibility.
pub async fn launch_rocket(aggregator: Arc<Aggregator>, config: &Config) -> Result<()> {
    let state = AppState { started_at: Utc::now(), aggregator };

    let mut fig = rocket::Config::figment();
    if let Some(server_cfg) = &config.server {
        if let Some(address) = &server_cfg.address {
            fig = fig.merge(("address", address.clone()));
        }
        if let Some(port) = server_cfg.port {
            fig = fig.merge(("port", port));
        }
    }

    let rocket = rocket::custom(fig)
        .manage(state)
        .mount("/", routes![health, status, query, get_source, followup]);

    tracing::info!("starting Rocket HTTP server");
    rocket.launch().await.map_err(|e| anyhow!("Rocket failed: {}", e))?;
    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
