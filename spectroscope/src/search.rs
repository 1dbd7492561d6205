//! Leaning-targeted queries against the external search API.
//!
//! The API is OpenAI-chat shaped; we send one system prompt plus one
//! user prompt per leaning and get back prose for the parser.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::SearchConfig;

use crate::models::{Leaning, ParsedArticle};
use crate::parser;

pub const DEFAULT_API_URL: &str = "https://api.perplexity.ai/chat/completions";
pub const DEFAULT_MODEL: &str = "sonar";
pub const DEFAULT_API_KEY_ENV: &str = "PERPLEXITY_API_KEY";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const SYSTEM_PROMPT: &str = "You are a news collection assistant. Find recent news articles on the given topic. Include only factual articles from established news outlets. For each article, provide: 1) The exact article title, 2) The source name, 3) The complete article URL, and 4) A brief snippet or summary. Format each article as a separate bullet point or numbered item. Provide at least 10 articles if available. Focus on diversity of sources within the specified political leaning category. Do not repeat articles from the same source. Prioritize articles published within the last year, and do not include sources older than 5 years unless absolutely necessary. Focus on the most recent, relevant sources available.";

/// Search capability: one natural-language prompt in, opaque prose out.
#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, prompt: &str) -> Result<String>;
}

/// Client for the hosted search model.
pub struct SonarClient {
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl SonarClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout = Duration::from_secs(timeout_secs);
        self
    }

    /// Build a client from the `[search]` config section and a resolved key.
    pub fn from_config(cfg: &SearchConfig, api_key: String) -> Self {
        let base_url = cfg.api_url.clone().unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let model = cfg.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        SonarClient::new(base_url, api_key, model)
            .with_timeout(cfg.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}

#[async_trait::async_trait]
impl SearchProvider for SonarClient {
    async fn search(&self, prompt: &str) -> Result<String> {
        let req_body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: SYSTEM_PROMPT.to_string() },
                ChatMessage { role: "user".to_string(), content: prompt.to_string() },
            ],
        };

        // The deadline covers the body read too, not just the headers.
        let resp_body: ChatResponse = tokio::time::timeout(self.timeout, async {
            let response = self
                .client
                .post(&self.base_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&req_body)
                .send()
                .await
                .context("search HTTP request failed")?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("search API error {}: {}", status, body);
            }

            response.json().await.context("failed to parse search response")
        })
        .await
        .context("search request timed out")??;

        let choice = resp_body.choices.first().context("search response has no choices")?;

        Ok(choice.message.content.clone())
    }
}

/// The user prompt sent for one leaning's initial query.
pub fn leaning_prompt(topic: &str, leaning: Leaning) -> String {
    match leaning {
        Leaning::Left => format!("{} from left-leaning or progressive news sources", topic),
        Leaning::Center => format!("{} from center or neutral news sources", topic),
        Leaning::Right => format!("{} from right-leaning or conservative news sources", topic),
    }
}

/// Narrower topic wording for the one-shot requery of an under-filled
/// leaning. The result is fed back through `leaning_prompt`.
pub fn requery_topic(topic: &str, leaning: Leaning) -> String {
    format!("{} from established {}-leaning news sources only", topic, leaning)
}

/// Query one leaning and parse the response into candidates. An Err here
/// means the upstream call itself failed; the caller logs it and treats the
/// leaning as empty.
pub async fn fetch_for_leaning(
    provider: &dyn SearchProvider,
    topic: &str,
    leaning: Leaning,
) -> Result<Vec<ParsedArticle>> {
    info!(%leaning, topic, "querying search API");
    let prompt = leaning_prompt(topic, leaning);
    let text = provider.search(&prompt).await?;
    debug!(%leaning, response_chars = text.chars().count(), "received search response");
    let articles = parser::parse_articles(&text, topic);
    info!(%leaning, count = articles.len(), "parsed search results");
    Ok(articles)
}

// Chat-completion wire structures
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
