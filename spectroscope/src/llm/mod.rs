use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use common::LlmConfig;

/// Core trait for LLM providers (local or remote)
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate completion for a given prompt
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Extract a summary, keywords, and answered questions from article text
    async fn extract_insights(&self, text: &str, title: &str, url: &str)
        -> Result<ArticleInsights>;
}

/// Request structure for LLM generation
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Structured take on one article, merged into source metadata
#[derive(Debug, Clone, Default)]
pub struct ArticleInsights {
    pub summary: Option<String>,
    pub keywords: Vec<String>,
    pub questions: Vec<String>,
}

/// Token usage metadata
#[derive(Debug, Clone, Default)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

pub mod remote;

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_TOKENS: usize = 500;

/// Build the optional insight provider from configuration. Returns None when
/// the feature is disabled or no API key is present in the environment; the
/// pipeline runs without insights in that case.
pub fn provider_from_config(cfg: &LlmConfig) -> Option<Arc<dyn LlmProvider>> {
    if !cfg.enabled.unwrap_or(false) {
        return None;
    }
    let key_env = cfg.api_key_env.clone().unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string());
    let api_key = match std::env::var(&key_env) {
        Ok(key) if !key.is_empty() => key,
        _ => {
            warn!(env = %key_env, "LLM enabled but no API key in environment, insights disabled");
            return None;
        }
    };
    let api_url = cfg.api_url.clone().unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let model = cfg.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let provider = remote::RemoteLlmProvider::new(api_url, api_key, model).with_defaults(
        cfg.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS),
        cfg.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        0.5,
    );
    info!("LLM insight extraction enabled");
    Some(Arc::new(provider))
}

/// Prompt for the follow-up question endpoint: the stored article text is the
/// only context the model gets.
pub fn followup_prompt(article_text: &str, question: &str) -> String {
    let window: String = article_text.chars().take(4000).collect();
    format!(
        "Based on the following article text, answer the question that follows. \
         If the article does not contain the answer, say so plainly.\n\n\
         ARTICLE:\n{}\n\nQUESTION: {}",
        window, question
    )
}

/// Parse the SUMMARY/KEYWORDS/QUESTIONS sections the insight prompt asks for.
/// Missing or malformed sections degrade to empty values rather than errors.
pub fn parse_insight_sections(text: &str) -> ArticleInsights {
    let summary = section(text, "SUMMARY:", &["KEYWORDS:", "QUESTIONS:"]).filter(|s| !s.is_empty());

    let keywords = section(text, "KEYWORDS:", &["SUMMARY:", "QUESTIONS:"])
        .map(|s| {
            s.split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let questions = section(text, "QUESTIONS:", &["SUMMARY:", "KEYWORDS:"])
        .map(|s| {
            s.lines()
                .map(|line| {
                    line.trim()
                        .trim_start_matches(|c: char| {
                            c.is_ascii_digit() || c == '.' || c == ')' || c == '-' || c == '*'
                        })
                        .trim()
                        .to_string()
                })
                .filter(|q| !q.is_empty())
                .collect()
        })
        .unwrap_or_default();

    ArticleInsights { summary, keywords, questions }
}

/// Text between `header` and the nearest following terminator, trimmed.
fn section(text: &str, header: &str, terminators: &[&str]) -> Option<String> {
    let start = text.find(header)? + header.len();
    let rest = &text[start..];
    let end = terminators.iter().filter_map(|t| rest.find(t)).min().unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}
