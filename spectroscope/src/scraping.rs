//! Page fetching and content extraction for selected articles.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use scraper::{Html, Node, Selector};
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use common::ScrapingConfig;

use crate::llm::LlmProvider;
use crate::parser;

/// Hard ceiling on in-flight page fetches.
const MAX_CONCURRENT_SCRAPES: usize = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Body must exceed this many chars before we bother the summarizer.
const MIN_TEXT_FOR_INSIGHTS: usize = 200;
/// Summarizer input window.
const INSIGHT_TEXT_WINDOW: usize = 5000;

/// Sites whose markup defeats the generic selectors.
const DOMAIN_TITLE_OVERRIDES: &[(&str, &str)] = &[("fathomjournal.org", "div.the-title h2")];

const TITLE_CLASS_HINTS: &[&str] = &[
    "article-title",
    "post-title",
    "entry-title",
    "headline",
    "title-text",
    "the-title",
];

const STRUCTURAL_TITLE_SELECTORS: &[&str] = &["article h1", "main h1", "header h1", "h1", "h2"];

const DATE_META_SELECTORS: &[&str] = &[
    "meta[property='article:published_time']",
    "meta[name='publication_date']",
    "meta[name='publish_date']",
    "meta[name='date']",
];

/// Everything a scrape attempt produced. `scrape` never fails: transport
/// errors and bad statuses land in `error`/`status_code`/`error_type` and the
/// caller decides what to do with them.
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub success: bool,
    pub title: Option<String>,
    pub text: Option<String>,
    pub og_image: Option<String>,
    pub favicon_url: Option<String>,
    pub published_date: Option<String>,
    pub domain: Option<String>,
    pub metadata: Map<String, Value>,
    pub error: Option<String>,
    pub status_code: Option<u16>,
    pub error_type: Option<String>,
}

impl ScrapeOutcome {
    fn http_failure(status: u16) -> Self {
        ScrapeOutcome {
            success: false,
            title: None,
            text: None,
            og_image: None,
            favicon_url: None,
            published_date: None,
            domain: None,
            metadata: Map::new(),
            error: Some(format!("HTTP {}", status)),
            status_code: Some(status),
            error_type: None,
        }
    }

    pub(crate) fn transport_failure(error: String, error_type: &str) -> Self {
        ScrapeOutcome {
            error: Some(error),
            status_code: Some(500),
            error_type: Some(error_type.to_string()),
            ..ScrapeOutcome::http_failure(500)
        }
    }
}

/// Fetches article pages under a shared concurrency ceiling and runs the
/// extraction heuristics. One instance is shared across a whole batch.
pub struct PageScraper {
    client: Client,
    semaphore: Semaphore,
    summarizer: Option<Arc<dyn LlmProvider>>,
}

impl PageScraper {
    pub fn new(cfg: &ScrapingConfig, summarizer: Option<Arc<dyn LlmProvider>>) -> Result<Self> {
        let timeout = cfg.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let user_agent = cfg.user_agent.clone().unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .user_agent(user_agent)
            .build()
            .context("failed to build scraping HTTP client")?;
        Ok(PageScraper {
            client,
            semaphore: Semaphore::new(MAX_CONCURRENT_SCRAPES),
            summarizer,
        })
    }

    /// Fetch one page and extract what we can. Never returns Err: every
    /// failure mode is folded into the outcome so batches are never aborted
    /// by a single bad URL.
    pub async fn scrape(&self, url: &str) -> ScrapeOutcome {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return ScrapeOutcome::transport_failure(
                    "scrape semaphore closed".to_string(),
                    "RuntimeError",
                )
            }
        };

        info!(url, "scraping page");

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url, error = %e, "page fetch failed");
                return ScrapeOutcome::transport_failure(e.to_string(), error_kind(&e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(url, status = status.as_u16(), "page fetch returned non-success status");
            return ScrapeOutcome::http_failure(status.as_u16());
        }

        let html = match response.text().await {
            Ok(html) => html,
            Err(e) => {
                warn!(url, error = %e, "reading page body failed");
                return ScrapeOutcome::transport_failure(e.to_string(), error_kind(&e));
            }
        };

        // Parsing is synchronous and the document is dropped before any
        // further await point.
        let mut outcome = extract_page(&html, url);

        if let Some(summarizer) = &self.summarizer {
            let long_enough = outcome
                .text
                .as_ref()
                .map(|t| t.chars().count() > MIN_TEXT_FOR_INSIGHTS)
                .unwrap_or(false);
            if long_enough {
                let window: String = outcome
                    .text
                    .as_deref()
                    .unwrap_or_default()
                    .chars()
                    .take(INSIGHT_TEXT_WINDOW)
                    .collect();
                let title = outcome.title.clone().unwrap_or_default();
                match summarizer.extract_insights(&window, &title, url).await {
                    Ok(insights) => {
                        outcome.metadata.insert("summary".to_string(), json!(insights.summary));
                        outcome.metadata.insert("keywords".to_string(), json!(insights.keywords));
                        outcome
                            .metadata
                            .insert("questions".to_string(), json!(insights.questions));
                    }
                    Err(e) => {
                        warn!(url, error = %e, "insight extraction failed");
                        outcome
                            .metadata
                            .insert("extraction_error".to_string(), json!(e.to_string()));
                    }
                }
            }
        }

        outcome
    }
}

fn error_kind(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "Timeout"
    } else if e.is_connect() {
        "ConnectError"
    } else {
        "RequestError"
    }
}

/// Run the extraction heuristics over already-fetched HTML.
pub fn extract_page(html: &str, url: &str) -> ScrapeOutcome {
    let doc = Html::parse_document(html);
    let domain = parser::domain_of(url);

    let mut title = title_from_selectors(&doc, &domain);

    // og:title / <title> step in when selectors produced nothing or only a
    // stub shorter than 10 chars.
    let wants_meta_title = title.as_ref().map(|t| t.chars().count() < 10).unwrap_or(true);
    if wants_meta_title {
        // Each candidate is judged on its own; a too-short og:title must not
        // keep the page <title> from being consulted.
        let usable = |t: &String| t.chars().count() > 5;
        if let Some(candidate) = meta_content(&doc, "meta[property='og:title']").filter(usable) {
            title = Some(candidate);
        } else if let Some(candidate) = first_text(&doc, "title").filter(usable) {
            title = Some(candidate);
        }
    }
    let wants_slug = title.as_ref().map(|t| t.chars().count() < 5).unwrap_or(true);
    if wants_slug {
        if let Some(slug) = parser::title_from_slug(url) {
            title = Some(slug);
        }
    }
    let title = title.map(|t| parser::clean_title(&t)).filter(|t| !t.is_empty());

    let text = visible_text(&doc);
    let og_description = meta_content(&doc, "meta[property='og:description']");
    let og_image = meta_content(&doc, "meta[property='og:image']");
    let og_site_name = meta_content(&doc, "meta[property='og:site_name']");

    let favicon_url = first_attr(&doc, "link[rel*='icon']", "href")
        .and_then(|href| absolutize(url, &href))
        .or_else(|| {
            if domain.is_empty() { None } else { Some(parser::favicon_url_for(&domain)) }
        });

    let published_date = published_date(&doc);

    let mut metadata = Map::new();
    metadata.insert("title".to_string(), json!(title.clone().unwrap_or_default()));
    metadata.insert("description".to_string(), json!(og_description.unwrap_or_default()));
    metadata.insert("site_name".to_string(), json!(og_site_name.unwrap_or_default()));
    metadata.insert("processed_date".to_string(), json!(chrono::Utc::now().to_rfc3339()));

    ScrapeOutcome {
        success: true,
        title,
        text: if text.is_empty() { None } else { Some(text) },
        og_image,
        favicon_url,
        published_date,
        domain: if domain.is_empty() { None } else { Some(domain) },
        metadata,
        error: None,
        status_code: None,
        error_type: None,
    }
}

fn title_from_selectors(doc: &Html, domain: &str) -> Option<String> {
    for (site, selector) in DOMAIN_TITLE_OVERRIDES {
        if domain.contains(site) {
            if let Some(t) = first_text(doc, selector).filter(|t| usable(t)) {
                return Some(t);
            }
        }
    }
    for hint in TITLE_CLASS_HINTS {
        let selector = format!("[class*='{}']", hint);
        if let Some(t) = first_text(doc, &selector).filter(|t| usable(t)) {
            return Some(t);
        }
    }
    for selector in STRUCTURAL_TITLE_SELECTORS {
        if let Some(t) = first_text(doc, selector).filter(|t| usable(t)) {
            return Some(t);
        }
    }
    None
}

fn usable(title: &str) -> bool {
    title.chars().count() >= 5
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn first_attr(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn meta_content(doc: &Html, selector: &str) -> Option<String> {
    first_attr(doc, selector, "content")
}

fn absolutize(base: &str, href: &str) -> Option<String> {
    url::Url::parse(base).ok()?.join(href).ok().map(|u| u.to_string())
}

fn published_date(doc: &Html) -> Option<String> {
    for selector in DATE_META_SELECTORS {
        if let Some(v) = meta_content(doc, selector) {
            return Some(v);
        }
    }
    let sel = Selector::parse("time").ok()?;
    doc.select(&sel).next().map(|el| {
        el.value()
            .attr("datetime")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| el.text().collect::<String>().trim().to_string())
    })
}

/// All text nodes outside script/style/noscript, joined with single spaces.
fn visible_text(doc: &Html) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in doc.root_element().descendants() {
        if let Node::Text(text) = node.value() {
            let skipped = node
                .parent()
                .and_then(|p| p.value().as_element())
                .map(|el| matches!(el.name(), "script" | "style" | "noscript"))
                .unwrap_or(false);
            if skipped {
                continue;
            }
            let t = text.text.trim();
            if !t.is_empty() {
                parts.push(t);
            }
        }
    }
    parts.join(" ")
}
