//! Scrape enrichment, failure policy, and same-leaning replacement.
//!
//! Every selected article is scraped concurrently (the scraper bounds the
//! fan-out), then classified: permanent failures vanish from the result,
//! transient ones stay as degraded records, and both kinds get one shot at a
//! replacement drawn from the unselected remainder of the same leaning.
//! Result positions are slot-stable: a replacement lands exactly where the
//! failed source would have been.

use std::sync::Arc;

use serde_json::json;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::balance::{BalancedSet, Buckets};
use crate::models::{Article, EnrichedSource, Leaning};
use crate::parser;
use crate::scraping::{PageScraper, ScrapeOutcome};
use crate::storage;

/// Statuses that leave the source in the result set but flag it for a
/// replacement attempt. Transport exceptions surface as 500 and are covered.
const REPLACEABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Clone, Copy, PartialEq)]
enum FailureClass {
    /// 404/403: gone for good, drop the source outright.
    Drop,
    /// Retryable status or exception: keep a degraded record.
    Degrade { replaceable: bool },
}

fn classify(outcome: &ScrapeOutcome) -> Option<FailureClass> {
    if outcome.success {
        return None;
    }
    match outcome.status_code {
        Some(404) | Some(403) => Some(FailureClass::Drop),
        Some(status) => Some(FailureClass::Degrade {
            replaceable: REPLACEABLE_STATUSES.contains(&status),
        }),
        None => Some(FailureClass::Degrade { replaceable: true }),
    }
}

/// One result position. `record` is what the position currently holds (None
/// for dropped sources), `replace_leaning` marks it as wanting a replacement.
struct Slot {
    record: Option<EnrichedSource>,
    replace_leaning: Option<Leaning>,
}

/// Scrape the balanced selection, apply the failure policy, run the
/// replacement pass, and persist every surviving record.
pub async fn enrich(
    scraper: Arc<PageScraper>,
    db: &SqlitePool,
    set: BalancedSet,
) -> Vec<EnrichedSource> {
    let BalancedSet { selected, mut remainder } = set;
    info!(count = selected.len(), "scraping content for selected sources");

    let handles: Vec<(Article, tokio::task::JoinHandle<ScrapeOutcome>)> = selected
        .into_iter()
        .map(|article| {
            let scraper = Arc::clone(&scraper);
            let url = article.url.clone();
            (article, tokio::spawn(async move { scraper.scrape(&url).await }))
        })
        .collect();

    let mut slots: Vec<Slot> = Vec::with_capacity(handles.len());
    for (article, handle) in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(url = %article.url, error = %e, "scrape task failed to complete");
                ScrapeOutcome::transport_failure(e.to_string(), "TaskError")
            }
        };
        slots.push(settle(article, outcome, db).await);
    }

    // Replacement pass, strictly after the main batch.
    for slot in slots.iter_mut() {
        let Some(leaning) = slot.replace_leaning else { continue };
        let Some(candidate) = next_candidate(&mut remainder, leaning) else {
            continue;
        };
        info!(%leaning, url = %candidate.url, "trying same-leaning replacement for failed source");
        let outcome = scraper.scrape(&candidate.url).await;
        if outcome.success {
            let mut record = merge_scrape(candidate, outcome);
            tidy(&mut record);
            slot.record = Some(persist(record, db).await);
            slot.replace_leaning = None;
        }
    }

    slots.into_iter().filter_map(|slot| slot.record).collect()
}

/// Turn one article plus its scrape outcome into a slot per the failure
/// policy. Dropped sources are never persisted.
async fn settle(article: Article, outcome: ScrapeOutcome, db: &SqlitePool) -> Slot {
    let leaning = article.political_leaning;
    match classify(&outcome) {
        None => {
            let mut record = merge_scrape(article, outcome);
            tidy(&mut record);
            Slot { record: Some(persist(record, db).await), replace_leaning: None }
        }
        Some(FailureClass::Drop) => {
            info!(
                url = %article.url,
                status = outcome.status_code.unwrap_or(0),
                "dropping source with permanent fetch failure"
            );
            Slot { record: None, replace_leaning: Some(leaning) }
        }
        Some(FailureClass::Degrade { replaceable }) => {
            warn!(
                url = %article.url,
                status = outcome.status_code.unwrap_or(0),
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "keeping degraded record for failed scrape"
            );
            let mut record = degraded_record(article, &outcome);
            tidy(&mut record);
            Slot {
                record: Some(persist(record, db).await),
                replace_leaning: replaceable.then_some(leaning),
            }
        }
    }
}

/// Merge policy for a successful scrape: scraped title/domain/favicon/og
/// image/date win only when present; the parsed source name, leaning, score,
/// and snippet always survive.
fn merge_scrape(article: Article, outcome: ScrapeOutcome) -> EnrichedSource {
    EnrichedSource {
        id: String::new(),
        url: article.url,
        title: outcome.title.unwrap_or(article.title),
        source_name: article.source_name,
        political_leaning: article.political_leaning,
        political_score: article.political_score,
        snippet: article.snippet,
        domain: outcome.domain.unwrap_or(article.domain),
        favicon_url: outcome.favicon_url.unwrap_or(article.favicon_url),
        og_image: outcome.og_image.or(article.og_image),
        published_date: outcome.published_date.unwrap_or(article.published_date),
        text: outcome.text,
        metadata: outcome.metadata,
    }
}

/// Fallback record for a kept failure: parsed fields only, no body, and the
/// error details filed under metadata.
fn degraded_record(article: Article, outcome: &ScrapeOutcome) -> EnrichedSource {
    let mut metadata = serde_json::Map::new();
    metadata.insert(
        "error".to_string(),
        json!(outcome.error.clone().unwrap_or_else(|| "Unknown error".to_string())),
    );
    metadata.insert("status_code".to_string(), json!(outcome.status_code.unwrap_or(0)));
    metadata.insert(
        "error_type".to_string(),
        json!(outcome.error_type.clone().unwrap_or_else(|| "ScrapingError".to_string())),
    );
    EnrichedSource {
        id: String::new(),
        url: article.url,
        title: article.title,
        source_name: article.source_name,
        political_leaning: article.political_leaning,
        political_score: article.political_score,
        snippet: article.snippet,
        domain: article.domain,
        favicon_url: article.favicon_url,
        og_image: None,
        published_date: String::new(),
        text: None,
        metadata,
    }
}

/// Formatting cleanup applied to every record before persistence. Reuses the
/// parser's strippers so scrape output gets the same treatment as parsed
/// fields, plus a slug-derived repair for unusably short titles.
fn tidy(source: &mut EnrichedSource) {
    source.title = parser::clean_title(&source.title);
    if source.title.chars().count() < 5 {
        if let Some(slug) = parser::title_from_slug(&source.url) {
            if slug.chars().count() > 10 && slug.split_whitespace().count() > 2 {
                source.title = slug;
            }
        }
    }
    source.source_name = parser::clean_source_name(&source.source_name);
    source.snippet = parser::clean_snippet(&source.snippet);
}

/// Next unselected article of the given leaning, in discovery order.
fn next_candidate(remainder: &mut Buckets, leaning: Leaning) -> Option<Article> {
    let bucket = remainder.bucket_mut(leaning);
    if bucket.is_empty() {
        None
    } else {
        Some(bucket.remove(0))
    }
}

/// Store one record. A storage failure never loses the record: it goes back
/// to the caller with a deterministic fallback identifier instead.
async fn persist(mut source: EnrichedSource, db: &SqlitePool) -> EnrichedSource {
    match storage::insert_source(db, &source).await {
        Ok(id) => source.id = id,
        Err(e) => {
            error!(url = %source.url, error = %e, "failed to persist source, using fallback id");
            source.id = storage::fallback_id(&source.url);
        }
    }
    source
}
