//! Heuristic extraction of article candidates from LLM search responses.
//!
//! The search API answers in prose: titles in markdown bold, "Source:" labels,
//! bare URLs, numbered lists. Each field below has its own small extractor and
//! the parser composes them in a fixed fallback order, so any single rule can
//! be tested (or swapped) on its own.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::ParsedArticle;

pub const UNKNOWN_SOURCE: &str = "Unknown Source";
pub const NO_SNIPPET: &str = "No snippet available";

/// How far around a URL we look for its title/source/snippet.
const CONTEXT_CHARS: usize = 300;
/// Length of the snippet slice taken from text following a URL.
const SNIPPET_CHARS: usize = 150;

static RE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s)\]]+").unwrap());
static RE_BOLD_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static RE_HEADLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\n|\*)([A-Z][^.\n]{10,100}(?:\.|\n|$))").unwrap());
static RE_SOURCE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:source|source\s*name)[\s:]+([^,\n]+)").unwrap());
static RE_SNIPPET_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)snippet[\s:]+([^\n]+)").unwrap());
static RE_DATE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:published|date)[\s:]+([^\n,]+\d{4})").unwrap());
static RE_DOMAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://(?:www\.)?([^/]+)").unwrap());
static RE_LIST_DELIM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n(?:\d+\.|[-*+])\s+").unwrap());

// The keyword must end at a colon or whitespace, or "Titled"/"Sources"
// would lose their first letters.
static RE_TITLE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:Article\s+)?Title(?::\s*|\s+)").unwrap());
static RE_SOURCE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:Name:?\s*\*\*|Source(?::\s*|\s+))").unwrap());
static RE_TRAILING_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*$").unwrap());
static RE_SUMMARY_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*(?:Summary|Brief Summary):?\s*\*\*").unwrap());
static RE_SLUG_EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(?:html|php|aspx|jsp)$").unwrap());
static RE_SLUG_ID_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"-\d+$").unwrap());

/// Parse one free-text search response into candidate articles.
///
/// Never fails: a response with nothing recognizable yields an empty list.
/// Candidates are deduplicated by URL, first occurrence wins.
pub fn parse_articles(text: &str, topic: &str) -> Vec<ParsedArticle> {
    let mut articles: Vec<ParsedArticle> = Vec::new();
    let mut seen: Vec<String> = Vec::new();

    let url_matches: Vec<regex::Match> = RE_URL.find_iter(text).collect();

    if url_matches.is_empty() {
        // No bare URLs anywhere: fall back to list items, each of which must
        // carry its own URL to count.
        for item in split_list_items(text) {
            if let Some(m) = RE_URL.find(item) {
                push_unique(&mut articles, &mut seen, extract_from_context(item, m.as_str(), m.start(), topic));
            }
        }
        return articles;
    }

    for m in url_matches {
        let url = m.as_str();
        if seen.iter().any(|u| u == url) {
            continue;
        }
        let start = floor_char_boundary(text, m.start().saturating_sub(CONTEXT_CHARS));
        let end = ceil_char_boundary(text, m.end() + CONTEXT_CHARS);
        let context = &text[start..end];
        let url_pos = m.start() - start;
        push_unique(&mut articles, &mut seen, extract_from_context(context, url, url_pos, topic));
    }

    articles
}

fn push_unique(
    articles: &mut Vec<ParsedArticle>,
    seen: &mut Vec<String>,
    candidate: Option<ParsedArticle>,
) {
    if let Some(article) = candidate {
        if !seen.iter().any(|u| u == &article.url) {
            seen.push(article.url.clone());
            articles.push(article);
        }
    }
}

/// Build one candidate from a context window around `url`.
///
/// Returns None when neither a title nor a source can be derived: a bare link
/// with no surrounding prose is not worth keeping.
fn extract_from_context(
    context: &str,
    url: &str,
    url_pos: usize,
    topic: &str,
) -> Option<ParsedArticle> {
    let before_url = &context[..floor_char_boundary(context, url_pos)];

    let title = bold_title(context).or_else(|| capitalized_title(before_url));
    let domain = domain_of(url);
    let source = labeled_source(context).or_else(|| {
        if domain.is_empty() { None } else { Some(domain.clone()) }
    });

    if title.is_none() && source.is_none() {
        return None;
    }

    let title = clean_title(&title.unwrap_or_else(|| format!("Article about {}", topic)));
    let source_name = clean_source_name(&source.unwrap_or_else(|| UNKNOWN_SOURCE.to_string()));
    let snippet = clean_snippet(
        &labeled_snippet(context)
            .or_else(|| trailing_snippet(context, url, url_pos))
            .unwrap_or_else(|| NO_SNIPPET.to_string()),
    );
    let favicon_url = if domain.is_empty() { String::new() } else { favicon_url_for(&domain) };

    Some(ParsedArticle {
        url: url.to_string(),
        title,
        source_name,
        snippet,
        domain,
        favicon_url,
        published_date: labeled_date(context).unwrap_or_default(),
    })
}

/// Markdown-bold span anywhere in the context, e.g. `**Senate Passes Bill**`.
fn bold_title(context: &str) -> Option<String> {
    RE_BOLD_SPAN
        .captures(context)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty())
}

/// A capitalized, sentence-like span occurring before the URL.
fn capitalized_title(before_url: &str) -> Option<String> {
    RE_HEADLINE
        .captures(before_url)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Explicit `source:` / `source name:` label, up to the next comma or newline.
fn labeled_source(context: &str) -> Option<String> {
    RE_SOURCE_LABEL
        .captures(context)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Explicit `snippet:` label, to end of line.
fn labeled_snippet(context: &str) -> Option<String> {
    RE_SNIPPET_LABEL
        .captures(context)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Fallback snippet: the text immediately following the URL.
fn trailing_snippet(context: &str, url: &str, url_pos: usize) -> Option<String> {
    let after_start = ceil_char_boundary(context, url_pos + url.len());
    let after: String = context[after_start..].chars().take(SNIPPET_CHARS).collect();
    let after = after.trim();
    if after.is_empty() { None } else { Some(after.to_string()) }
}

/// `published:` / `date:` label ending in a 4-digit year.
fn labeled_date(context: &str) -> Option<String> {
    RE_DATE_LABEL
        .captures(context)
        .map(|c| c[1].trim().to_string())
        .filter(|d| !d.is_empty())
}

/// Host part of a URL, minus a leading `www.`. Empty for anything the
/// pattern cannot make sense of; malformed URLs are tolerated, not rejected.
pub fn domain_of(url: &str) -> String {
    RE_DOMAIN
        .captures(url)
        .map(|c| c[1].to_string())
        .unwrap_or_default()
}

/// Deterministic favicon URL for a domain (no fetch involved).
pub fn favicon_url_for(domain: &str) -> String {
    format!("https://www.google.com/s2/favicons?domain={}&sz=128", domain)
}

/// Derive a human-readable title from the last path segment of a URL,
/// e.g. `/global-emissions-pact-874.html` becomes "Global Emissions Pact".
pub fn title_from_slug(url: &str) -> Option<String> {
    // The scheme's `//` must not count as a path separator, so drop it and
    // the host before looking for segments. A bare host has no slug.
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let (_, path) = without_scheme.split_once('/')?;
    let slug = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    if slug.is_empty() {
        return None;
    }
    let slug = RE_SLUG_EXTENSION.replace(slug, "");
    let slug = RE_SLUG_ID_SUFFIX.replace(&slug, "");
    let words: Vec<String> = slug
        .split('-')
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect();
    if words.is_empty() {
        return None;
    }
    Some(words.join(" "))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Strip "Article Title:" / "Title:" lead-ins.
pub fn clean_title(title: &str) -> String {
    RE_TITLE_PREFIX.replace(title, "").trim().to_string()
}

/// Strip "Source:" / "Name: **" lead-ins and a dangling bold marker.
pub fn clean_source_name(name: &str) -> String {
    let name = RE_SOURCE_PREFIX.replace(name, "");
    RE_TRAILING_BOLD.replace(&name, "").trim().to_string()
}

/// Strip "**Summary:**" labels and unwrap remaining bold spans.
pub fn clean_snippet(snippet: &str) -> String {
    let snippet = RE_SUMMARY_LABEL.replace_all(snippet, "");
    RE_BOLD_SPAN.replace_all(&snippet, "$1").trim().to_string()
}

fn split_list_items(text: &str) -> Vec<&str> {
    let delims: Vec<(usize, usize)> =
        RE_LIST_DELIM.find_iter(text).map(|m| (m.start(), m.end())).collect();
    let mut items = Vec::new();
    for (i, (_, body_start)) in delims.iter().enumerate() {
        let end = delims.get(i + 1).map(|(next_start, _)| *next_start).unwrap_or(text.len());
        let item = text[*body_start..end].trim();
        if !item.is_empty() {
            items.push(item);
        }
    }
    items
}

// LLM output is full of multi-byte punctuation; offsets derived from match
// positions plus fixed windows must be snapped to char boundaries before
// slicing.
fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    i = i.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}
