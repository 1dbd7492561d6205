use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::models::{EnrichedSource, Leaning, Statistics, TimelinePositioning};

/// Prefix marking locally generated identifiers for records whose insert
/// failed. These ids are never resolvable via `find_source`.
pub const FALLBACK_ID_PREFIX: &str = "temp_";

/// Ensure the required schema exists. Idempotent, safe to call at startup.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    info!("ensuring DB schema (CREATE TABLE IF NOT EXISTS ...)");

    let stmts = [
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL,
            title TEXT NOT NULL,
            source_name TEXT NOT NULL,
            political_leaning TEXT NOT NULL,
            political_score REAL,
            snippet TEXT,
            domain TEXT,
            favicon_url TEXT,
            og_image TEXT,
            published_date TEXT,
            text TEXT,
            metadata TEXT,
            created_at TEXT NOT NULL
        );
        "#,
        r#"
        CREATE INDEX IF NOT EXISTS idx_sources_url ON sources(url);
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS searches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            query TEXT NOT NULL,
            total INTEGER,
            left_count INTEGER,
            center_count INTEGER,
            right_count INTEGER,
            min_score REAL,
            max_score REAL,
            created_at TEXT NOT NULL
        );
        "#,
    ];

    for s in &stmts {
        sqlx::query(s)
            .execute(pool)
            .await
            .with_context(|| "failed to ensure schema")?;
    }

    info!("DB schema ensured");
    Ok(())
}

/// Insert one enriched source and return its identifier (the rowid as a
/// decimal string). The caller decides what to do when this fails.
pub async fn insert_source(pool: &SqlitePool, source: &EnrichedSource) -> Result<String> {
    let metadata_json = serde_json::to_string(&source.metadata)
        .context("failed to serialize source metadata")?;

    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO sources
            (url, title, source_name, political_leaning, political_score,
             snippet, domain, favicon_url, og_image, published_date, text,
             metadata, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&source.url)
    .bind(&source.title)
    .bind(&source.source_name)
    .bind(source.political_leaning.as_str())
    .bind(source.political_score)
    .bind(&source.snippet)
    .bind(&source.domain)
    .bind(&source.favicon_url)
    .bind(source.og_image.as_deref())
    .bind(&source.published_date)
    .bind(source.text.as_deref())
    .bind(&metadata_json)
    .bind(Utc::now().to_rfc3339())
    .fetch_one(pool)
    .await
    .context("failed to insert source")?;

    Ok(id.to_string())
}

/// Deterministic identifier for a record that could not be persisted,
/// recognizable by prefix.
pub fn fallback_id(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("{}{:x}", FALLBACK_ID_PREFIX, digest)
}

/// Load one stored source by rowid. None when no such row exists.
pub async fn find_source(pool: &SqlitePool, id: i64) -> Result<Option<EnrichedSource>> {
    let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to query source")?;

    let Some(row) = row else { return Ok(None) };

    let leaning_text: String = row.get("political_leaning");
    let leaning = Leaning::parse(&leaning_text)
        .with_context(|| format!("stored source {} has unknown leaning '{}'", id, leaning_text))?;

    let metadata_json: Option<String> = row.get("metadata");
    let metadata = metadata_json
        .as_deref()
        .and_then(|j| serde_json::from_str(j).ok())
        .unwrap_or_default();

    Ok(Some(EnrichedSource {
        id: row.get::<i64, _>("id").to_string(),
        url: row.get("url"),
        title: row.get("title"),
        source_name: row.get("source_name"),
        political_leaning: leaning,
        political_score: row.get::<Option<f64>, _>("political_score").unwrap_or(0.0),
        snippet: row.get::<Option<String>, _>("snippet").unwrap_or_default(),
        domain: row.get::<Option<String>, _>("domain").unwrap_or_default(),
        favicon_url: row.get::<Option<String>, _>("favicon_url").unwrap_or_default(),
        og_image: row.get("og_image"),
        published_date: row.get::<Option<String>, _>("published_date").unwrap_or_default(),
        text: row.get("text"),
        metadata,
    }))
}

/// Log one aggregate query run with its result statistics.
pub async fn record_search(
    pool: &SqlitePool,
    query: &str,
    stats: &Statistics,
    timeline: &TimelinePositioning,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO searches
            (query, total, left_count, center_count, right_count,
             min_score, max_score, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(query)
    .bind(stats.total as i64)
    .bind(stats.left_count as i64)
    .bind(stats.center_count as i64)
    .bind(stats.right_count as i64)
    .bind(timeline.min_score)
    .bind(timeline.max_score)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .context("failed to record search")?;

    Ok(())
}
