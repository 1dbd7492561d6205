use common::init_db_pool;
use sqlx::SqlitePool;

use spectroscope::models::{EnrichedSource, Leaning, Statistics, TimelinePositioning};
use spectroscope::storage;

// Helper to create a test pool
async fn setup_test_db() -> SqlitePool {
    let db_path = format!("test_db_{}.sqlite", uuid::Uuid::new_v4());
    let pool = init_db_pool(&db_path).await.expect("init pool");
    storage::ensure_schema(&pool).await.expect("ensure schema");
    pool
}

fn sample_source() -> EnrichedSource {
    let mut metadata = serde_json::Map::new();
    metadata.insert("description".to_string(), serde_json::json!("A stored description."));
    metadata.insert("site_name".to_string(), serde_json::json!("The Ledger"));
    EnrichedSource {
        id: String::new(),
        url: "https://ledger.example.com/politics/budget-vote".to_string(),
        title: "Budget Vote Clears Committee".to_string(),
        source_name: "The Ledger".to_string(),
        political_leaning: Leaning::Center,
        political_score: 5.3,
        snippet: "The committee advanced the budget on a narrow vote.".to_string(),
        domain: "ledger.example.com".to_string(),
        favicon_url: "https://www.google.com/s2/favicons?domain=ledger.example.com&sz=128"
            .to_string(),
        og_image: Some("https://cdn.example.com/lead.jpg".to_string()),
        published_date: "2024-03-12".to_string(),
        text: Some("Full article body text here.".to_string()),
        metadata,
    }
}

#[tokio::test]
async fn insert_then_find_round_trips_a_source() {
    let pool = setup_test_db().await;

    let source = sample_source();
    let id = storage::insert_source(&pool, &source).await.expect("insert");
    let id_num: i64 = id.parse().expect("numeric id");

    let loaded = storage::find_source(&pool, id_num)
        .await
        .expect("find")
        .expect("source exists");

    assert_eq!(loaded.id, id);
    assert_eq!(loaded.url, source.url);
    assert_eq!(loaded.title, source.title);
    assert_eq!(loaded.political_leaning, Leaning::Center);
    assert_eq!(loaded.political_score, 5.3);
    assert_eq!(loaded.og_image, source.og_image);
    assert_eq!(loaded.text, source.text);
    assert_eq!(
        loaded.metadata.get("site_name").and_then(|v| v.as_str()),
        Some("The Ledger")
    );
}

#[tokio::test]
async fn find_returns_none_for_unknown_ids() {
    let pool = setup_test_db().await;
    let loaded = storage::find_source(&pool, 9999).await.expect("find");
    assert!(loaded.is_none());
}

#[tokio::test]
async fn degraded_sources_store_with_null_text() {
    let pool = setup_test_db().await;

    let mut source = sample_source();
    source.text = None;
    source.og_image = None;
    source.metadata = serde_json::Map::new();
    source.metadata.insert("error".to_string(), serde_json::json!("HTTP 503"));
    source.metadata.insert("status_code".to_string(), serde_json::json!(503));

    let id: i64 = storage::insert_source(&pool, &source)
        .await
        .expect("insert")
        .parse()
        .expect("numeric id");
    let loaded = storage::find_source(&pool, id).await.expect("find").expect("exists");

    assert!(loaded.text.is_none());
    assert!(loaded.og_image.is_none());
    assert_eq!(loaded.metadata.get("status_code").and_then(|v| v.as_u64()), Some(503));
}

#[tokio::test]
async fn search_runs_are_logged_with_their_statistics() {
    let pool = setup_test_db().await;

    let stats = Statistics { total: 9, left_count: 3, center_count: 3, right_count: 3 };
    let timeline = TimelinePositioning { min_score: 2.1, max_score: 8.9 };
    storage::record_search(&pool, "climate policy", &stats, &timeline)
        .await
        .expect("record search");

    let (total, min_score): (i64, f64) = sqlx::query_as(
        "SELECT total, min_score FROM searches WHERE query = 'climate policy'",
    )
    .fetch_one(&pool)
    .await
    .expect("read search row");
    assert_eq!(total, 9);
    assert_eq!(min_score, 2.1);
}
