// End-to-end pipeline tests with the search API and article pages mocked.
// Each test gets its own mock server and its own sqlite file.

use common::{init_db_pool, Config, DatabaseConfig, QueryConfig, ScrapingConfig, SearchConfig};
use mockito::Matcher;
use spectroscope::aggregator::{Aggregator, QueryError};
use spectroscope::models::Leaning;
use spectroscope::search::{SearchProvider, SonarClient};
use spectroscope::storage;

async fn test_aggregator(search_url: &str) -> Aggregator {
    let db_path = format!("test_db_{}.sqlite", uuid::Uuid::new_v4());
    let pool = init_db_pool(&db_path).await.expect("init pool");
    storage::ensure_schema(&pool).await.expect("ensure schema");

    let config = Config {
        database: DatabaseConfig { path: db_path },
        search: Some(SearchConfig {
            api_url: Some(search_url.to_string()),
            // Points at nothing so only the per-request override key works
            api_key_env: Some("SPECTROSCOPE_TEST_UNSET_KEY".to_string()),
            model: Some("sonar".to_string()),
            timeout_seconds: Some(5),
        }),
        scraping: Some(ScrapingConfig { timeout_seconds: Some(5), user_agent: None }),
        llm: None,
        query: Some(QueryConfig { default_limit: Some(9) }),
        server: None,
    };
    Aggregator::new(&config, pool).expect("build aggregator")
}

/// Body regex distinguishing the three leaning prompts.
fn qualifier(leaning: &str) -> String {
    match leaning {
        "left" => "left-leaning or progressive",
        "center" => "center or neutral",
        "right" => "right-leaning or conservative",
        other => panic!("unknown leaning {}", other),
    }
    .to_string()
}

fn chat_response(content: &str) -> String {
    serde_json::json!({
        "model": "sonar",
        "choices": [{
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }]
    })
    .to_string()
}

/// Prose the way the search model writes it: numbered items with bold
/// titles, labels, and a bare URL per item.
fn leaning_prose(server_url: &str, leaning: &str, count: usize) -> String {
    (0..count)
        .map(|i| {
            format!(
                "{n}. **{leaning} story number {i} headline**\n\
                 Source: {leaning} wire {i}\n\
                 Published: 1 March 2024\n\
                 Snippet: Item {i} of the {leaning} coverage.\n\
                 {server_url}/article/{leaning}-{i}\n\n",
                n = i + 1,
            )
        })
        .collect()
}

const PAGE_HTML: &str = r#"
    <html><head><meta property="og:description" content="A mocked page."></head>
    <body><article><h1>Scraped Headline For Test</h1></article>
    <p>Body paragraph one of the mocked article page.</p></body></html>
"#;

#[tokio::test]
async fn full_run_balances_enriches_and_persists() {
    let mut server = mockito::Server::new_async().await;
    let url = server.url();

    for leaning in ["left", "center", "right"] {
        server
            .mock("POST", "/")
            .match_body(Matcher::Regex(qualifier(leaning)))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(chat_response(&leaning_prose(&url, leaning, 5)))
            .create_async()
            .await;
    }
    let _pages = server
        .mock("GET", Matcher::Regex(r"^/article/".to_string()))
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(PAGE_HTML)
        .create_async()
        .await;

    let aggregator = test_aggregator(&url).await;
    let result = aggregator
        .run_query("climate policy", 9, Some("test-key"))
        .await
        .expect("query run");

    assert_eq!(result.statistics.total, 9);
    assert_eq!(result.statistics.left_count, 3);
    assert_eq!(result.statistics.center_count, 3);
    assert_eq!(result.statistics.right_count, 3);
    assert!(result.timeline_positioning.min_score >= 1.0);
    assert!(result.timeline_positioning.min_score < 4.0);
    assert!(result.timeline_positioning.max_score >= 7.0);
    assert!(result.timeline_positioning.max_score < 10.0);

    // Selection order is left, center, right
    let leanings: Vec<Leaning> =
        result.sources.iter().map(|s| s.political_leaning).collect();
    assert_eq!(&leanings[..3], &[Leaning::Left; 3]);
    assert_eq!(&leanings[6..], &[Leaning::Right; 3]);

    for source in &result.sources {
        // Scraped title wins, parsed source name survives
        assert_eq!(source.title, "Scraped Headline For Test");
        assert!(source.source_name.contains("wire"));
        assert!(source.text.is_some());
        // Every record was persisted under a real rowid
        assert!(source.id.parse::<i64>().is_ok(), "id {} not numeric", source.id);
        let (lo, hi) = source.political_leaning.score_band();
        assert!(source.political_score >= lo && source.political_score < hi);
    }

    // The run was logged with its statistics
    let logged: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM searches WHERE query = 'climate policy'")
            .fetch_one(aggregator.db())
            .await
            .expect("count searches");
    assert_eq!(logged, 1);
    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources")
        .fetch_one(aggregator.db())
        .await
        .expect("count sources");
    assert_eq!(stored, 9);
}

#[tokio::test]
async fn gone_page_is_dropped_and_replaced_with_same_leaning() {
    let mut server = mockito::Server::new_async().await;
    let url = server.url();

    for leaning in ["left", "center", "right"] {
        server
            .mock("POST", "/")
            .match_body(Matcher::Regex(qualifier(leaning)))
            .with_status(200)
            .with_body(chat_response(&leaning_prose(&url, leaning, 5)))
            .create_async()
            .await;
    }
    // Every page resolves except left-0, which is gone for good
    let mut pages = Vec::new();
    for leaning in ["left", "center", "right"] {
        for i in 0..5 {
            let path = format!("/article/{}-{}", leaning, i);
            let status = if path == "/article/left-0" { 404 } else { 200 };
            pages.push(
                server
                    .mock("GET", path.as_str())
                    .with_status(status)
                    .with_body(if status == 200 { PAGE_HTML } else { "" })
                    .create_async()
                    .await,
            );
        }
    }

    let aggregator = test_aggregator(&url).await;
    let result = aggregator
        .run_query("tax reform", 9, Some("test-key"))
        .await
        .expect("query run");

    // The dead source is absent and a left-leaning alternate filled its slot
    assert_eq!(result.statistics.total, 9);
    assert_eq!(result.statistics.left_count, 3);
    let urls: Vec<&str> = result.sources.iter().map(|s| s.url.as_str()).collect();
    assert!(!urls.iter().any(|u| u.ends_with("/article/left-0")));
    assert!(urls.iter().any(|u| u.ends_with("/article/left-3")));
    // Replacement landed in the slot the failed source held
    assert_eq!(result.sources[0].political_leaning, Leaning::Left);
}

#[tokio::test]
async fn transient_failure_keeps_degraded_record() {
    let mut server = mockito::Server::new_async().await;
    let url = server.url();

    // Exactly 3 per leaning: no remainder, so no replacement can happen
    for leaning in ["left", "center", "right"] {
        server
            .mock("POST", "/")
            .match_body(Matcher::Regex(qualifier(leaning)))
            .with_status(200)
            .with_body(chat_response(&leaning_prose(&url, leaning, 3)))
            .create_async()
            .await;
    }
    // center-1 is temporarily unavailable; everything else resolves
    let mut pages = Vec::new();
    for leaning in ["left", "center", "right"] {
        for i in 0..3 {
            let path = format!("/article/{}-{}", leaning, i);
            let status = if path == "/article/center-1" { 503 } else { 200 };
            pages.push(
                server
                    .mock("GET", path.as_str())
                    .with_status(status)
                    .with_body(if status == 200 { PAGE_HTML } else { "" })
                    .create_async()
                    .await,
            );
        }
    }

    let aggregator = test_aggregator(&url).await;
    let result = aggregator
        .run_query("rail strikes", 9, Some("test-key"))
        .await
        .expect("query run");

    assert_eq!(result.statistics.total, 9);
    let degraded = result
        .sources
        .iter()
        .find(|s| s.url.ends_with("/article/center-1"))
        .expect("degraded record present");
    assert!(degraded.text.is_none());
    assert_eq!(
        degraded.metadata.get("status_code").and_then(|v| v.as_u64()),
        Some(503)
    );
    assert!(degraded.metadata.get("error").is_some());
}

#[tokio::test]
async fn thin_bucket_triggers_requery_for_that_leaning_only() {
    let mut server = mockito::Server::new_async().await;
    let url = server.url();

    // limit 18 -> minimum 3 per bucket; left starts with 1
    let _left_initial = server
        .mock("POST", "/")
        .match_body(Matcher::Regex("thintopic from left-leaning".to_string()))
        .with_status(200)
        .with_body(chat_response(&leaning_prose(&url, "left", 1)))
        .create_async()
        .await;
    for leaning in ["center", "right"] {
        server
            .mock("POST", "/")
            .match_body(Matcher::Regex(qualifier(leaning)))
            .with_status(200)
            .with_body(chat_response(&leaning_prose(&url, leaning, 8)))
            .create_async()
            .await;
    }
    let requery = server
        .mock("POST", "/")
        .match_body(Matcher::Regex("established left-leaning news sources only".to_string()))
        .with_status(200)
        .with_body(chat_response(&leaning_prose(&url, "leftextra", 3)))
        .create_async()
        .await;
    let _pages = server
        .mock("GET", Matcher::Regex(r"^/article/".to_string()))
        .with_status(200)
        .with_body(PAGE_HTML)
        .create_async()
        .await;

    let aggregator = test_aggregator(&url).await;
    let result = aggregator
        .run_query("thintopic", 18, Some("test-key"))
        .await
        .expect("query run");

    requery.assert_async().await;
    // 1 initial + 3 requeried left articles, all selected
    assert_eq!(result.statistics.left_count, 4);
    assert_eq!(result.statistics.total, 18);
}

#[tokio::test]
async fn all_leanings_failing_fails_the_run() {
    let mut server = mockito::Server::new_async().await;
    let _search_down = server
        .mock("POST", "/")
        .with_status(500)
        .with_body("upstream broken")
        .expect_at_least(3)
        .create_async()
        .await;

    let aggregator = test_aggregator(&server.url()).await;
    let result = aggregator.run_query("anything", 9, Some("test-key")).await;

    assert!(matches!(result, Err(QueryError::SearchUnavailable)));
}

#[tokio::test]
async fn missing_credentials_fail_before_any_request() {
    let server = mockito::Server::new_async().await;
    let aggregator = test_aggregator(&server.url()).await;

    let result = aggregator.run_query("anything", 9, None).await;
    assert!(matches!(result, Err(QueryError::MissingCredentials)));
}

#[tokio::test]
async fn slow_search_body_fails_within_the_deadline() {
    let mut server = mockito::Server::new_async().await;

    // Headers arrive at once; the body stalls past the client deadline.
    let _slow = server
        .mock("POST", "/")
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(std::time::Duration::from_secs(3));
            w.write_all(b"too late")
        })
        .create_async()
        .await;

    let client = SonarClient::new(server.url(), "test-key", "sonar").with_timeout(1);
    let result = client.search("anything").await;

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("timed out"));
}
