// Manual smoke tool: run one leaning fetch against the live search API and
// print what the parser makes of the response.
//
// Usage: search_probe "<topic>" [left|center|right]

use spectroscope::models::Leaning;
use spectroscope::search::{self, SonarClient, DEFAULT_API_KEY_ENV, DEFAULT_API_URL, DEFAULT_MODEL};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut args = std::env::args().skip(1);
    let topic = args.next().unwrap_or_else(|| "climate policy".to_string());
    let leaning = args
        .next()
        .as_deref()
        .and_then(Leaning::parse)
        .unwrap_or(Leaning::Center);

    let api_key = std::env::var(DEFAULT_API_KEY_ENV)
        .unwrap_or_else(|_| panic!("Set the {} environment variable", DEFAULT_API_KEY_ENV));
    let base_url =
        std::env::var("SEARCH_BASE_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
    let model = std::env::var("SEARCH_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

    println!("\n{}", "=".repeat(60));
    println!("Probing search API");
    println!("Base URL: {}", base_url);
    println!("Model: {}", model);
    println!("Topic: {} ({})", topic, leaning);
    println!("{}", "=".repeat(60));

    let client = SonarClient::new(&base_url, &api_key, &model);

    match search::fetch_for_leaning(&client, &topic, leaning).await {
        Ok(articles) => {
            println!("\n✓ Parsed {} articles", articles.len());
            for (i, article) in articles.iter().enumerate() {
                println!("\n[{}] {}", i + 1, article.title);
                println!("    source: {}", article.source_name);
                println!("    url: {}", article.url);
                println!("    domain: {}", article.domain);
                if !article.published_date.is_empty() {
                    println!("    published: {}", article.published_date);
                }
                let snippet: String = article.snippet.chars().take(120).collect();
                println!("    snippet: {}...", snippet);
            }
        }
        Err(e) => {
            eprintln!("✗ Search failed: {}", e);
        }
    }

    println!("\n{}", "=".repeat(60));
}
