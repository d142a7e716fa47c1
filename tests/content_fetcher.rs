// tests/content_fetcher.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use feed_relay::fetch::{ContentFetcher, FetchedText, HttpPageFetcher};
use feed_relay::ingest::types::ItemExtra;
use feed_relay::retry::RetryPolicy;
use feed_relay::{Item, SourceKind};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ARTICLE: &str = r#"<html><head><title>x</title></head><body>
<nav>Home | Archive | Subscribe to the newsletter today</nav>
<article>
  <h1>Liquidity is back on chain:</h1>
  <p>Decentralized exchange volume doubled over the quarter.</p>
  <p>Share</p>
</article>
</body></html>"#;

fn item(url: String, summary: &str) -> Item {
    Item {
        source_kind: SourceKind::FeedResearch,
        external_id: "r1".into(),
        title: "Liquidity".into(),
        url,
        published_at: Utc::now(),
        summary_text: summary.into(),
        extra: ItemExtra::default(),
    }
}

fn fetcher(max_attempts: u32) -> ContentFetcher {
    let pages = HttpPageFetcher::new(Duration::from_secs(5)).unwrap();
    ContentFetcher::new(Arc::new(pages), RetryPolicy::immediate(max_attempts))
}

#[tokio::test]
async fn full_article_is_extracted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/p/liquidity"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE))
        .mount(&server)
        .await;

    let got = fetcher(3)
        .fetch_full_text(&item(format!("{}/p/liquidity", server.uri()), "teaser"))
        .await;
    assert_eq!(
        got,
        FetchedText::Full(
            "Liquidity is back on chain:\n\nDecentralized exchange volume doubled over the quarter."
                .into()
        )
    );
}

#[tokio::test]
async fn transient_errors_are_retried_before_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/p/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/p/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE))
        .mount(&server)
        .await;

    let got = fetcher(3)
        .fetch_full_text(&item(format!("{}/p/flaky", server.uri()), "teaser"))
        .await;
    assert!(matches!(got, FetchedText::Full(_)));
}

#[tokio::test]
async fn not_found_falls_back_to_summary_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/p/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let got = fetcher(3)
        .fetch_full_text(&item(format!("{}/p/gone", server.uri()), "  short teaser "))
        .await;
    assert_eq!(got, FetchedText::SummaryOnly("short teaser".into()));
}

#[tokio::test]
async fn no_page_and_no_summary_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let got = fetcher(2)
        .fetch_full_text(&item(format!("{}/p/down", server.uri()), ""))
        .await;
    assert_eq!(got, FetchedText::Unavailable);
    assert_eq!(got.text(), None);
}
