// src/fetch.rs
//! Content Fetcher: full article text from an item's URL, falling back to
//! the source-provided summary. Never fails past this boundary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::error::{is_transient_http, is_transient_status, PipelineError, PipelineResult};
use crate::ingest::html_to_text;
use crate::ingest::types::Item;
use crate::retry::{with_retry, RetryPolicy};

const BROWSER_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Raw page transport, separated so the extraction/fallback logic can be
/// exercised without a network.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> PipelineResult<String>;
}

pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_UA)
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, url: &str) -> PipelineResult<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::content(format!("GET {url}: {e}"), is_transient_http(&e)))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::content(
                format!("GET {url}: HTTP {status}"),
                is_transient_status(status),
            ));
        }
        resp.text()
            .await
            .map_err(|e| PipelineError::content(format!("read {url}: {e}"), true))
    }
}

/// Text handed to enrichment, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchedText {
    Full(String),
    SummaryOnly(String),
    /// Neither the page nor the summary produced any text.
    Unavailable,
}

impl FetchedText {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Full(t) | Self::SummaryOnly(t) => Some(t),
            Self::Unavailable => None,
        }
    }
}

pub struct ContentFetcher {
    pages: Arc<dyn PageFetcher>,
    retry: RetryPolicy,
}

impl ContentFetcher {
    pub fn new(pages: Arc<dyn PageFetcher>, retry: RetryPolicy) -> Self {
        Self { pages, retry }
    }

    pub async fn fetch_full_text(&self, item: &Item) -> FetchedText {
        let url = item.url.trim();
        if !url.is_empty() {
            let pages = &self.pages;
            let fetched = with_retry(&self.retry, "fetch_article", |_| async move {
                let html = pages.fetch_page(url).await?;
                extract_article(&html, url)
                    .ok_or_else(|| PipelineError::content(format!("no article content at {url}"), true))
            })
            .await;
            match fetched {
                Ok(text) => {
                    tracing::info!(key = %item.key(), chars = text.chars().count(), "fetched full article");
                    return FetchedText::Full(text);
                }
                Err(e) => {
                    tracing::warn!(key = %item.key(), error = %e, "article fetch failed, using source summary");
                }
            }
        }

        let summary = item.summary_text.trim();
        if summary.is_empty() {
            FetchedText::Unavailable
        } else {
            FetchedText::SummaryOnly(summary.to_string())
        }
    }
}

fn re(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

/// Main textual content of an HTML page, or `None` when nothing article-like is found.
pub fn extract_article(html: &str, url: &str) -> Option<String> {
    static RE_CHROME: OnceCell<Regex> = OnceCell::new();
    let page = re(
        &RE_CHROME,
        r"(?is)<script\b.*?</script>|<style\b.*?</style>|<noscript\b.*?</noscript>|<nav\b.*?</nav>|<header\b.*?</header>|<footer\b.*?</footer>|<aside\b.*?</aside>",
    )
    .replace_all(html, "");
    let url_lc = url.to_ascii_lowercase();

    let mut content: Option<&str> = None;
    if url_lc.contains("substack.com") {
        content = find_element(&page, "div", Some("available-content"))
            .or_else(|| find_element(&page, "div", Some("body")))
            .or_else(|| find_element(&page, "article", None));
    } else if url_lc.contains("spotify.com") || url_lc.contains("anchor.fm") {
        content = find_element(&page, "div", Some("episode-description"));
        if content.is_none() {
            // Podcast pages often only carry the description in meta tags.
            if let Some(desc) = og_description(&page) {
                return Some(desc);
            }
        }
    }

    let content = content
        .or_else(|| find_element(&page, "article", None))
        .or_else(|| find_element(&page, "div", Some("post-content")))
        .or_else(|| find_element(&page, "div", Some("entry-content")))
        .or_else(|| find_element(&page, "main", None))?;

    let text = clean_article_text(&html_to_text(content));
    (!text.is_empty()).then_some(text)
}

/// Drop short lines that are most likely UI chrome.
fn clean_article_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| l.chars().count() > 20 || l.ends_with(':') || l.ends_with('.'))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Inner HTML of the first `<tag>` (optionally with `class` among its classes),
/// honoring nesting of the same tag.
fn find_element<'a>(html: &'a str, tag: &str, class: Option<&str>) -> Option<&'a str> {
    let tag = regex::escape(tag);
    let open = match class {
        Some(c) => format!(
            r#"(?is)<{tag}\b[^>]*\bclass\s*=\s*["'](?:[^"']*\s)?{}(?:\s[^"']*)?["'][^>]*>"#,
            regex::escape(c)
        ),
        None => format!(r"(?is)<{tag}\b[^>]*>"),
    };
    let open = Regex::new(&open).ok()?;
    let m = open.find(html)?;
    let start = m.end();

    let any = Regex::new(&format!(r"(?is)<(/?){tag}\b[^>]*>")).ok()?;
    let mut depth = 1usize;
    for cap in any.captures_iter(&html[start..]) {
        let whole = cap.get(0)?;
        if cap.get(1).is_some_and(|c| c.as_str() == "/") {
            depth -= 1;
            if depth == 0 {
                return Some(&html[start..start + whole.start()]);
            }
        } else if !whole.as_str().ends_with("/>") {
            depth += 1;
        }
    }
    Some(&html[start..])
}

fn og_description(html: &str) -> Option<String> {
    static RE_META: OnceCell<Regex> = OnceCell::new();
    static RE_CONTENT: OnceCell<Regex> = OnceCell::new();
    let meta = re(
        &RE_META,
        r#"(?is)<meta\b[^>]*property\s*=\s*["']og:description["'][^>]*>"#,
    )
    .find(html)?;
    let content = re(&RE_CONTENT, r#"(?is)\bcontent\s*=\s*["']([^"']*)["']"#)
        .captures(meta.as_str())?
        .get(1)?
        .as_str();
    let text = html_escape::decode_html_entities(content).trim().to_string();
    (!text.is_empty()).then_some(text)
}
