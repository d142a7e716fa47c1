// src/ingest/providers/feed.rs
//! RSS 2.0 / Atom feed adapter.

use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{
    format_description::well_known::{Rfc2822, Rfc3339},
    OffsetDateTime,
};

use crate::error::{PipelineError, PipelineResult};
use crate::ingest::types::{Item, ItemExtra, SourceKind};
use crate::ingest::{html_to_text, normalize_text};

// --- RSS 2.0 ---

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    // quick-xml matches on the local name, so `content:encoded` arrives as `encoded`.
    #[serde(rename = "encoded")]
    content_encoded: Option<String>,
    /// `dc:creator`
    creator: Option<String>,
}

// --- Atom ---

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<String>,
    title: Option<Text>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<Text>,
    content: Option<Text>,
    author: Option<AtomAuthor>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel", default)]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: Option<String>,
}

/// Element whose attributes we ignore (`<guid isPermaLink="false">`, `<title type="html">`).
#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let unix = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?.unix_timestamp();
    DateTime::from_timestamp(unix, 0)
}

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    let unix = OffsetDateTime::parse(ts.trim(), &Rfc3339).ok()?.unix_timestamp();
    DateTime::from_timestamp(unix, 0)
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

pub struct FeedSource {
    kind: SourceKind,
    mode: Mode,
}

impl FeedSource {
    /// Parses an in-memory document instead of fetching.
    pub fn from_fixture(kind: SourceKind, xml: &str) -> Self {
        Self {
            kind,
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_url(kind: SourceKind, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            kind,
            mode: Mode::Http {
                url: url.into(),
                client,
            },
        }
    }

    pub fn name(&self) -> &str {
        match &self.mode {
            Mode::Fixture(_) => "fixture",
            Mode::Http { url, .. } => url,
        }
    }

    pub async fn list_items(&self, since: DateTime<Utc>) -> PipelineResult<Vec<Item>> {
        let unavailable = |reason: String| PipelineError::SourceUnavailable {
            source_name: self.name().to_string(),
            reason,
        };
        let now = Utc::now();
        match &self.mode {
            Mode::Fixture(xml) => parse_feed(self.kind, xml, since, now).map_err(unavailable),
            Mode::Http { url, client } => {
                let body = client
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| unavailable(format!("http: {e}")))?
                    .text()
                    .await
                    .map_err(|e| unavailable(format!("body: {e}")))?;
                let items = parse_feed(self.kind, &body, since, now).map_err(unavailable)?;
                tracing::info!(feed = %url, items = items.len(), "feed listed");
                Ok(items)
            }
        }
    }
}

/// Parse an RSS or Atom document into items published at or after `since`.
/// Undated entries are stamped with `now`.
pub fn parse_feed(
    kind: SourceKind,
    xml: &str,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<Item>, String> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    let items = if looks_like_atom(&xml_clean) {
        let feed: AtomFeed = from_str(&xml_clean).map_err(|e| format!("parsing atom xml: {e}"))?;
        feed.entry
            .into_iter()
            .filter_map(|e| atom_to_item(kind, e, now))
            .collect::<Vec<_>>()
    } else {
        let rss: Rss = from_str(&xml_clean).map_err(|e| format!("parsing rss xml: {e}"))?;
        rss.channel
            .item
            .into_iter()
            .filter_map(|it| rss_to_item(kind, it, now))
            .collect::<Vec<_>>()
    };

    Ok(items
        .into_iter()
        .filter(|it| {
            let keep = it.published_at >= since;
            if !keep {
                tracing::debug!(title = %it.title, "skip (older than lookback)");
            }
            keep
        })
        .collect())
}

fn looks_like_atom(xml: &str) -> bool {
    match (xml.find("<feed"), xml.find("<rss")) {
        (Some(_), None) => true,
        (Some(f), Some(r)) => f < r,
        _ => false,
    }
}

fn rss_to_item(kind: SourceKind, it: RssItem, now: DateTime<Utc>) -> Option<Item> {
    let link = non_empty(it.link);
    let title = non_empty(it.title).map(|t| normalize_text(&t));
    let external_id = non_empty(it.guid.map(|g| g.value))
        .or_else(|| link.clone())
        .or_else(|| title.clone())?;
    let body = non_empty(it.content_encoded)
        .or_else(|| non_empty(it.description))
        .map(|s| html_to_text(&s))
        .unwrap_or_default();

    Some(Item {
        source_kind: kind,
        external_id,
        title: title.unwrap_or_else(|| "Untitled".to_string()),
        url: link.unwrap_or_default(),
        published_at: it.pub_date.as_deref().and_then(parse_rfc2822).unwrap_or(now),
        summary_text: body,
        extra: ItemExtra {
            discussion_url: None,
            author: non_empty(it.creator),
        },
    })
}

fn atom_to_item(kind: SourceKind, e: AtomEntry, now: DateTime<Utc>) -> Option<Item> {
    let link = e
        .link
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| e.link.first())
        .map(|l| l.href.trim().to_string())
        .filter(|h| !h.is_empty());
    let title = non_empty(e.title.map(|t| t.value)).map(|t| normalize_text(&t));
    let external_id = non_empty(e.id)
        .or_else(|| link.clone())
        .or_else(|| title.clone())?;
    let published_at = e
        .published
        .as_deref()
        .and_then(parse_rfc3339)
        .or_else(|| e.updated.as_deref().and_then(parse_rfc3339))
        .unwrap_or(now);
    let body = non_empty(e.content.map(|c| c.value))
        .or_else(|| non_empty(e.summary.map(|s| s.value)))
        .map(|s| html_to_text(&s))
        .unwrap_or_default();

    Some(Item {
        source_kind: kind,
        external_id,
        title: title.unwrap_or_else(|| "Untitled".to_string()),
        url: link.unwrap_or_default(),
        published_at,
        summary_text: body,
        extra: ItemExtra {
            discussion_url: None,
            author: e.author.and_then(|a| non_empty(a.name)),
        },
    })
}

// quick-xml only knows the five XML entities.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Research</title>
    <item>
      <title>Stablecoins&nbsp;Q3</title>
      <link>https://research.example/p/stablecoins-q3</link>
      <guid isPermaLink="false">rs-1</guid>
      <pubDate>Tue, 14 Oct 2025 09:00:00 +0000</pubDate>
      <description>Short teaser</description>
      <dc:creator>Ana Ortiz</dc:creator>
      <content:encoded><![CDATA[<p>Full body paragraph one.</p><p>Paragraph two.</p>]]></content:encoded>
    </item>
    <item>
      <title>Old post</title>
      <link>https://research.example/p/old</link>
      <pubDate>Mon, 01 Jan 2024 09:00:00 +0000</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn rss_prefers_guid_and_full_content() {
        let since = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 10, 15, 0, 0, 0).unwrap();
        let items = parse_feed(SourceKind::FeedResearch, RSS, since, now).unwrap();
        assert_eq!(items.len(), 1);
        let it = &items[0];
        assert_eq!(it.external_id, "rs-1");
        assert_eq!(it.title, "Stablecoins Q3");
        assert_eq!(it.url, "https://research.example/p/stablecoins-q3");
        assert!(it.summary_text.contains("Full body paragraph one."));
        assert!(it.summary_text.contains("Paragraph two."));
        assert!(!it.summary_text.contains("Short teaser"));
        assert_eq!(it.extra.author.as_deref(), Some("Ana Ortiz"));
        assert_eq!(it.published_at, Utc.with_ymd_and_hms(2025, 10, 14, 9, 0, 0).unwrap());
    }

    #[test]
    fn atom_entries_are_normalized() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Letters</title>
  <entry>
    <id>tag:letters.example,2025:42</id>
    <title type="html">Weekly letter</title>
    <link rel="alternate" href="https://letters.example/42"/>
    <updated>2025-10-14T08:00:00Z</updated>
    <summary>Summary text here.</summary>
  </entry>
</feed>"#;
        let since = Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 10, 15, 0, 0, 0).unwrap();
        let items = parse_feed(SourceKind::FeedNewsletter, xml, since, now).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].external_id, "tag:letters.example,2025:42");
        assert_eq!(items[0].url, "https://letters.example/42");
        assert_eq!(items[0].summary_text, "Summary text here.");
    }

    #[test]
    fn undated_items_use_discovery_time() {
        let xml = r#"<rss><channel><item><link>https://x/p1</link><title>T</title></item></channel></rss>"#;
        let now = Utc.with_ymd_and_hms(2025, 10, 15, 12, 0, 0).unwrap();
        let items = parse_feed(SourceKind::FeedNewsletter, xml, now, now).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].external_id, "https://x/p1");
        assert_eq!(items[0].published_at, now);
    }

    #[test]
    fn garbage_is_an_error() {
        let now = Utc::now();
        assert!(parse_feed(SourceKind::FeedResearch, "not xml at all <", now, now).is_err());
    }
}
