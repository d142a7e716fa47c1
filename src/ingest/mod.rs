// src/ingest/mod.rs
pub mod providers;
pub mod types;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::error::PipelineResult;
use crate::ingest::providers::{feed::FeedSource, forum::ForumSource};
use crate::ingest::types::{Item, ItemKey};
use crate::metrics::SOURCE_ERRORS_TOTAL;

fn re(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

fn strip_tags(s: &str) -> String {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    re(&RE_TAGS, r"(?is)</?[^>]+>").replace_all(s, "").into_owned()
}

fn ascii_quotes(s: &str) -> String {
    s.replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}

/// Single-line text: decode entities, strip tags, normalize quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s).to_string();
    let out = ascii_quotes(&strip_tags(&decoded));
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    re(&RE_WS, r"\s+").replace_all(&out, " ").trim().to_string()
}

/// Multi-paragraph text from an HTML fragment. Block elements become
/// paragraph breaks, `<li>` becomes a `- ` line, paragraphs are joined by a
/// blank line.
pub fn html_to_text(html: &str) -> String {
    static RE_DROP: OnceCell<Regex> = OnceCell::new();
    static RE_BR: OnceCell<Regex> = OnceCell::new();
    static RE_LI: OnceCell<Regex> = OnceCell::new();
    static RE_BLOCK: OnceCell<Regex> = OnceCell::new();
    static RE_SPACES: OnceCell<Regex> = OnceCell::new();

    let s = re(
        &RE_DROP,
        r"(?is)<script\b.*?</script>|<style\b.*?</style>|<noscript\b.*?</noscript>|<!--.*?-->",
    )
    .replace_all(html, "");
    let s = re(&RE_BR, r"(?i)<br\s*/?>").replace_all(&s, "\n");
    let s = re(&RE_LI, r"(?i)<li\b[^>]*>").replace_all(&s, "\n- ");
    let s = re(
        &RE_BLOCK,
        r"(?i)</?(p|div|h[1-6]|ul|ol|li|blockquote|section|article|header|footer|main|tr|table|pre|figure|figcaption)\b[^>]*>",
    )
    .replace_all(&s, "\n");
    let text = html_escape::decode_html_entities(&strip_tags(&s)).to_string();
    let text = ascii_quotes(&text);

    let spaces = re(&RE_SPACES, r"[ \t\u{00A0}]+");
    text.lines()
        .map(|l| spaces.replace_all(l, " ").trim().to_string())
        .filter(|l| !l.is_empty() && l != "-")
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Case-insensitive substring match of any keyword over title + summary.
/// An empty keyword list lets everything through.
pub fn passes_keywords(item: &Item, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let haystack = format!("{} {}", item.title, item.summary_text).to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .any(|k| haystack.contains(&k))
}

/// Keep the first occurrence of every `(source_kind, external_id)`, preserving order.
/// Returns the survivors and the number of in-batch duplicates dropped.
pub fn dedup_batch(items: Vec<Item>) -> (Vec<Item>, usize) {
    let mut seen: HashSet<ItemKey> = HashSet::with_capacity(items.len());
    let mut out = Vec::with_capacity(items.len());
    let mut dropped = 0usize;
    for it in items {
        if seen.insert(it.key()) {
            out.push(it);
        } else {
            dropped += 1;
        }
    }
    (out, dropped)
}

/// Closed set of source adapters.
pub enum SourceAdapter {
    Feed(FeedSource),
    Forum(ForumSource),
}

impl SourceAdapter {
    pub fn name(&self) -> &str {
        match self {
            Self::Feed(f) => f.name(),
            Self::Forum(f) => f.name(),
        }
    }

    pub async fn list_items(&self, since: DateTime<Utc>) -> PipelineResult<Vec<Item>> {
        match self {
            Self::Feed(f) => f.list_items(since).await,
            Self::Forum(f) => f.list_items(since).await,
        }
    }
}

impl From<FeedSource> for SourceAdapter {
    fn from(f: FeedSource) -> Self {
        Self::Feed(f)
    }
}

impl From<ForumSource> for SourceAdapter {
    fn from(f: ForumSource) -> Self {
        Self::Forum(f)
    }
}

/// Adapters polled together and filtered by the same keyword list.
pub struct SourceGroup {
    pub name: String,
    pub adapters: Vec<SourceAdapter>,
    pub keywords: Vec<String>,
}

impl SourceGroup {
    pub fn new(name: impl Into<String>, adapters: Vec<SourceAdapter>) -> Self {
        Self {
            name: name.into(),
            adapters,
            keywords: Vec::new(),
        }
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }
}

/// Listing failure of one adapter within a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source: String,
    pub error: String,
}

/// Items from every adapter of `group`, keyword filter applied. A failing
/// adapter contributes zero items and a [`SourceFailure`].
pub async fn collect_group(
    group: &SourceGroup,
    since: DateTime<Utc>,
) -> (Vec<Item>, Vec<SourceFailure>) {
    let mut items = Vec::new();
    let mut failures = Vec::new();
    for adapter in &group.adapters {
        match adapter.list_items(since).await {
            Ok(mut v) => {
                if v.is_empty() {
                    tracing::warn!(group = %group.name, source = adapter.name(), "source returned 0 items");
                }
                items.append(&mut v);
            }
            Err(e) => {
                tracing::warn!(group = %group.name, source = adapter.name(), error = %e, "source error");
                counter!(SOURCE_ERRORS_TOTAL).increment(1);
                failures.push(SourceFailure {
                    source: adapter.name().to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    let before = items.len();
    items.retain(|it| passes_keywords(it, &group.keywords));
    if before != items.len() {
        tracing::debug!(group = %group.name, filtered = before - items.len(), "keyword filter");
    }
    (items, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{ItemExtra, SourceKind};

    fn item(kind: SourceKind, id: &str, title: &str) -> Item {
        Item {
            source_kind: kind,
            external_id: id.into(),
            title: title.into(),
            url: format!("https://x/{id}"),
            published_at: Utc::now(),
            summary_text: "body".into(),
            extra: ItemExtra::default(),
        }
    }

    #[test]
    fn normalize_text_collapses_ws_and_entities() {
        let s = "  <b>Hello,</b>&nbsp;&nbsp; \u{201C}world\u{201D}  ";
        assert_eq!(normalize_text(s), r#"Hello, "world""#);
    }

    #[test]
    fn html_to_text_keeps_paragraphs_and_lists() {
        let html = "<p>First &amp; foremost.</p><script>var x=1;</script><ul><li>one</li><li>two</li></ul>";
        assert_eq!(html_to_text(html), "First & foremost.\n\n- one\n\n- two");
    }

    #[test]
    fn keywords_are_case_insensitive_substrings() {
        let it = item(SourceKind::FeedResearch, "1", "Ethereum Staking Report");
        assert!(passes_keywords(&it, &[]));
        assert!(passes_keywords(&it, &["staking".into()]));
        assert!(passes_keywords(&it, &["BODY".into()]));
        assert!(!passes_keywords(&it, &["solana".into()]));
    }

    #[test]
    fn dedup_batch_keeps_first_by_kind_and_id() {
        let items = vec![
            item(SourceKind::FeedResearch, "a", "first"),
            item(SourceKind::FeedResearch, "a", "second"),
            item(SourceKind::FeedNewsletter, "a", "other kind"),
        ];
        let (kept, dropped) = dedup_batch(items);
        assert_eq!(dropped, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].title, "first");
        assert_eq!(kept[1].source_kind, SourceKind::FeedNewsletter);
    }
}
