// src/render.rs
//! Document Renderer: translated article + metadata into a standalone HTML file.
//!
//! Pure and deterministic: same inputs, same bytes. No I/O here; the
//! orchestrator decides whether the bytes are written to disk.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::enrich::EnrichedArticle;
use crate::ingest::types::{Item, SourceKind};

const SLUG_MAX: usize = 60;
const EXTENSION: &str = "html";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentRenderer;

impl DocumentRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, item: &Item, enriched: &EnrichedArticle<'_>) -> RenderedDocument {
        let mut html = String::with_capacity(enriched.full_text_translated.len() * 2 + 1024);
        let title = esc(&item.title);

        html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
        html.push_str(&format!("<title>{title}</title>\n"));
        html.push_str("</head>\n<body>\n");
        html.push_str(&format!("<h1>{title}</h1>\n"));

        html.push_str("<p class=\"meta\">\n");
        html.push_str(&format!(
            "<b>Published:</b> {}<br>\n",
            format_published(item.published_at)
        ));
        html.push_str(&format!("<b>Type:</b> {}<br>\n", item.source_kind.label()));
        html.push_str(&format!("<b>Original:</b> {}", link(&item.url)));
        if let Some(d) = item.extra.discussion_url.as_deref() {
            html.push_str(&format!("<br>\n<b>Discussion:</b> {}", link(d)));
        }
        html.push_str("\n</p>\n<hr>\n");

        render_body(&enriched.full_text_translated, &mut html);
        html.push_str("</body>\n</html>\n");

        RenderedDocument {
            filename: document_filename(item),
            bytes: html.into_bytes(),
        }
    }
}

/// `<Label>_<YYYY-MM-DD>_<slug>.html`
pub fn document_filename(item: &Item) -> String {
    format!(
        "{}_{}_{}.{EXTENSION}",
        item.source_kind.label(),
        item.published_at.format("%Y-%m-%d"),
        item_slug(item)
    )
}

fn item_slug(item: &Item) -> String {
    let raw = match item.source_kind {
        SourceKind::Forum => format!("hn-{}", item.external_id),
        SourceKind::FeedResearch | SourceKind::FeedNewsletter => {
            let no_fragment = item.url.split('#').next().unwrap_or_default();
            let (path, query) = no_fragment.split_once('?').unwrap_or((no_fragment, ""));
            // `?id=1` and `?id=2` are different articles; tracking params are not.
            let params: Vec<&str> = query
                .split('&')
                .filter(|p| !p.is_empty() && !p.starts_with("utm"))
                .collect();
            match path
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty() && !s.contains(':'))
            {
                None => item.external_id.clone(),
                Some(segment) if params.is_empty() => segment.to_string(),
                Some(segment) => format!("{segment}-{}", params.join("-")),
            }
        }
    };
    slugify(&raw)
}

/// Lowercase, runs of non-alphanumerics become `-`, bounded length, never empty.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut dash = false;
    for c in s.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    let mut out: String = out.chars().take(SLUG_MAX).collect();
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        "item".to_string()
    } else {
        out
    }
}

fn format_published(ts: DateTime<Utc>) -> String {
    ts.format("%d.%m.%Y %H:%M").to_string()
}

fn re(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

fn esc(s: &str) -> String {
    html_escape::encode_text(s).into_owned()
}

fn link(url: &str) -> String {
    let href = html_escape::encode_double_quoted_attribute(url);
    format!("<a href=\"{href}\">{}</a>", esc(url))
}

#[derive(Debug, PartialEq, Eq)]
enum Block<'a> {
    Heading(&'a str),
    Bullet(&'a str),
    Numbered(&'a str),
    Paragraph(&'a str),
}

fn classify(line: &str) -> Block<'_> {
    static RE_NUMBERED: OnceCell<Regex> = OnceCell::new();
    static RE_TIMESTAMP: OnceCell<Regex> = OnceCell::new();

    for marker in ["- ", "• ", "* ", "– "] {
        if let Some(rest) = line.strip_prefix(marker) {
            return Block::Bullet(rest.trim());
        }
    }
    if let Some(c) = re(&RE_NUMBERED, r"^\d{1,3}[.)]\s+(.+)$").captures(line) {
        if let Some(m) = c.get(1) {
            return Block::Numbered(m.as_str());
        }
    }
    let len = line.chars().count();
    let all_caps = line.chars().any(char::is_alphabetic)
        && line.chars().filter(|c| c.is_alphabetic()).all(char::is_uppercase);
    if (line.ends_with(':') && len <= 100)
        || (all_caps && len <= 60)
        || re(&RE_TIMESTAMP, r"^\d{1,2}:\d{2}(?::\d{2})?\b").is_match(line)
    {
        return Block::Heading(line);
    }
    Block::Paragraph(line)
}

/// Escaped text with bare `http(s)://` URLs turned into links.
fn linkify(text: &str) -> String {
    static RE_URL: OnceCell<Regex> = OnceCell::new();
    let url_re = re(&RE_URL, r#"https?://[^\s<>"]+"#);
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in url_re.find_iter(text) {
        let url = m.as_str().trim_end_matches(['.', ',', ';', ')', '!', '?']);
        out.push_str(&esc(&text[last..m.start()]));
        out.push_str(&link(url));
        last = m.start() + url.len();
    }
    out.push_str(&esc(&text[last..]));
    out
}

fn render_body(text: &str, html: &mut String) {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.is_empty() {
        html.push_str("<p>(empty)</p>\n");
        return;
    }

    let mut open_list: Option<&'static str> = None;
    for line in lines {
        let block = classify(line);
        let wanted = match block {
            Block::Bullet(_) => Some("ul"),
            Block::Numbered(_) => Some("ol"),
            _ => None,
        };
        if open_list != wanted {
            if let Some(tag) = open_list {
                html.push_str(&format!("</{tag}>\n"));
            }
            if let Some(tag) = wanted {
                html.push_str(&format!("<{tag}>\n"));
            }
            open_list = wanted;
        }
        match block {
            Block::Heading(t) => html.push_str(&format!("<h2>{}</h2>\n", esc(t))),
            Block::Bullet(t) | Block::Numbered(t) => {
                html.push_str(&format!("<li>{}</li>\n", linkify(t)))
            }
            Block::Paragraph(t) => html.push_str(&format!("<p>{}</p>\n", linkify(t))),
        }
    }
    if let Some(tag) = open_list {
        html.push_str(&format!("</{tag}>\n"));
    }
}
