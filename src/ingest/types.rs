// src/ingest/types.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of source kinds. Every adapter normalizes into [`Item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[serde(alias = "research")]
    FeedResearch,
    #[serde(alias = "newsletter")]
    FeedNewsletter,
    Forum,
}

impl SourceKind {
    /// Stable identifier persisted in the dedup store.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FeedResearch => "research",
            Self::FeedNewsletter => "newsletter",
            Self::Forum => "forum",
        }
    }

    /// Human label used for document filenames and the "Type" line.
    pub fn label(self) -> &'static str {
        match self {
            Self::FeedResearch => "Research",
            Self::FeedNewsletter => "Newsletter",
            Self::Forum => "HackerNews",
        }
    }

    /// Category tag prefixed to delivered messages.
    pub fn hashtag(self) -> &'static str {
        match self {
            Self::FeedResearch => "#Research",
            Self::FeedNewsletter => "#Newsletter",
            Self::Forum => "#HackerNews",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(source_kind, external_id)`: identity of an item across all time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub source_kind: SourceKind,
    pub external_id: String,
}

impl ItemKey {
    pub fn new(source_kind: SourceKind, external_id: impl Into<String>) -> Self {
        Self {
            source_kind,
            external_id: external_id.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_kind, self.external_id)
    }
}

/// Source-specific optional fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemExtra {
    pub discussion_url: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub source_kind: SourceKind,
    pub external_id: String,
    pub title: String,
    pub url: String,
    /// Falls back to discovery time when the source gives no date.
    pub published_at: DateTime<Utc>,
    pub summary_text: String,
    #[serde(default)]
    pub extra: ItemExtra,
}

impl Item {
    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.source_kind, self.external_id.clone())
    }
}
