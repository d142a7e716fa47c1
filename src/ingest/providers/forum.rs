// src/ingest/providers/forum.rs
//! Hacker News (Firebase API) adapter.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{PipelineError, PipelineResult};
use crate::ingest::normalize_text;
use crate::ingest::types::{Item, ItemExtra, SourceKind};

pub const DEFAULT_HN_API: &str = "https://hacker-news.firebaseio.com/v0";
const HN_ITEM_PAGE: &str = "https://news.ycombinator.com/item?id=";

#[derive(Debug, Deserialize)]
struct HnStory {
    id: u64,
    #[serde(rename = "type")]
    kind: Option<String>,
    title: Option<String>,
    url: Option<String>,
    by: Option<String>,
    time: Option<i64>,
    #[serde(default)]
    dead: bool,
    #[serde(default)]
    deleted: bool,
}

pub struct ForumSource {
    base_url: String,
    max_stories: usize,
    client: reqwest::Client,
}

impl ForumSource {
    pub fn new(base_url: impl Into<String>, max_stories: usize, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_stories,
            client,
        }
    }

    pub fn name(&self) -> &str {
        "hacker-news"
    }

    pub async fn list_items(&self, since: DateTime<Utc>) -> PipelineResult<Vec<Item>> {
        let ids: Vec<u64> = self
            .client
            .get(format!("{}/newstories.json", self.base_url))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| self.unavailable(format!("newstories: {e}")))?
            .json()
            .await
            .map_err(|e| self.unavailable(format!("newstories body: {e}")))?;

        let now = Utc::now();
        let mut out = Vec::new();
        for id in ids.into_iter().take(self.max_stories) {
            // One broken story never hides the rest of the listing.
            match self.fetch_story(id).await {
                Ok(Some(story)) => {
                    if let Some(item) = story_to_item(story, now) {
                        if item.published_at >= since {
                            out.push(item);
                        }
                    }
                }
                Ok(None) => tracing::debug!(story = id, "story not found"),
                Err(e) => tracing::warn!(story = id, error = %e, "failed to fetch story"),
            }
        }
        tracing::info!(source = self.name(), items = out.len(), "forum listed");
        Ok(out)
    }

    async fn fetch_story(&self, id: u64) -> Result<Option<HnStory>, reqwest::Error> {
        self.client
            .get(format!("{}/item/{id}.json", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json::<Option<HnStory>>()
            .await
    }

    fn unavailable(&self, reason: String) -> PipelineError {
        PipelineError::SourceUnavailable {
            source_name: self.name().to_string(),
            reason,
        }
    }
}

/// Live stories only. Text posts (Ask HN and friends) point at their discussion page.
fn story_to_item(story: HnStory, now: DateTime<Utc>) -> Option<Item> {
    if story.dead || story.deleted || story.kind.as_deref() != Some("story") {
        return None;
    }
    let discussion_url = format!("{HN_ITEM_PAGE}{}", story.id);
    let url = story
        .url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| discussion_url.clone());
    let title = story
        .title
        .map(|t| normalize_text(&t))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    Some(Item {
        source_kind: SourceKind::Forum,
        external_id: story.id.to_string(),
        summary_text: title.clone(),
        title,
        url,
        published_at: story
            .time
            .and_then(|t| DateTime::from_timestamp(t, 0))
            .unwrap_or(now),
        extra: ItemExtra {
            discussion_url: Some(discussion_url),
            author: story.by,
        },
    })
}
