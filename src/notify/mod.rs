// src/notify/mod.rs
//! Delivery Client: TLDR message + rendered document, fanned out per destination.
//!
//! Delivery is per destination, never all-or-nothing: a failing destination
//! is reported and the next one is still attempted.

pub mod dry_run;
pub mod telegram;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PipelineResult;
use crate::ingest::types::Item;
use crate::render::RenderedDocument;
use crate::retry::{with_retry, RetryPolicy};

/// A chat or channel the relay publishes to. `label` only feeds logs and reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub label: String,
    pub chat_id: String,
}

impl Destination {
    pub fn new(label: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            chat_id: chat_id.into(),
        }
    }
}

/// Messaging transport. Implementations map their failures to
/// `PipelineError::DeliveryUnavailable` with an accurate `transient` flag.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: &str, text: &str) -> PipelineResult<()>;
    async fn send_document(&self, chat_id: &str, document: &RenderedDocument) -> PipelineResult<()>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationFailure {
    pub destination: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryResult {
    pub delivered: Vec<String>,
    pub failures: Vec<DestinationFailure>,
}

impl DeliveryResult {
    pub fn any_success(&self) -> bool {
        !self.delivered.is_empty()
    }
}

pub struct DeliveryClient {
    messenger: Arc<dyn Messenger>,
    retry: RetryPolicy,
}

impl DeliveryClient {
    pub fn new(messenger: Arc<dyn Messenger>, retry: RetryPolicy) -> Self {
        Self { messenger, retry }
    }

    pub fn messenger_name(&self) -> &'static str {
        self.messenger.name()
    }

    pub async fn deliver(
        &self,
        destinations: &[Destination],
        text: &str,
        document: Option<&RenderedDocument>,
    ) -> DeliveryResult {
        let mut result = DeliveryResult::default();
        if destinations.is_empty() {
            tracing::warn!("no delivery destinations configured");
        }
        for dest in destinations {
            match self.deliver_one(dest, text, document).await {
                Ok(()) => {
                    tracing::info!(destination = %dest.label, messenger = self.messenger.name(), "delivered");
                    result.delivered.push(dest.label.clone());
                }
                Err(e) => {
                    tracing::warn!(destination = %dest.label, error = %e, "delivery failed");
                    result.failures.push(DestinationFailure {
                        destination: dest.label.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        result
    }

    async fn deliver_one(
        &self,
        dest: &Destination,
        text: &str,
        document: Option<&RenderedDocument>,
    ) -> PipelineResult<()> {
        let messenger = &self.messenger;
        let chat_id = dest.chat_id.as_str();
        with_retry(&self.retry, "send_text", |_| async move {
            messenger.send_text(chat_id, text).await
        })
        .await?;
        if let Some(doc) = document {
            with_retry(&self.retry, "send_document", |_| async move {
                messenger.send_document(chat_id, doc).await
            })
            .await?;
        }
        Ok(())
    }
}

/// First hashtag whose domain key occurs in `url`.
fn source_hashtag<'a>(url: &str, hashtags: &'a BTreeMap<String, String>) -> Option<&'a str> {
    let url = url.to_ascii_lowercase();
    hashtags
        .iter()
        .find(|(domain, _)| !domain.is_empty() && url.contains(&domain.to_ascii_lowercase()))
        .map(|(_, tag)| tag.as_str())
}

/// ```text
/// #Newsletter #Tag
/// TLDR:
/// - bullet
/// Original: https://...
/// Discussion: https://...
/// ```
pub fn build_tldr_message(item: &Item, bullets: &[String], hashtags: &BTreeMap<String, String>) -> String {
    let mut header = item.source_kind.hashtag().to_string();
    if let Some(tag) = source_hashtag(&item.url, hashtags) {
        header.push(' ');
        header.push_str(tag);
    }

    let mut lines = vec![header, "TLDR:".to_string()];
    lines.extend(bullets.iter().map(|b| format!("- {b}")));
    lines.push(format!("Original: {}", item.url));
    if let Some(d) = item.extra.discussion_url.as_deref() {
        lines.push(format!("Discussion: {d}"));
    }
    lines.join("\n")
}
