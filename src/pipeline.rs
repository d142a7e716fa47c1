// src/pipeline.rs
//! # Pipeline Orchestrator
//! Drives one poll cycle: list sources, drop duplicates and already-processed
//! items, then run fetch → translate → policy → summarize → render → deliver
//! for each survivor, one item at a time.
//!
//! Invariants:
//! - Every per-item error stops at the item boundary; only a [`StoreError`]
//!   aborts the cycle.
//! - The record for item *i* is written after its pipeline concludes and
//!   before item *i+1* starts.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, gauge};

use crate::enrich::policy::ContentPolicy;
use crate::enrich::{EnrichedArticle, EnrichmentClient};
use crate::error::{PipelineError, StoreError};
use crate::fetch::{ContentFetcher, FetchedText};
use crate::ingest::types::{Item, ItemKey};
use crate::ingest::{collect_group, dedup_batch, SourceFailure, SourceGroup};
use crate::metrics::{
    ensure_described, CYCLE_LAST_RUN_TS, ITEMS_DELIVERED_TOTAL, ITEMS_FAILED_TOTAL, ITEMS_SKIPPED_TOTAL,
};
use crate::notify::{build_tldr_message, DeliveryClient, Destination, DestinationFailure};
use crate::render::{DocumentRenderer, RenderedDocument};
use crate::store::{DedupStore, ProcessedRecord, RecordStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub key: ItemKey,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Filenames of documents rendered this cycle, in processing order.
    pub rendered: Vec<String>,
    pub source_failures: Vec<SourceFailure>,
    pub item_failures: Vec<ItemFailure>,
    pub destination_failures: Vec<(ItemKey, DestinationFailure)>,
}

impl CycleReport {
    pub fn processed(&self) -> usize {
        self.delivered + self.skipped + self.failed
    }
}

enum Outcome {
    Delivered {
        document: String,
        failures: Vec<DestinationFailure>,
    },
    Skipped(String),
    Failed(String),
}

pub struct Orchestrator {
    groups: Vec<SourceGroup>,
    store: Arc<dyn DedupStore>,
    fetcher: ContentFetcher,
    enrichment: EnrichmentClient,
    policy: ContentPolicy,
    renderer: DocumentRenderer,
    delivery: DeliveryClient,
    destinations: Vec<Destination>,
    hashtags: BTreeMap<String, String>,
    output_dir: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn DedupStore>,
        fetcher: ContentFetcher,
        enrichment: EnrichmentClient,
        delivery: DeliveryClient,
    ) -> Self {
        ensure_described();
        Self {
            groups: Vec::new(),
            store,
            fetcher,
            enrichment,
            policy: ContentPolicy::default(),
            renderer: DocumentRenderer::new(),
            delivery,
            destinations: Vec::new(),
            hashtags: BTreeMap::new(),
            output_dir: None,
        }
    }

    pub fn with_groups(mut self, groups: Vec<SourceGroup>) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_policy(mut self, policy: ContentPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_destinations(mut self, destinations: Vec<Destination>) -> Self {
        self.destinations = destinations;
        self
    }

    pub fn with_hashtags(mut self, hashtags: BTreeMap<String, String>) -> Self {
        self.hashtags = hashtags;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// One full cycle over every configured group.
    pub async fn run_cycle(
        &self,
        lookback: chrono::Duration,
        max_items: usize,
    ) -> Result<CycleReport, StoreError> {
        let started = Instant::now();
        let since = Utc::now() - lookback;
        let mut report = CycleReport::default();

        let mut batch = Vec::new();
        for group in &self.groups {
            let (mut items, mut failures) = collect_group(group, since).await;
            tracing::info!(group = %group.name, items = items.len(), "group listed");
            batch.append(&mut items);
            report.source_failures.append(&mut failures);
        }

        let listed = batch.len();
        let (batch, in_batch_dupes) = dedup_batch(batch);
        let mut fresh = Vec::with_capacity(batch.len());
        for item in batch {
            if !self.store.exists(&item.key())? {
                fresh.push(item);
            }
        }
        let already_seen = listed - in_batch_dupes - fresh.len();
        if fresh.len() > max_items {
            tracing::info!(cap = max_items, dropped = fresh.len() - max_items, "capping items for this cycle");
            fresh.truncate(max_items);
        }
        tracing::info!(
            listed,
            in_batch_dupes,
            already_seen,
            to_process = fresh.len(),
            "cycle candidates"
        );

        for item in &fresh {
            let key = item.key();
            let outcome = self.process_item(item).await;
            let status = match &outcome {
                Outcome::Delivered { .. } => RecordStatus::Delivered,
                Outcome::Skipped(_) => RecordStatus::Skipped,
                Outcome::Failed(_) => RecordStatus::Failed,
            };
            self.store.record(&ProcessedRecord {
                key: key.clone(),
                status,
                processed_at: Utc::now(),
            })?;

            match outcome {
                Outcome::Delivered { document, failures } => {
                    report.delivered += 1;
                    report.rendered.push(document);
                    report
                        .destination_failures
                        .extend(failures.into_iter().map(|f| (key.clone(), f)));
                    counter!(ITEMS_DELIVERED_TOTAL).increment(1);
                }
                Outcome::Skipped(reason) => {
                    tracing::info!(key = %key, reason = %reason, "item skipped");
                    report.skipped += 1;
                    counter!(ITEMS_SKIPPED_TOTAL).increment(1);
                }
                Outcome::Failed(error) => {
                    tracing::warn!(key = %key, error = %error, "item failed");
                    report.failed += 1;
                    report.item_failures.push(ItemFailure { key, error });
                    counter!(ITEMS_FAILED_TOTAL).increment(1);
                }
            }
        }

        gauge!(CYCLE_LAST_RUN_TS).set(Utc::now().timestamp() as f64);
        tracing::info!(
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            source_errors = report.source_failures.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "cycle finished"
        );
        Ok(report)
    }

    /// Cycle, sleep, repeat. Returns only on a store failure.
    pub async fn run_forever(
        &self,
        interval: Duration,
        lookback: chrono::Duration,
        max_items: usize,
    ) -> Result<(), StoreError> {
        loop {
            if let Err(e) = self.run_cycle(lookback, max_items).await {
                tracing::error!(error = %e, "dedup store failure, stopping");
                return Err(e);
            }
            tracing::debug!(secs = interval.as_secs(), "sleeping until next cycle");
            tokio::time::sleep(interval).await;
        }
    }

    async fn process_item(&self, item: &Item) -> Outcome {
        let key = item.key();
        tracing::info!(key = %key, title = %item.title, "processing item");

        let fetched = self.fetcher.fetch_full_text(item).await;
        let Some(text) = fetched.text() else {
            return Outcome::Skipped(
                PipelineError::content("no article text and no source summary", false).to_string(),
            );
        };
        if matches!(fetched, FetchedText::SummaryOnly(_)) {
            tracing::debug!(key = %key, "enriching source summary only");
        }

        let translated = match self.enrichment.translate(text).await {
            Ok(t) => t,
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        if let Some(rule) = self.policy.check(&translated) {
            let err = PipelineError::ContentPolicyViolation {
                rule: rule.name.clone(),
            };
            return Outcome::Skipped(err.to_string());
        }

        let bullets = match self.enrichment.summarize(&translated, item).await {
            Ok(b) => b,
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        let enriched = EnrichedArticle {
            full_text_translated: translated,
            tldr_bullets: bullets,
            origin_item: item,
        };
        let document = self.renderer.render(item, &enriched);
        self.save_document(&document).await;

        let message = build_tldr_message(item, &enriched.tldr_bullets, &self.hashtags);
        let result = self
            .delivery
            .deliver(&self.destinations, &message, Some(&document))
            .await;

        if result.any_success() {
            Outcome::Delivered {
                document: document.filename,
                failures: result.failures,
            }
        } else if result.failures.is_empty() {
            Outcome::Failed("no delivery destinations configured".to_string())
        } else {
            let reasons: Vec<String> = result
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.destination, f.error))
                .collect();
            Outcome::Failed(format!("all destinations failed ({})", reasons.join("; ")))
        }
    }

    async fn save_document(&self, document: &RenderedDocument) {
        let Some(dir) = &self.output_dir else {
            return;
        };
        let path = dir.join(&document.filename);
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, &document.bytes).await
        }
        .await;
        match written {
            Ok(()) => tracing::info!(path = %path.display(), "document saved"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "document write failed"),
        }
    }
}
