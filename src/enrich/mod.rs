// src/enrich/mod.rs
//! Enrichment: translation, then TLDR bullets generated from the translated text.
//!
//! Translation runs first so bullets and the full document share terminology
//! and nothing is translated twice.

pub mod backend;
pub mod policy;

use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};
use crate::ingest::types::Item;
use crate::retry::{with_retry, RetryPolicy};

use self::backend::{CompletionBackend, CompletionRequest, Task};

pub const MIN_BULLETS: usize = 3;
pub const MAX_BULLETS: usize = 7;
const BULLET_PLACEHOLDER: &str = "…";

/// Transient per-item result of fetch + translate + summarize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedArticle<'a> {
    pub full_text_translated: String,
    pub tldr_bullets: Vec<String>,
    pub origin_item: &'a Item,
}

#[derive(Debug, Clone)]
pub struct EnrichmentOptions {
    pub translate_model: String,
    pub tldr_model: String,
    /// ISO 639-1 code, e.g. `ru`.
    pub target_language: String,
    pub min_bullets: usize,
    pub max_bullets: usize,
}

impl Default for EnrichmentOptions {
    fn default() -> Self {
        Self {
            translate_model: "mistralai/mixtral-8x7b-instruct".to_string(),
            tldr_model: "mistralai/mixtral-8x7b-instruct".to_string(),
            target_language: "ru".to_string(),
            min_bullets: MIN_BULLETS,
            max_bullets: MAX_BULLETS,
        }
    }
}

pub struct EnrichmentClient {
    backend: Arc<dyn CompletionBackend>,
    opts: EnrichmentOptions,
    retry: RetryPolicy,
}

impl EnrichmentClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, mut opts: EnrichmentOptions, retry: RetryPolicy) -> Self {
        opts.min_bullets = opts.min_bullets.clamp(MIN_BULLETS, MAX_BULLETS);
        opts.max_bullets = opts.max_bullets.clamp(opts.min_bullets, MAX_BULLETS);
        Self { backend, opts, retry }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn translate(&self, text: &str) -> PipelineResult<String> {
        let language = language_name(&self.opts.target_language);
        let system = format!(
            "You are a professional translator. Translate the following text to {language} ONLY. \
             Output ONLY the {language} translation, nothing else. Preserve the meaning and the \
             paragraph, list and link structure. Use a neutral business tone."
        );
        let req = CompletionRequest {
            task: Task::Translate,
            model: &self.opts.translate_model,
            system: &system,
            user: text,
        };
        let backend = &self.backend;
        let req = &req;
        let out = with_retry(&self.retry, "translate", |_| async move { backend.complete(req).await }).await?;
        if out.trim().is_empty() {
            return Err(PipelineError::enrichment("empty translation", false));
        }
        Ok(out)
    }

    pub async fn summarize(&self, translated_text: &str, item: &Item) -> PipelineResult<Vec<String>> {
        let language = language_name(&self.opts.target_language);
        let (min, max) = (self.opts.min_bullets, self.opts.max_bullets);
        let system = format!(
            "Create a {min}-{max} bullet point summary in {language} ONLY. Each bullet should be \
             1-2 sentences, concise and fact-focused. Preserve key facts and numbers. Start each \
             bullet with '- ' (dash and space). Skip disclaimers, legal notices, advertisements and \
             promotional content; focus only on the main content and key insights. \
             The article is titled \"{title}\".",
            title = item.title
        );
        let req = CompletionRequest {
            task: Task::Summarize {
                min_bullets: min,
                max_bullets: max,
            },
            model: &self.opts.tldr_model,
            system: &system,
            user: translated_text,
        };
        let backend = &self.backend;
        let req = &req;
        let raw = with_retry(&self.retry, "summarize", |_| async move { backend.complete(req).await }).await?;
        let bullets = parse_bullets(&raw, min, max);
        if bullets.is_empty() {
            return Err(PipelineError::enrichment("summary contained no bullets", false));
        }
        Ok(bullets)
    }
}

/// Bullet lines from a completion: list markers stripped, blank lines dropped,
/// padded up to `min` and truncated to `max`. Empty input stays empty.
pub fn parse_bullets(raw: &str, min: usize, max: usize) -> Vec<String> {
    let mut bullets: Vec<String> = raw
        .lines()
        .map(strip_list_marker)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .take(max)
        .collect();
    if bullets.is_empty() {
        return bullets;
    }
    while bullets.len() < min {
        bullets.push(BULLET_PLACEHOLDER.to_string());
    }
    bullets
}

fn strip_list_marker(line: &str) -> &str {
    let l = line.trim().trim_start_matches(['-', '•', '*', '–', '—']).trim_start();
    let digits = l.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &l[digits..];
        if let Some(r) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return r.trim();
        }
    }
    l.trim()
}

fn language_name(code: &str) -> String {
    match code.to_ascii_lowercase().as_str() {
        "ru" => "Russian".to_string(),
        "en" => "English".to_string(),
        "uk" => "Ukrainian".to_string(),
        "de" => "German".to_string(),
        "fr" => "French".to_string(),
        "es" => "Spanish".to_string(),
        other => other.to_string(),
    }
}
