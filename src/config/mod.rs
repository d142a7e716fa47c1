// src/config/mod.rs
//! Settings value object: loaded once at startup, handed to component constructors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use std::{env, fs};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::enrich::backend::{ChatCompletionsBackend, CompletionBackend, StubBackend, DEFAULT_BASE_URL};
use crate::enrich::policy::ContentPolicy;
use crate::enrich::{EnrichmentOptions, MAX_BULLETS, MIN_BULLETS};
use crate::ingest::providers::feed::FeedSource;
use crate::ingest::providers::forum::{ForumSource, DEFAULT_HN_API};
use crate::ingest::types::SourceKind;
use crate::ingest::SourceGroup;
use crate::notify::telegram::DEFAULT_API_BASE;
use crate::notify::Destination;
use crate::retry::{RetryConfig, RetryPolicy};

const ENV_PATH: &str = "RELAY_CONFIG_PATH";
const DEFAULT_PATH: &str = "config/relay.toml";
const FEED_UA: &str = concat!("feed-relay/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentMode {
    /// Offline stub backend, no API key needed.
    #[default]
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentSettings {
    pub mode: EnrichmentMode,
    /// "ENV" means: read from OPENROUTER_API_KEY
    pub api_key: String,
    pub base_url: String,
    pub translate_model: String,
    pub tldr_model: String,
    pub target_language: String,
    pub min_bullets: usize,
    pub max_bullets: usize,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        let opts = EnrichmentOptions::default();
        Self {
            mode: EnrichmentMode::Dev,
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            translate_model: opts.translate_model,
            tldr_model: opts.tldr_model,
            target_language: opts.target_language,
            min_bullets: opts.min_bullets,
            max_bullets: opts.max_bullets,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    /// "ENV" means: read from TELEGRAM_BOT_TOKEN
    pub bot_token: String,
    /// "ENV" means: read from TELEGRAM_CHAT_ID
    pub chat_id: String,
    pub channel_id: Option<String>,
    pub api_base: String,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            channel_id: None,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupSettings {
    pub kind: SourceKind,
    pub feeds: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForumSettings {
    pub enabled: bool,
    pub base_url: String,
    pub max_stories: usize,
    pub keywords: Vec<String>,
}

impl Default for ForumSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: DEFAULT_HN_API.to_string(),
            max_stories: 5,
            keywords: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub extra_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub poll_interval_minutes: u64,
    pub bootstrap_lookback_hours: i64,
    pub max_items_per_run: usize,
    pub state_db_path: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub http_timeout_secs: u64,
    pub retry: RetryConfig,
    pub enrichment: EnrichmentSettings,
    pub telegram: TelegramSettings,
    pub groups: Vec<GroupSettings>,
    pub forum: ForumSettings,
    pub policy: PolicySettings,
    /// Domain substring -> hashtag, e.g. `"bankless.com" = "#Bankless"`.
    pub source_hashtags: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_minutes: 10,
            bootstrap_lookback_hours: 24,
            max_items_per_run: 20,
            state_db_path: PathBuf::from("state.db"),
            output_dir: Some(PathBuf::from("out")),
            http_timeout_secs: 30,
            retry: RetryConfig::default(),
            enrichment: EnrichmentSettings::default(),
            telegram: TelegramSettings::default(),
            groups: Vec::new(),
            forum: ForumSettings::default(),
            policy: PolicySettings::default(),
            source_hashtags: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&data).with_context(|| format!("loading config {}", path.display()))
    }

    /// Resolution order: explicit path, then `$RELAY_CONFIG_PATH`, then `config/relay.toml`.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from_file(p);
        }
        if let Ok(p) = env::var(ENV_PATH) {
            return Self::load_from_file(PathBuf::from(p));
        }
        Self::load_from_file(DEFAULT_PATH)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: Settings = toml::from_str(s).context("parsing settings TOML")?;
        cfg.resolve_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_env(&mut self) {
        resolve_secret(&mut self.enrichment.api_key, "OPENROUTER_API_KEY");
        resolve_secret(&mut self.telegram.bot_token, "TELEGRAM_BOT_TOKEN");
        resolve_secret(&mut self.telegram.chat_id, "TELEGRAM_CHAT_ID");
        if let Some(ch) = self.telegram.channel_id.as_mut() {
            resolve_secret(ch, "TELEGRAM_CHANNEL_ID");
        }
        if self.telegram.channel_id.as_deref().is_some_and(|c| c.trim().is_empty()) {
            self.telegram.channel_id = None;
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.telegram.chat_id.trim().is_empty() {
            bail!("telegram.chat_id must be set");
        }
        if let Some(g) = self.groups.iter().find(|g| g.kind == SourceKind::Forum) {
            bail!("feed group kind must be research or newsletter, got {}", g.kind);
        }

        let e = &mut self.enrichment;
        e.min_bullets = e.min_bullets.clamp(MIN_BULLETS, MAX_BULLETS);
        e.max_bullets = e.max_bullets.clamp(MIN_BULLETS, MAX_BULLETS);
        if e.min_bullets > e.max_bullets {
            std::mem::swap(&mut e.min_bullets, &mut e.max_bullets);
        }

        self.retry.max_attempts = self.retry.max_attempts.max(1);
        self.http_timeout_secs = self.http_timeout_secs.max(1);
        self.bootstrap_lookback_hours = self.bootstrap_lookback_hours.max(1);
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.into()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_minutes.max(1) * 60)
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::hours(self.bootstrap_lookback_hours)
    }

    pub fn destinations(&self) -> Vec<Destination> {
        let mut out = vec![Destination::new("chat", self.telegram.chat_id.trim())];
        if let Some(ch) = self.telegram.channel_id.as_deref() {
            out.push(Destination::new("channel", ch.trim()));
        }
        out
    }

    pub fn enrichment_options(&self) -> EnrichmentOptions {
        let e = &self.enrichment;
        EnrichmentOptions {
            translate_model: e.translate_model.clone(),
            tldr_model: e.tldr_model.clone(),
            target_language: e.target_language.clone(),
            min_bullets: e.min_bullets,
            max_bullets: e.max_bullets,
        }
    }

    pub fn completion_backend(&self) -> Result<Arc<dyn CompletionBackend>> {
        let e = &self.enrichment;
        Ok(match e.mode {
            EnrichmentMode::Dev => Arc::new(StubBackend::new(e.target_language.clone())),
            EnrichmentMode::Prod => {
                if e.api_key.trim().is_empty() {
                    tracing::warn!("enrichment.mode = prod but no API key is configured");
                }
                Arc::new(
                    ChatCompletionsBackend::new(&e.base_url, e.api_key.clone(), self.http_timeout())
                        .context("building completion HTTP client")?,
                )
            }
        })
    }

    pub fn content_policy(&self) -> Result<ContentPolicy> {
        ContentPolicy::with_extra_patterns(&self.policy.extra_patterns)
            .context("compiling policy.extra_patterns")
    }

    /// Feed groups in file order, then the forum group when enabled.
    pub fn source_groups(&self) -> Result<Vec<SourceGroup>> {
        let client = reqwest::Client::builder()
            .user_agent(FEED_UA)
            .timeout(self.http_timeout())
            .build()
            .context("building source HTTP client")?;

        let mut groups: Vec<SourceGroup> = self
            .groups
            .iter()
            .map(|g| {
                let adapters = g
                    .feeds
                    .iter()
                    .filter(|u| !u.trim().is_empty())
                    .map(|u| FeedSource::from_url(g.kind, u.trim(), client.clone()).into())
                    .collect();
                SourceGroup::new(g.kind.as_str(), adapters).with_keywords(g.keywords.clone())
            })
            .collect();

        if self.forum.enabled {
            let forum = ForumSource::new(&self.forum.base_url, self.forum.max_stories, client);
            groups.push(
                SourceGroup::new(SourceKind::Forum.as_str(), vec![forum.into()])
                    .with_keywords(self.forum.keywords.clone()),
            );
        }
        Ok(groups)
    }
}

/// Replace a literal `"ENV"` with the named environment variable (empty when unset).
fn resolve_secret(value: &mut String, var: &str) {
    if value.trim().eq_ignore_ascii_case("env") {
        *value = env::var(var).unwrap_or_default();
        if value.is_empty() {
            tracing::warn!(var, "config refers to an unset environment variable");
        }
    }
}
