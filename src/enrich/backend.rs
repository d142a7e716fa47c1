// src/enrich/backend.rs
//! Completion backends: the OpenAI-compatible HTTP API used in production and
//! an offline stub for development runs.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{is_transient_http, is_transient_status, PipelineError, PipelineResult};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Translate,
    Summarize { min_bullets: usize, max_bullets: usize },
}

#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub task: Task,
    pub model: &'a str,
    pub system: &'a str,
    pub user: &'a str,
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Text of the first completion choice.
    async fn complete(&self, req: &CompletionRequest<'_>) -> PipelineResult<String>;
    fn name(&self) -> &'static str;
}

/// `POST {base_url}/chat/completions` with bearer auth (OpenRouter, OpenAI, ...).
pub struct ChatCompletionsBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ChatCompletionsBackend {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("feed-relay/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    content: Option<String>,
}

#[async_trait]
impl CompletionBackend for ChatCompletionsBackend {
    async fn complete(&self, req: &CompletionRequest<'_>) -> PipelineResult<String> {
        if self.api_key.trim().is_empty() {
            return Err(PipelineError::enrichment(
                "completion API key is not configured",
                false,
            ));
        }

        let mut messages = Vec::with_capacity(2);
        if !req.system.is_empty() {
            messages.push(Msg {
                role: "system",
                content: req.system,
            });
        }
        messages.push(Msg {
            role: "user",
            content: req.user,
        });
        let body = Req {
            model: req.model,
            messages,
            stream: false,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::enrichment(format!("request: {e}"), is_transient_http(&e)))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(200).collect();
            return Err(PipelineError::enrichment(
                format!("HTTP {status}: {detail}"),
                is_transient_status(status),
            ));
        }

        let parsed: Resp = resp
            .json()
            .await
            .map_err(|e| PipelineError::enrichment(format!("decode response: {e}"), true))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| PipelineError::enrichment("response has no completion content", true))
    }

    fn name(&self) -> &'static str {
        "chat-completions"
    }
}

/// Deterministic offline backend for development runs.
pub struct StubBackend {
    target_language: String,
}

impl StubBackend {
    pub fn new(target_language: impl Into<String>) -> Self {
        Self {
            target_language: target_language.into(),
        }
    }
}

#[async_trait]
impl CompletionBackend for StubBackend {
    async fn complete(&self, req: &CompletionRequest<'_>) -> PipelineResult<String> {
        match req.task {
            Task::Translate => Ok(format!("[{} draft] {}", self.target_language, req.user)),
            Task::Summarize { max_bullets, .. } => {
                let bullets: Vec<String> = req
                    .user
                    .split(['.', '\n'])
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .take(max_bullets)
                    .map(|s| format!("- {s}"))
                    .collect();
                Ok(bullets.join("\n"))
            }
        }
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
