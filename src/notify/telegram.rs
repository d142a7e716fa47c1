// src/notify/telegram.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

use super::Messenger;
use crate::error::{is_transient_http, is_transient_status, PipelineError, PipelineResult};
use crate::render::RenderedDocument;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API messenger (`sendMessage` + `sendDocument`).
#[derive(Clone)]
pub struct TelegramMessenger {
    client: Client,
    api_base: String,
    token: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramMessenger {
    pub fn new(api_base: &str, token: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }
}

async fn check(chat_id: &str, method: &str, rsp: reqwest::Response) -> PipelineResult<()> {
    let status = rsp.status();
    let body: Option<ApiResponse> = rsp.json().await.ok();
    let description = body
        .as_ref()
        .and_then(|b| b.description.clone())
        .unwrap_or_default();
    if !status.is_success() {
        return Err(PipelineError::delivery(
            chat_id,
            format!("{method}: HTTP {status} {description}").trim_end().to_string(),
            is_transient_status(status),
        ));
    }
    match body {
        Some(b) if b.ok => Ok(()),
        Some(_) => Err(PipelineError::delivery(
            chat_id,
            format!("{method}: rejected: {description}"),
            false,
        )),
        None => Err(PipelineError::delivery(
            chat_id,
            format!("{method}: unreadable response"),
            true,
        )),
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(&self, chat_id: &str, text: &str) -> PipelineResult<()> {
        if self.token.trim().is_empty() {
            return Err(PipelineError::delivery(chat_id, "bot token is not configured", false));
        }
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        let rsp = self
            .client
            .post(self.endpoint("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::delivery(chat_id, format!("sendMessage: {e}"), is_transient_http(&e)))?;
        check(chat_id, "sendMessage", rsp).await
    }

    async fn send_document(&self, chat_id: &str, document: &RenderedDocument) -> PipelineResult<()> {
        if self.token.trim().is_empty() {
            return Err(PipelineError::delivery(chat_id, "bot token is not configured", false));
        }
        let part = Part::bytes(document.bytes.clone())
            .file_name(document.filename.clone())
            .mime_str("text/html; charset=utf-8")
            .map_err(|e| PipelineError::delivery(chat_id, format!("sendDocument: {e}"), false))?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);
        let rsp = self
            .client
            .post(self.endpoint("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::delivery(chat_id, format!("sendDocument: {e}"), is_transient_http(&e)))?;
        check(chat_id, "sendDocument", rsp).await
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}
