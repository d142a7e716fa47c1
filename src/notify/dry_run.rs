// src/notify/dry_run.rs
//! No-send messenger for simulation runs: logs what would have been sent.

use std::sync::Mutex;

use async_trait::async_trait;

use super::Messenger;
use crate::error::PipelineResult;
use crate::render::RenderedDocument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WouldSend {
    Text { chat_id: String, text: String },
    Document { chat_id: String, filename: String, size: usize },
}

#[derive(Debug, Default)]
pub struct DryRunMessenger {
    sent: Mutex<Vec<WouldSend>>,
}

impl DryRunMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<WouldSend> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    fn push(&self, msg: WouldSend) {
        if let Ok(mut v) = self.sent.lock() {
            v.push(msg);
        }
    }
}

#[async_trait]
impl Messenger for DryRunMessenger {
    async fn send_text(&self, chat_id: &str, text: &str) -> PipelineResult<()> {
        tracing::info!(chat_id, chars = text.chars().count(), "[dry-run] would send message:\n{text}");
        self.push(WouldSend::Text {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_document(&self, chat_id: &str, document: &RenderedDocument) -> PipelineResult<()> {
        tracing::info!(
            chat_id,
            filename = %document.filename,
            bytes = document.bytes.len(),
            "[dry-run] would send document"
        );
        self.push(WouldSend::Document {
            chat_id: chat_id.to_string(),
            filename: document.filename.clone(),
            size: document.bytes.len(),
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}
