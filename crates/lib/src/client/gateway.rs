//! Client side of the relay: posts turns to `/api/chat` and extracts the reply text.

use crate::gateway::{ChatRequest, ChatTurn, ErrorBody};
use crate::session::SessionId;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Non-success status from the relay; `body` holds upstream details when present.
    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("connection error: {0}")]
    Connection(String),
    /// The response carried neither known reply field.
    #[error("unexpected response: {0}")]
    Parse(String),
    #[error("message is empty")]
    EmptyMessage,
    #[error("a reply is already pending for session {0}")]
    Busy(SessionId),
}

impl ChatError {
    /// Human-readable text shown to the user as the assistant's reply.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Upstream { status: 401, .. } => {
                "Invalid API key, please check the configuration".to_string()
            }
            ChatError::Upstream { status: 429, .. } => {
                "Too many requests (rate limited), please try again later".to_string()
            }
            ChatError::Upstream { status, .. } if *status >= 500 => {
                "Service temporarily unavailable, please try again later".to_string()
            }
            ChatError::Upstream { status, .. } => format!("API request failed: {}", status),
            ChatError::Connection(_) => {
                "Unable to connect to the chat gateway, make sure it is running".to_string()
            }
            ChatError::Parse(_) => "Unexpected API response format".to_string(),
            ChatError::EmptyMessage => "Message is empty".to_string(),
            ChatError::Busy(_) => "Still waiting for the previous reply".to_string(),
        }
    }
}

/// Anything that turns a context window into reply text.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, turns: &[ChatTurn]) -> Result<String, ChatError>;
}

#[async_trait]
impl<T: ChatBackend + ?Sized> ChatBackend for Arc<T> {
    async fn complete(&self, turns: &[ChatTurn]) -> Result<String, ChatError> {
        (**self).complete(turns).await
    }
}

/// Reply text from an upstream body: `output.choices[0].message.content`, then `output.text`.
/// The same two fields at the top level are accepted as well. Empty strings do not count.
pub fn extract_reply(data: &serde_json::Value) -> Option<String> {
    [
        "/output/choices/0/message/content",
        "/output/text",
        "/choices/0/message/content",
        "/text",
    ]
    .iter()
    .filter_map(|p| data.pointer(p).and_then(|v| v.as_str()))
    .find(|s| !s.is_empty())
    .map(str::to_string)
}

/// HTTP client for the relay's chat endpoint.
#[derive(Clone)]
pub struct GatewayClient {
    url: String,
    client: reqwest::Client,
}

impl GatewayClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChatBackend for GatewayClient {
    async fn complete(&self, turns: &[ChatTurn]) -> Result<String, ChatError> {
        let body = ChatRequest {
            messages: turns.to_vec(),
        };
        let res = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Connection(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let text = res.text().await.unwrap_or_default();
            let body = match serde_json::from_str::<ErrorBody>(&text) {
                Ok(e) => e.details.unwrap_or(e.error),
                Err(_) => text,
            };
            log::warn!("gateway error: {} {}", status, body);
            return Err(ChatError::Upstream { status, body });
        }

        let data: serde_json::Value = res
            .json()
            .await
            .map_err(|e| ChatError::Parse(e.to_string()))?;
        extract_reply(&data).ok_or_else(|| {
            log::warn!("unexpected gateway response: {}", data);
            ChatError::Parse("no reply text in response".to_string())
        })
    }
}
