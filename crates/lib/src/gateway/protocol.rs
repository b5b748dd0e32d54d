//! Relay HTTP wire types (`/api/chat`, `/api/health`, `/api/test`) and the upstream envelope.

use serde::{Deserialize, Serialize};

/// Role tag of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

/// One role-tagged turn: `{ "role", "content" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatTurn>,
}

/// Error body returned by the relay: `{ "error", "details" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Body of `GET /api/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

/// Body of `POST /api/test`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResponse {
    pub success: bool,
    pub response: serde_json::Value,
    pub status: u16,
}

/// Envelope sent upstream: `{ model, input: { messages }, parameters: {...} }`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct GenerationRequest<'a> {
    pub model: &'a str,
    pub input: GenerationInput<'a>,
    pub parameters: GenerationParameters,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct GenerationInput<'a> {
    pub messages: &'a [ChatTurn],
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GenerationParameters {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
}
