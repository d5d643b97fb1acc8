//! The [`Provider`] trait and its request/response types.

use async_trait::async_trait;
use thiserror::Error;

use sage_core::graph::GraphModification;
use sage_core::messages::ChatMessage;

/// Errors a provider call can produce.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the API.
    #[error("api error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
    },

    /// Credential could not be turned into a valid header.
    #[error("auth error: {message}")]
    Auth {
        /// What went wrong.
        message: String,
    },

    /// The model returned something the structured schema cannot parse.
    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    /// Request serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// An image attached to the latest user message.
#[derive(Clone, Debug)]
pub struct ImageAttachment {
    /// MIME type, e.g. `image/png`.
    pub media_type: String,
    /// Base64-encoded image bytes.
    pub base64_data: String,
}

/// Request for a structured turn completion.
#[derive(Clone, Debug)]
pub struct StructuredRequest {
    /// Rendered system prompt.
    pub system: String,
    /// Conversation history, already compacted to budget.
    pub messages: Vec<ChatMessage>,
    /// Optional image attached to the final user message.
    pub image: Option<ImageAttachment>,
}

/// Request for a plain-text completion (summaries, titles).
#[derive(Clone, Debug)]
pub struct TextRequest {
    /// System prompt.
    pub system: String,
    /// Messages to complete over.
    pub messages: Vec<ChatMessage>,
}

/// A parsed structured turn: the visible reply plus side-channel output.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StructuredTurn {
    /// Assistant reply shown to the user.
    pub reply: String,
    /// Full replacement preference prose, when the model chose to update it.
    pub updated_preferences: Option<String>,
    /// Proposed knowledge-graph mutations for this turn.
    pub modification: GraphModification,
}

/// A turn-generation backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Complete a turn with the structured output schema.
    async fn complete_structured(&self, req: &StructuredRequest) -> ProviderResult<StructuredTurn>;

    /// Complete plain text (summarization, title generation).
    async fn complete_text(&self, req: &TextRequest) -> ProviderResult<String>;

    /// Model identifier used for requests.
    fn model(&self) -> &str;
}
