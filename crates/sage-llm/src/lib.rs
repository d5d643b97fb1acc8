//! Generation provider layer.
//!
//! Defines the [`Provider`] trait the runtime calls for turn generation
//! and summarization, the structured-output wire schema, and an
//! OpenAI-compatible chat-completions implementation.

#![deny(unsafe_code)]

pub mod openai;
pub mod provider;
pub mod schema;

pub use openai::{ChatCompletionsProvider, OpenAiConfig};
pub use provider::{
    ImageAttachment, Provider, ProviderError, ProviderResult, StructuredRequest, StructuredTurn,
    TextRequest,
};
