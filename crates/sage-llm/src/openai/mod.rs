//! OpenAI-compatible chat-completions provider.
//!
//! Talks to any `/v1/chat/completions` endpoint with Bearer auth.
//! Non-streaming: turn generation uses a `response_format` JSON schema,
//! summaries and titles use plain text completions.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::{debug, error, instrument};

use sage_core::messages::{ChatMessage, Role};

use crate::provider::{
    ImageAttachment, Provider, ProviderError, ProviderResult, StructuredRequest, StructuredTurn,
    TextRequest,
};
use crate::schema;

/// Default API origin.
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Default completion token cap.
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

/// Provider configuration.
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// Model identifier sent in every request.
    pub model: String,
    /// Bearer credential; `None` for keyless local endpoints.
    pub api_key: Option<String>,
    /// API origin override (proxies, local servers).
    pub base_url: Option<String>,
    /// Completion token cap override.
    pub max_tokens: Option<u32>,
}

/// OpenAI-compatible chat-completions provider.
pub struct ChatCompletionsProvider {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl ChatCompletionsProvider {
    /// Create a provider with a fresh HTTP client.
    #[must_use]
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Create a provider with a shared HTTP client.
    #[must_use]
    pub fn with_client(config: OpenAiConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Build request headers. Bearer auth only when a key is configured.
    fn build_headers(&self) -> ProviderResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(api_key) = &self.config.api_key {
            let auth_value = format!("Bearer {api_key}");
            let _ = headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value).map_err(|e| ProviderError::Auth {
                    message: format!("invalid API key header: {e}"),
                })?,
            );
        }

        Ok(headers)
    }

    /// Convert history into chat-completions messages. The image, when
    /// present, rides on the final user message as a data URL part.
    fn build_messages(
        system: &str,
        messages: &[ChatMessage],
        image: Option<&ImageAttachment>,
    ) -> Vec<Value> {
        let mut out = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            out.push(json!({ "role": "system", "content": system }));
        }

        let last_user_idx = messages.iter().rposition(|m| m.role == Role::User);
        for (idx, msg) in messages.iter().enumerate() {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            let attach = image.filter(|_| Some(idx) == last_user_idx);
            let content = match attach {
                Some(img) => json!([
                    { "type": "text", "text": msg.content },
                    {
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:{};base64,{}", img.media_type, img.base64_data)
                        }
                    }
                ]),
                None => json!(msg.content),
            };
            out.push(json!({ "role": role, "content": content }));
        }
        out
    }

    /// Pull a human-readable message out of an error body.
    fn extract_error_message(body: &str) -> String {
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.pointer("/error/message")
                    .and_then(Value::as_str)
                    .map(String::from)
            })
            .unwrap_or_else(|| {
                let mut text = body.trim().to_owned();
                text.truncate(200);
                text
            })
    }

    /// POST the request body and return `choices[0].message.content`.
    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn post_chat(&self, body: Value) -> ProviderResult<String> {
        let base_url = self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let url = format!("{base_url}/v1/chat/completions");
        let headers = self.build_headers()?;

        debug!(
            message_count = body["messages"].as_array().map_or(0, Vec::len),
            structured = body.get("response_format").is_some(),
            "sending chat completion request"
        );

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let message = Self::extract_error_message(&body_text);
            error!(status = status.as_u16(), %message, "chat completions API error");
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: Value = response.json().await.map_err(ProviderError::Http)?;
        parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| {
                ProviderError::MalformedOutput("response has no choices[0].message.content".into())
            })
    }

    fn base_body(&self, messages: Vec<Value>) -> Value {
        json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
        })
    }
}

#[async_trait]
impl Provider for ChatCompletionsProvider {
    async fn complete_structured(&self, req: &StructuredRequest) -> ProviderResult<StructuredTurn> {
        let messages = Self::build_messages(&req.system, &req.messages, req.image.as_ref());
        let mut body = self.base_body(messages);
        body["response_format"] = schema::response_format();

        let content = self.post_chat(body).await?;
        schema::parse_structured(&content)
    }

    async fn complete_text(&self, req: &TextRequest) -> ProviderResult<String> {
        let messages = Self::build_messages(&req.system, &req.messages, None);
        let body = self.base_body(messages);
        self.post_chat(body).await
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: Option<String>) -> OpenAiConfig {
        OpenAiConfig {
            model: "gpt-4o-mini".into(),
            api_key: Some("test-key".into()),
            base_url,
            max_tokens: None,
        }
    }

    fn completion_body(content: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    // ── Metadata and headers ────────────────────────────────────────────

    #[test]
    fn model_returns_config_model() {
        let provider = ChatCompletionsProvider::new(test_config(None));
        assert_eq!(provider.model(), "gpt-4o-mini");
    }

    #[test]
    fn headers_have_bearer_auth() {
        let provider = ChatCompletionsProvider::new(test_config(None));
        let headers = provider.build_headers().unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer test-key");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn headers_omit_auth_without_key() {
        let mut cfg = test_config(None);
        cfg.api_key = None;
        let provider = ChatCompletionsProvider::new(cfg);
        let headers = provider.build_headers().unwrap();
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    // ── Message building ────────────────────────────────────────────────

    #[test]
    fn build_messages_prepends_system() {
        let messages = vec![ChatMessage::user("hi")];
        let out = ChatCompletionsProvider::build_messages("be nice", &messages, None);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["role"], "system");
        assert_eq!(out[1]["role"], "user");
        assert_eq!(out[1]["content"], "hi");
    }

    #[test]
    fn build_messages_skips_empty_system() {
        let messages = vec![ChatMessage::user("hi")];
        let out = ChatCompletionsProvider::build_messages("", &messages, None);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn image_rides_on_last_user_message() {
        let messages = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("ok"),
            ChatMessage::user("what is this?"),
        ];
        let image = ImageAttachment {
            media_type: "image/png".into(),
            base64_data: "aGk=".into(),
        };
        let out = ChatCompletionsProvider::build_messages("", &messages, Some(&image));

        // Earlier user message stays plain text.
        assert_eq!(out[0]["content"], "first");
        let parts = out[2]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,aGk=");
    }

    // ── Error body parsing ──────────────────────────────────────────────

    #[test]
    fn extracts_api_error_message() {
        let body = r#"{"error": {"message": "Rate limit reached", "type": "rate_limit_error"}}"#;
        assert_eq!(
            ChatCompletionsProvider::extract_error_message(body),
            "Rate limit reached"
        );
    }

    #[test]
    fn falls_back_to_raw_body() {
        assert_eq!(
            ChatCompletionsProvider::extract_error_message("upstream exploded"),
            "upstream exploded"
        );
    }

    // ── Wire behavior ───────────────────────────────────────────────────

    #[tokio::test]
    async fn structured_completion_roundtrip() {
        let server = MockServer::start().await;
        let payload = json!({
            "response": "Hello!",
            "addNodes": ["Alice"],
            "addConnectionsSource": ["You"],
            "addConnectionsTarget": ["Alice"]
        });
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(bearer_token("test-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion_body(&payload.to_string())),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider = ChatCompletionsProvider::new(test_config(Some(server.uri())));
        let turn = provider
            .complete_structured(&StructuredRequest {
                system: "You are Sage.".into(),
                messages: vec![ChatMessage::user("hello")],
                image: None,
            })
            .await
            .unwrap();

        assert_eq!(turn.reply, "Hello!");
        assert_eq!(turn.modification.add_nodes, vec!["Alice"]);
        assert_eq!(turn.modification.add_connections.len(), 1);
    }

    #[tokio::test]
    async fn text_completion_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("A summary.")))
            .mount(&server)
            .await;

        let provider = ChatCompletionsProvider::new(test_config(Some(server.uri())));
        let text = provider
            .complete_text(&TextRequest {
                system: "Summarize.".into(),
                messages: vec![ChatMessage::user("lots of text")],
            })
            .await
            .unwrap();
        assert_eq!(text, "A summary.");
    }

    #[tokio::test]
    async fn api_error_surfaces_status_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": { "message": "Rate limit reached" }
            })))
            .mount(&server)
            .await;

        let provider = ChatCompletionsProvider::new(test_config(Some(server.uri())));
        let err = provider
            .complete_text(&TextRequest {
                system: String::new(),
                messages: vec![ChatMessage::user("hi")],
            })
            .await
            .unwrap_err();
        assert_matches!(
            err,
            ProviderError::Api { status: 429, ref message } if message == "Rate limit reached"
        );
    }

    #[tokio::test]
    async fn unparseable_structured_output_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion_body("not json at all")),
            )
            .mount(&server)
            .await;

        let provider = ChatCompletionsProvider::new(test_config(Some(server.uri())));
        let err = provider
            .complete_structured(&StructuredRequest {
                system: String::new(),
                messages: vec![ChatMessage::user("hi")],
                image: None,
            })
            .await
            .unwrap_err();
        assert_matches!(err, ProviderError::MalformedOutput(_));
    }
}
