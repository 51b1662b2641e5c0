//! The language-model boundary.
//!
//! Everything that talks to a completion service goes through
//! [`CompletionService`], so the pipeline can run against the real HTTP
//! client or a scripted stand-in.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a completion could not be obtained.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("service returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("service returned an empty completion")]
    EmptyCompletion,
}

/// A single-turn completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    /// `None` leaves sampling to the service default.
    pub temperature: Option<f64>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        CompletionRequest { prompt: prompt.into(), temperature: None }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A service that turns a prompt into one completion.
///
/// Implementations must be shareable across threads: the pipeline runs
/// the summary request on a worker thread.
pub trait CompletionService: Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError>;
}

impl<T: CompletionService + ?Sized> CompletionService for &T {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
        (**self).complete(request)
    }
}

impl<T: CompletionService + ?Sized> CompletionService for Box<T> {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
        (**self).complete(request)
    }
}

// ── OpenAI-compatible chat completions ──────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Blocking client for `POST {base_url}/chat/completions`.
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    model: String,
    http: reqwest::blocking::Client,
}

impl OpenAiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Transport(e.to_string()))?;
        Ok(OpenAiClient {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

impl CompletionService for OpenAiClient {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage { role: "user", content: &request.prompt }],
            temperature: request.temperature,
        };

        tracing::debug!(model = %self.model, prompt_len = request.prompt.len(), "sending completion request");
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ModelError::Status { code: status.as_u16(), body: truncate(&body, 500) });
        }

        let text = response.text().map_err(transport_error)?;
        parse_completion(&text)
    }
}

fn transport_error(e: reqwest::Error) -> ModelError {
    if e.is_timeout() { ModelError::Timeout } else { ModelError::Transport(e.to_string()) }
}

/// Pull `choices[0].message.content` out of a chat-completions response body.
pub fn parse_completion(body: &str) -> Result<String, ModelError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| ModelError::Malformed(e.to_string()))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::Malformed("response has no choices".to_string()))?;
    match choice.message.content {
        Some(content) if !content.trim().is_empty() => Ok(content),
        _ => Err(ModelError::EmptyCompletion),
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_omits_missing_temperature() {
        let body = ChatRequest {
            model: "m",
            messages: [ChatMessage { role: "user", content: "hi" }],
            temperature: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"model":"m","messages":[{"role":"user","content":"hi"}]}"#);
    }

    #[test]
    fn request_body_carries_temperature() {
        let body = ChatRequest {
            model: "m",
            messages: [ChatMessage { role: "user", content: "hi" }],
            temperature: Some(1.0),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.ends_with(r#""temperature":1.0}"#));
    }

    #[test]
    fn parse_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"x = 1"}},{"message":{"content":"y"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "x = 1");
    }

    #[test]
    fn empty_content_is_an_empty_completion() {
        let body = r#"{"choices":[{"message":{"content":"  "}}]}"#;
        assert_eq!(parse_completion(body), Err(ModelError::EmptyCompletion));
        let body = r#"{"choices":[{"message":{"content":null}}]}"#;
        assert_eq!(parse_completion(body), Err(ModelError::EmptyCompletion));
    }

    #[test]
    fn missing_choices_is_malformed() {
        assert!(matches!(parse_completion(r#"{"choices":[]}"#), Err(ModelError::Malformed(_))));
        assert!(matches!(parse_completion("not json"), Err(ModelError::Malformed(_))));
    }

    #[test]
    fn endpoint_joins_base_url() {
        let client = OpenAiClient::new("k", "m", "http://localhost:8080/v1/", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    struct Echo;

    impl CompletionService for Echo {
        fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
            Ok(request.prompt.clone())
        }
    }

    fn ask(service: impl CompletionService, prompt: &str) -> Result<String, ModelError> {
        service.complete(&CompletionRequest::new(prompt))
    }

    #[test]
    fn boxed_trait_objects_are_services() {
        let boxed: Box<dyn CompletionService> = Box::new(Echo);
        assert_eq!(ask(&boxed, "hello").unwrap(), "hello");
        assert_eq!(ask(boxed, "again").unwrap(), "again");
    }

    #[test]
    fn truncate_long_bodies() {
        assert_eq!(truncate("abcdef", 3), "abc…");
        assert_eq!(truncate("ab", 3), "ab");
    }
}
