//! Summaries for the panel's Summary tab.
//!
//! Demo mode answers locally with the opening sentences of the input. Remote
//! mode calls an OpenAI-compatible chat completions endpoint. Both sit behind
//! their own rate limiter, separate from the item store's.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{SummarizeConfig, SummaryMode};
use crate::rate_limit::RateLimiter;

pub const DEMO_SENTENCES: usize = 3;
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SYSTEM_PROMPT: &str = "You are a research assistant. Summarize the text in 2-3 sentences, \
keeping its key points and main arguments.";

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("nothing to summarize")]
    Empty,
    #[error("no API key configured")]
    MissingApiKey,
    #[error("summary service returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("summary service returned no content")]
    EmptyResponse,
    #[error("summary request failed")]
    Network(#[from] reqwest::Error),
}

impl SummarizeError {
    /// Short machine-readable cause, as shown to the panel.
    pub fn reason(&self) -> String {
        match self {
            SummarizeError::Empty => "empty".to_string(),
            SummarizeError::MissingApiKey => "missing_api_key".to_string(),
            SummarizeError::Http { status, .. } => format!("HTTP_{}", status),
            SummarizeError::EmptyResponse => "empty_response".to_string(),
            SummarizeError::Network(_) => "network_error".to_string(),
        }
    }
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// `text` is trimmed and non-empty.
    async fn summarize(&self, text: &str) -> Result<String, SummarizeError>;
}

pub struct DemoSummarizer;

#[async_trait]
impl Summarizer for DemoSummarizer {
    async fn summarize(&self, text: &str) -> Result<String, SummarizeError> {
        Ok(demo_summary(text))
    }
}

pub fn demo_summary(text: &str) -> String {
    let words = text.split_whitespace().count();
    format!(
        "{}\n\n(demo summary, {} words in original)",
        leading_sentences(text, DEMO_SENTENCES),
        words
    )
}

/// The first `count` sentences. A sentence ends at `.`, `!` or `?` followed
/// by whitespace; the whitespace between kept sentences becomes one space.
fn leading_sentences(text: &str, count: usize) -> String {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c.is_whitespace() && matches!(prev, Some('.' | '!' | '?')) {
            sentences.push(&text[start..i]);
            if sentences.len() == count {
                return sentences.join(" ");
            }
            while chars.next_if(|&(_, next)| next.is_whitespace()).is_some() {}
            start = chars.peek().map(|&(j, _)| j).unwrap_or(text.len());
            prev = None;
            continue;
        }
        prev = Some(c);
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences.join(" ")
}

/// Chat completions client.
pub struct ChatSummarizer {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatSummarizer {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.trim().to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }
}

#[async_trait]
impl Summarizer for ChatSummarizer {
    async fn summarize(&self, text: &str) -> Result<String, SummarizeError> {
        if self.api_key.is_empty() {
            return Err(SummarizeError::MissingApiKey);
        }

        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            max_tokens: 500,
            temperature: 0.7,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_error(status, body));
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(SummarizeError::EmptyResponse)
    }
}

fn http_error(status: StatusCode, body: String) -> SummarizeError {
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|wrapper| wrapper.error.message)
        .unwrap_or(body);
    SummarizeError::Http {
        status: status.as_u16(),
        message,
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct SummaryService {
    summarizer: Arc<dyn Summarizer>,
    limiter: RateLimiter,
}

impl SummaryService {
    pub fn new(summarizer: Arc<dyn Summarizer>, limiter: RateLimiter) -> Self {
        Self { summarizer, limiter }
    }

    pub fn from_config(cfg: &SummarizeConfig) -> Self {
        let summarizer: Arc<dyn Summarizer> = match cfg.mode {
            SummaryMode::Demo => Arc::new(DemoSummarizer),
            SummaryMode::Remote => Arc::new(
                ChatSummarizer::new(cfg.api_key.as_deref().unwrap_or(""))
                    .with_endpoint(&cfg.endpoint)
                    .with_model(&cfg.model),
            ),
        };
        Self::new(summarizer, RateLimiter::new(cfg.max_requests, cfg.window()))
    }

    pub async fn summarize(&self, input: &str) -> Result<String, SummarizeError> {
        let text = input.trim();
        if text.is_empty() {
            return Err(SummarizeError::Empty);
        }

        self.limiter.throttle().await;
        match self.summarizer.summarize(text).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                tracing::warn!(reason = %e.reason(), "summarization failed: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{Json, Router, http::HeaderMap, routing::post};
    use serde_json::{Value, json};

    use super::*;

    fn demo_service(max_requests: usize) -> SummaryService {
        SummaryService::new(
            Arc::new(DemoSummarizer),
            RateLimiter::new(max_requests, Duration::from_secs(60)),
        )
    }

    #[test]
    fn demo_keeps_first_three_sentences_and_counts_words() {
        let text = "First point. Second point!  Third point?\nFourth point. Fifth.";
        assert_eq!(
            demo_summary(text),
            "First point. Second point! Third point?\n\n(demo summary, 9 words in original)"
        );
    }

    #[test]
    fn demo_without_sentence_breaks_keeps_everything() {
        assert_eq!(leading_sentences("no terminal punctuation here", 3), "no terminal punctuation here");
        assert_eq!(leading_sentences("v1.2 is out. Upgrade", 3), "v1.2 is out. Upgrade");
    }

    #[tokio::test]
    async fn blank_input_is_empty() {
        let err = demo_service(10).summarize(" \n\t ").await.unwrap_err();
        assert!(matches!(err, SummarizeError::Empty));
        assert_eq!(err.reason(), "empty");
    }

    #[tokio::test]
    async fn remote_without_key_reports_missing_api_key() {
        let service = SummaryService::new(
            Arc::new(ChatSummarizer::new("  ")),
            RateLimiter::new(10, Duration::from_secs(60)),
        );

        let err = service.summarize("Some text to shorten.").await.unwrap_err();
        assert_eq!(err.reason(), "missing_api_key");
    }

    #[tokio::test(start_paused = true)]
    async fn requests_beyond_the_limit_wait_for_the_window() {
        let service = demo_service(2);
        let start = tokio::time::Instant::now();

        for _ in 0..3 {
            service.summarize("One. Two.").await.unwrap();
        }

        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}/v1/chat/completions", addr)
    }

    #[tokio::test]
    async fn remote_returns_first_choice() {
        let endpoint = serve(Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer sk-test");
                assert_eq!(body["model"], "test-model");
                assert_eq!(body["messages"][1]["content"], "Long passage.");
                Json(json!({"choices": [{"message": {"content": " Short version. "}}]}))
            }),
        ))
        .await;

        let summarizer = ChatSummarizer::new("sk-test")
            .with_endpoint(&endpoint)
            .with_model("test-model");

        assert_eq!(summarizer.summarize("Long passage.").await.unwrap(), "Short version.");
    }

    #[tokio::test]
    async fn remote_http_failure_carries_status_and_message() {
        let endpoint = serve(Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    axum::http::StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({"error": {"message": "slow down"}})),
                )
            }),
        ))
        .await;

        let err = ChatSummarizer::new("sk-test")
            .with_endpoint(&endpoint)
            .summarize("Long passage.")
            .await
            .unwrap_err();

        assert_eq!(err.reason(), "HTTP_429");
        assert!(err.to_string().contains("slow down"));
    }

    #[tokio::test]
    async fn remote_without_content_is_empty_response() {
        let endpoint = serve(Router::new().route(
            "/v1/chat/completions",
            post(|| async { Json(json!({"choices": []})) }),
        ))
        .await;

        let err = ChatSummarizer::new("sk-test")
            .with_endpoint(&endpoint)
            .summarize("Long passage.")
            .await
            .unwrap_err();

        assert_eq!(err.reason(), "empty_response");
    }
}
