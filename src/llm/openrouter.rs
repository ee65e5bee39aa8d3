//! OpenRouter agent backend.
//!
//! Routes agent calls through OpenRouter's unified API, giving access to
//! multiple model providers with a single API key. Uses the OpenAI-compatible
//! chat completions format, including server-sent-event streaming.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{AgentGateway, AgentMessage, AgentReply};
use crate::protocol::Prompt;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const DEFAULT_MODEL: &str = "anthropic/claude-sonnet-4";

const DEFAULT_MAX_TOKENS: u32 = 512;

/// Maximum retries on rate limit / server errors.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (ms).
const BASE_BACKOFF_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// API types (OpenAI-compatible)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// SSE framing
// ---------------------------------------------------------------------------

/// Splits a byte stream into complete `data:` payloads. Bytes are only
/// decoded once a full line has arrived, so a character split across
/// network chunks survives intact.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    pending: Vec<u8>,
}

impl SseBuffer {
    /// Feed raw bytes; returns every payload completed by them.
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut payloads = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(data) = line.trim().strip_prefix("data:") {
                payloads.push(data.trim().to_string());
            }
        }
        payloads
    }
}

/// Text carried by one streamed payload, if any.
fn delta_text(payload: &str) -> Option<String> {
    if payload == "[DONE]" {
        return None;
    }
    let chunk: StreamChunk = serde_json::from_str(payload).ok()?;
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

pub struct OpenRouterGateway {
    http: Client,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    stream: bool,
}

impl OpenRouterGateway {
    pub fn new(
        api_key: SecretString,
        model: Option<String>,
        max_tokens: Option<u32>,
        stream: bool,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to build OpenRouter HTTP client")?;

        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            stream,
        })
    }

    fn request<'a>(&'a self, prompt: &Prompt, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: prompt.system.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.user.clone(),
                },
            ],
            stream,
        }
    }

    async fn send(&self, request: &ChatRequest<'_>) -> reqwest::Result<reqwest::Response> {
        self.http
            .post(OPENROUTER_API_URL)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .header("X-Title", "ARENA Blackjack")
            .json(request)
            .send()
            .await
    }

    /// Send a chat completion request with retry + exponential backoff.
    async fn call_api(&self, prompt: &Prompt) -> Result<String> {
        let request = self.request(prompt, false);
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                debug!(attempt, delay_ms = delay, model = %self.model, "Retrying OpenRouter API call");
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }

            match self.send(&request).await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body: ChatResponse = response
                            .json()
                            .await
                            .context("Failed to parse OpenRouter response")?;
                        let usage = body.usage.unwrap_or_default();
                        debug!(
                            model = %self.model,
                            prompt_tokens = usage.prompt_tokens,
                            completion_tokens = usage.completion_tokens,
                            total_tokens = usage.total_tokens,
                            "OpenRouter usage"
                        );
                        return Ok(body
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|c| c.message)
                            .map(|m| m.content)
                            .unwrap_or_default());
                    }

                    // Retryable errors: 429 (rate limit), 500+
                    if status.as_u16() == 429 || status.as_u16() >= 500 {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(status = %status, attempt, model = %self.model, error = %error_text, "Retryable OpenRouter error");
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("OpenRouter API error {status} (model={}): {error_text}", self.model);
                }
                Err(e) => {
                    warn!(attempt, model = %self.model, error = %e, "OpenRouter request failed");
                    last_error = Some(format!("Request error: {e}"));
                }
            }
        }

        anyhow::bail!(
            "OpenRouter API failed after {} retries (model={}): {}",
            MAX_RETRIES,
            self.model,
            last_error.unwrap_or_default()
        )
    }
}

#[async_trait]
impl AgentGateway for OpenRouterGateway {
    async fn ask(&self, prompt: &Prompt) -> Result<AgentReply> {
        let text = self.call_api(prompt).await?;
        let mut reply = AgentReply::from_completion(&text);
        reply.raw = Some(text);
        Ok(reply)
    }

    async fn ask_stream(
        &self,
        prompt: &Prompt,
        sink: mpsc::UnboundedSender<AgentMessage>,
    ) -> Result<()> {
        if !self.stream {
            let reply = self.ask(prompt).await?;
            let _ = sink.send(AgentMessage::Final(reply));
            return Ok(());
        }

        let request = self.request(prompt, true);
        let response = self
            .send(&request)
            .await
            .context("OpenRouter streaming request failed")?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenRouter streaming error {status} (model={}): {error_text}", self.model);
        }

        let mut body = response.bytes_stream();
        let mut framing = SseBuffer::default();
        let mut text = String::new();

        while let Some(bytes) = body.next().await {
            let bytes = bytes.context("OpenRouter stream interrupted")?;
            for payload in framing.feed(&bytes) {
                if let Some(piece) = delta_text(&payload) {
                    text.push_str(&piece);
                    let _ = sink.send(AgentMessage::Chunk(piece));
                }
            }
        }

        let mut reply = AgentReply::from_completion(&text);
        reply.raw = Some(text);
        let _ = sink.send(AgentMessage::Final(reply));
        Ok(())
    }

    fn supports_streaming(&self) -> bool {
        self.stream
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
