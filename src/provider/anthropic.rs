use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

use super::{http_client, CompletionProvider, CompletionRequest, Encoding, TextStream};
use crate::error::{Error, Result};
use crate::streaming::{SseDecoder, StreamEvent};

/// Configuration for the Anthropic Messages provider.
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    /// Falls back to `ANTHROPIC_API_KEY`.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub api_version: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            api_version: "2023-06-01".to_string(),
            max_tokens: 4096,
            timeout_secs: 0,
        }
    }
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

/// Messages API with delimited-section responses and SSE streaming.
pub struct AnthropicProvider {
    config: AnthropicConfig,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        // A missing key is reported by the API as an authentication error
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .unwrap_or_default();
        let client = http_client(config.timeout_secs)?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn build_request<'a>(&'a self, request: &'a CompletionRequest, stream: bool) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            system: &request.system,
            messages: request
                .messages
                .iter()
                .map(|m| Message {
                    role: "user",
                    content: m,
                })
                .collect(),
            stream,
        }
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response> {
        debug!(model = %self.config.model, stream, "requesting message");

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.config.api_version)
            .json(&self.build_request(request, stream))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("API error {}: {}", status, body)));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn encoding(&self) -> Encoding {
        Encoding::Sections
    }

    async fn generate(&self, request: &CompletionRequest) -> Result<String> {
        let body = self.send(request, false).await?.text().await?;
        let parsed: MessagesResponse = serde_json::from_str(&body)
            .map_err(|e| Error::malformed(format!("unexpected response body: {}", e), &body))?;

        Ok(parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join(""))
    }

    async fn generate_stream(&self, request: &CompletionRequest) -> Result<TextStream> {
        let bytes = Box::pin(self.send(request, true).await?.bytes_stream());

        let state = (bytes, SseDecoder::new(), VecDeque::new(), false);
        let stream = futures::stream::unfold(state, |(mut bytes, mut decoder, mut pending, mut done)| async move {
            loop {
                if let Some(item) = pending.pop_front() {
                    return Some((item, (bytes, decoder, pending, done)));
                }
                if done {
                    return None;
                }

                let events = match bytes.next().await {
                    Some(Ok(chunk)) => decoder.push(&chunk),
                    Some(Err(e)) => {
                        done = true;
                        pending.push_back(Err(Error::from(e)));
                        continue;
                    }
                    None => {
                        done = true;
                        decoder.finish().into_iter().collect()
                    }
                };

                for event in events {
                    match event {
                        StreamEvent::Error(e) => {
                            done = true;
                            pending.push_back(Err(Error::Transport(format!(
                                "{}: {}",
                                e.error.error_type, e.error.message
                            ))));
                            break;
                        }
                        StreamEvent::MessageStop => {
                            done = true;
                            break;
                        }
                        other => {
                            if let Some(text) = other.text() {
                                pending.push_back(Ok(text.to_string()));
                            }
                        }
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
