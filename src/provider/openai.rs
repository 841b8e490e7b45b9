use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{http_client, CompletionProvider, CompletionRequest, Encoding};
use crate::error::{Error, Result};

/// Configuration for the OpenAI chat completions provider.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 4096,
            timeout_secs: 0,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// Chat completions with strict JSON schema output.
pub struct OpenAiProvider {
    config: OpenAiConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        let client = http_client(config.timeout_secs)?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn build_request<'a>(&'a self, request: &'a CompletionRequest) -> ChatRequest<'a> {
        let mut messages = vec![ChatMessage {
            role: "system",
            content: &request.system,
        }];
        messages.extend(request.messages.iter().map(|m| ChatMessage {
            role: "user",
            content: m,
        }));

        let response_format = request.schema.as_ref().map(|s| {
            json!({
                "type": "json_schema",
                "json_schema": {
                    "name": s.name,
                    "strict": true,
                    "schema": s.schema,
                }
            })
        });

        ChatRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            messages,
            response_format,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn encoding(&self) -> Encoding {
        Encoding::Json
    }

    async fn generate(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url);
        debug!(model = %self.config.model, "requesting chat completion");

        let mut http = self.client.post(&url).json(&self.build_request(request));
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("API error {}: {}", status, body)));
        }

        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| Error::malformed(format!("unexpected response body: {}", e), &body))?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| Error::malformed("response has no choices", &body))?;

        if let Some(refusal) = message.refusal {
            return Err(Error::malformed(format!("model refused: {}", refusal), &body));
        }

        message
            .content
            .ok_or_else(|| Error::malformed("response has no content", &body))
    }
}
