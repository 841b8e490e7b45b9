//! Completion providers.
//!
//! The convergence loop only sees [`CompletionProvider`]. Each backing service
//! gets one implementation and declares which response [`Encoding`] it speaks.

mod anthropic;
mod openai;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use openai::{OpenAiConfig, OpenAiProvider};

use async_trait::async_trait;
use futures::Stream;
use serde_json::{json, Value};
use std::pin::Pin;
use std::time::Duration;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::Result;

/// Incremental generated text
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// How a provider's responses must be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// One JSON object matching the request's schema
    Json,
    /// Free text with `<name>...</name>` sections
    Sections,
}

/// JSON schema the response must satisfy
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    pub name: &'static str,
    pub schema: Value,
}

impl ResponseSchema {
    fn strings(name: &'static str, fields: &[&str]) -> Self {
        let properties: serde_json::Map<String, Value> = fields
            .iter()
            .map(|f| (f.to_string(), json!({ "type": "string" })))
            .collect();

        Self {
            name,
            schema: json!({
                "type": "object",
                "properties": properties,
                "required": fields,
                "additionalProperties": false,
            }),
        }
    }

    pub fn patch() -> Self {
        Self::strings("patch", &["plan", "code", "commit_message"])
    }

    pub fn summary() -> Self {
        Self::strings("summary", &["commit_message"])
    }
}

/// One generation request: a system instruction plus user-role messages
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<String>,
    pub schema: Option<ResponseSchema>,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn encoding(&self) -> Encoding;

    /// Generate the complete response text.
    async fn generate(&self, request: &CompletionRequest) -> Result<String>;

    /// Generate the response as a sequence of text increments.
    ///
    /// Providers without native streaming yield the whole response at once.
    async fn generate_stream(&self, request: &CompletionRequest) -> Result<TextStream> {
        let text = self.generate(request).await?;
        Ok(Box::pin(futures::stream::iter(vec![Ok(text)])))
    }
}

/// Whole-request timeout for provider calls. 0 = none, so long streamed
/// responses are never cut off.
fn request_timeout(timeout_secs: u64) -> Option<Duration> {
    (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs))
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = request_timeout(timeout_secs) {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

/// Build the provider selected in configuration
pub fn from_config(config: &ProviderConfig) -> Result<Box<dyn CompletionProvider>> {
    let model = (!config.model.is_empty()).then(|| config.model.clone());

    Ok(match config.kind {
        ProviderKind::OpenAi => {
            let mut c = OpenAiConfig::default();
            if let Some(model) = model {
                c.model = model;
            }
            if let Some(url) = &config.base_url {
                c.base_url = url.clone();
            }
            c.max_tokens = config.max_tokens;
            c.timeout_secs = config.timeout_secs;
            Box::new(OpenAiProvider::new(c)?)
        }
        ProviderKind::Anthropic => {
            let mut c = AnthropicConfig::default();
            if let Some(model) = model {
                c.model = model;
            }
            if let Some(url) = &config.base_url {
                c.base_url = url.clone();
            }
            c.max_tokens = config.max_tokens;
            c.timeout_secs = config.timeout_secs;
            Box::new(AnthropicProvider::new(c)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct Fixed;

    #[async_trait]
    impl CompletionProvider for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn encoding(&self) -> Encoding {
            Encoding::Sections
        }

        async fn generate(&self, _request: &CompletionRequest) -> Result<String> {
            Ok("<plan>p</plan>".to_string())
        }
    }

    #[test]
    fn test_patch_schema_is_strict() {
        let schema = ResponseSchema::patch();
        assert_eq!(schema.name, "patch");
        assert_eq!(schema.schema["additionalProperties"], json!(false));
        assert_eq!(
            schema.schema["required"],
            json!(["plan", "code", "commit_message"])
        );
        assert_eq!(schema.schema["properties"]["code"]["type"], "string");
    }

    #[test]
    fn test_summary_schema() {
        let schema = ResponseSchema::summary();
        assert_eq!(schema.schema["required"], json!(["commit_message"]));
    }

    #[tokio::test]
    async fn test_default_stream_yields_whole_response() {
        let request = CompletionRequest {
            system: String::new(),
            messages: vec![],
            schema: None,
        };
        let chunks: Vec<_> = Fixed.generate_stream(&request).await.unwrap().collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap(), "<plan>p</plan>");
    }

    #[test]
    fn test_request_timeout_zero_means_none() {
        assert_eq!(request_timeout(0), None);
        assert_eq!(request_timeout(30), Some(Duration::from_secs(30)));
        assert_eq!(ProviderConfig::default().timeout_secs, 0);
        assert!(http_client(0).is_ok());
    }

    #[test]
    fn test_from_config_selects_provider() {
        let mut config = ProviderConfig::default();
        assert_eq!(from_config(&config).unwrap().name(), "anthropic");

        config.kind = ProviderKind::OpenAi;
        let provider = from_config(&config).unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.encoding(), Encoding::Json);
    }
}
