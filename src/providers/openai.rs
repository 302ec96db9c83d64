use super::{build_messages, ChatMessage, ProviderConfig, ProviderKind, ProviderResult, SearchGeneration, TextGeneration};
use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

/// OpenAI provider over the Responses API
pub struct OpenAIProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: ResponsesInput,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ResponsesTool>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ResponsesInput {
    Text(String),
    Messages(Vec<ChatMessage>),
}

#[derive(Debug, Serialize)]
struct ResponsesTool {
    #[serde(rename = "type")]
    kind: &'static str,
    search_context_size: &'static str,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl ResponsesResponse {
    /// Concatenated `output_text` parts of every message item
    fn output_text(&self) -> String {
        self.output
            .iter()
            .filter(|item| item.kind == "message")
            .flat_map(|item| item.content.iter())
            .filter(|c| c.kind == "output_text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("")
    }
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        if config.api_key.is_none() {
            return Err(ProviderError::new("config", "OpenAI API key required"));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { config, client })
    }

    fn responses_url(&self) -> String {
        let base = self.config.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
        format!("{}/responses", base.trim_end_matches('/'))
    }

    async fn send(&self, capability: &'static str, request: &ResponsesRequest<'_>) -> ProviderResult<String> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::new(capability, "OpenAI API key not configured"))?;

        debug!("Sending {} request to OpenAI ({})", capability, self.config.model);

        let response = self
            .client
            .post(self.responses_url())
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ProviderError::new(capability, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(
                capability,
                format!("OpenAI API error {}: {}", status, text),
            ));
        }

        let body: ResponsesResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::new(capability, format!("malformed response: {}", e)))?;

        Ok(body.output_text())
    }
}

#[async_trait]
impl TextGeneration for OpenAIProvider {
    async fn generate_text(&self, instruction: &str, auxiliary: &[String]) -> ProviderResult<String> {
        let request = ResponsesRequest {
            model: &self.config.model,
            input: ResponsesInput::Messages(build_messages(instruction, auxiliary)?),
            tools: Vec::new(),
        };
        self.send("generate_text", &request).await
    }

    fn provider_type(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }
}

#[async_trait]
impl SearchGeneration for OpenAIProvider {
    async fn search_and_generate(&self, query: &str) -> ProviderResult<String> {
        let request = ResponsesRequest {
            model: &self.config.model,
            input: ResponsesInput::Text(query.to_string()),
            tools: vec![ResponsesTool {
                kind: "web_search",
                search_context_size: "high",
            }],
        };
        self.send("search_and_generate", &request).await
    }
}
