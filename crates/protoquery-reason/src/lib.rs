//! protoquery-reason
//!
//! Reasoning backend over the Anthropic Messages API. The core only sees the
//! `Reasoner` trait; this crate turns HTTP outcomes into transient or
//! permanent collaborator failures.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use protoquery_core::answer::ReasoningRequest;
use protoquery_core::config::ReasoningSettings;
use protoquery_core::error::CollaboratorError;
use protoquery_core::traits::Reasoner;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize, PartialEq)]
pub struct MessagesBody {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Message {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AnthropicReasoner {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicReasoner {
    /// Returns `None` when no API key is configured.
    pub fn from_settings(settings: &ReasoningSettings, timeout: Duration) -> Result<Option<Self>> {
        let Some(api_key) = settings.api_key.clone().filter(|k| !k.trim().is_empty()) else { return Ok(None) };
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Some(Self {
            client,
            api_key,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
        }))
    }

    pub fn model(&self) -> &str { &self.model }

    pub fn body(&self, request: &ReasoningRequest) -> MessagesBody {
        MessagesBody {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: request.system.clone(),
            messages: vec![Message { role: "user", content: request.user_message() }],
        }
    }
}

/// 429 and 5xx are worth another attempt; other failures are not.
pub fn classify_status(status: StatusCode) -> fn(String) -> CollaboratorError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CollaboratorError::Transient
    } else {
        CollaboratorError::Failed
    }
}

fn classify_transport(e: &reqwest::Error) -> CollaboratorError {
    if e.is_timeout() || e.is_connect() {
        CollaboratorError::Transient(e.to_string())
    } else {
        CollaboratorError::Failed(e.to_string())
    }
}

fn first_text(raw: &str) -> Result<String> {
    let parsed: MessagesResponse = serde_json::from_str(raw)?;
    parsed
        .content
        .into_iter()
        .find(|c| c.content_type == "text")
        .and_then(|c| c.text)
        .ok_or_else(|| anyhow!("response has no text content"))
}

#[async_trait]
impl Reasoner for AnthropicReasoner {
    async fn complete(&self, request: &ReasoningRequest) -> Result<String, CollaboratorError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.endpoint))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| classify_transport(&e))?;
        if !status.is_success() {
            tracing::warn!(%status, "reasoning request failed");
            return Err(classify_status(status)(format!("Anthropic API error {status}: {text}")));
        }
        first_text(&text).map_err(CollaboratorError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_text_block() {
        let raw = r#"{"content":[{"type":"tool_use"},{"type":"text","text":"{\"answer\":\"ok\"}"}],"stop_reason":"end_turn"}"#;
        assert_eq!(first_text(raw).unwrap(), "{\"answer\":\"ok\"}");
        assert!(first_text(r#"{"content":[]}"#).is_err());
    }

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE)("x".into()).is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS)("x".into()).is_transient());
        assert!(!classify_status(StatusCode::UNAUTHORIZED)("x".into()).is_transient());
    }
}
