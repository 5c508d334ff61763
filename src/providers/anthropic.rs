//! Anthropic Messages API provider

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::conversation::Turn;

use super::{error_detail, ChatProvider, ProviderError, MAX_TOKENS};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, timeout_secs: u64) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
        })
    }

    fn build_request<'a>(
        &'a self,
        system: &'a str,
        history: &'a [Turn],
        message: &'a str,
    ) -> MessagesRequest<'a> {
        let mut messages: Vec<AnthropicMessage<'a>> = history
            .iter()
            .map(|turn| AnthropicMessage {
                role: turn.role.as_str(),
                content: &turn.content,
            })
            .collect();
        messages.push(AnthropicMessage {
            role: "user",
            content: message,
        });

        MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system,
            messages,
        }
    }
}

/// Text of the first text block in a Messages API body
fn parse_message(body: &str) -> Result<String, ProviderError> {
    let response: MessagesResponse = serde_json::from_str(body).map_err(|e| {
        ProviderError::InvalidResponse(format!("Failed to parse response: {} - Body: {}", e, body))
    })?;

    response
        .content
        .into_iter()
        .find(|block| block.block_type == "text")
        .and_then(|block| block.text)
        .filter(|text| !text.trim().is_empty())
        .ok_or(ProviderError::EmptyResponse)
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn chat(
        &self,
        system: &str,
        history: &[Turn],
        message: &str,
    ) -> Result<String, ProviderError> {
        let request = self.build_request(system, history, message);

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::InvalidResponse(error_detail(status, &body)));
        }

        parse_message(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_is_top_level() {
        let provider =
            AnthropicProvider::new("key".into(), "claude-3-5-sonnet-20241022".into(), 30).unwrap();
        let history = vec![Turn::user("hi"), Turn::assistant("hello")];

        let json = serde_json::to_value(provider.build_request("be brief", &history, "and now?"))
            .unwrap();

        assert_eq!(json["system"], "be brief");
        assert_eq!(json["model"], "claude-3-5-sonnet-20241022");
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().all(|m| m["role"] != "system"));
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"], "and now?");
    }

    #[test]
    fn test_parse_message_reads_first_text_block() {
        let body = r#"{
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "Hello there"}],
            "stop_reason": "end_turn"
        }"#;
        assert_eq!(parse_message(body).unwrap(), "Hello there");
    }

    #[test]
    fn test_parse_message_without_text_is_empty() {
        assert!(matches!(
            parse_message(r#"{"content": []}"#),
            Err(ProviderError::EmptyResponse)
        ));
        assert!(matches!(
            parse_message("<html>"),
            Err(ProviderError::InvalidResponse(_))
        ));
    }
}
