//! HTTP client for the vision-model collaborator.
//!
//! Speaks the OpenAI-compatible chat-completions shape: one user turn with
//! the screenshot as a base64 data URL plus the fixed instruction. The
//! extractor owns parsing of the reply; this client only moves bytes.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::domain::extract::VisionModel;
use crate::error::{CoreError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);
const MAX_TOKENS: u32 = 400;

#[derive(Debug, Clone)]
pub struct VisionClientConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug)]
pub struct HttpVisionModel {
    client: reqwest::Client,
    config: VisionClientConfig,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl HttpVisionModel {
    pub fn new(config: VisionClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| {
                CoreError::Internal(format!(
                    "failed to build vision HTTP client: {err}"
                ))
            })?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl VisionModel for HttpVisionModel {
    async fn describe_screenshot(
        &self,
        image_png: &[u8],
        instruction: &str,
    ) -> Result<String> {
        let data_url =
            format!("data:image/png;base64,{}", BASE64.encode(image_png));

        let payload = json!({
            "model": self.config.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image_url",
                        "image_url": { "url": data_url },
                    },
                    { "type": "text", "text": instruction },
                ],
            }],
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                CoreError::Internal(format!("vision request failed: {err}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CoreError::Internal(format!(
                "vision endpoint returned {status}"
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|err| {
            CoreError::Internal(format!(
                "vision response was not valid JSON: {err}"
            ))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| {
                CoreError::Internal(
                    "vision response contained no choices".to_string(),
                )
            })
    }
}
