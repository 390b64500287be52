//! Yandex Foundation Models client: text completion and YandexART images.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::ProviderError;
use super::provider::CompletionProvider;
use super::types::ConversationHistory;

const COMPLETION_URL: &str = "https://llm.api.cloud.yandex.net/foundationModels/v1/completion";
const IMAGE_URL: &str = "https://llm.api.cloud.yandex.net/foundationModels/v1/imageGenerationAsync";
const OPERATIONS_URL: &str = "https://llm.api.cloud.yandex.net:443/operations";
const MAX_TOKENS: u32 = 2000;
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const EMPTY_REPLY: &str = "(empty response)";

pub struct YandexClient {
    client: reqwest::Client,
    api_key: String,
    text_model_uri: String,
    image_model_uri: String,
    timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionRequest<'a> {
    model_uri: &'a str,
    completion_options: CompletionOptions,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionOptions {
    stream: bool,
    temperature: f32,
    max_tokens: String,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    text: &'a str,
}

#[derive(Deserialize, Debug)]
struct CompletionResponse {
    result: Option<CompletionResult>,
}

#[derive(Deserialize, Debug)]
struct CompletionResult {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize, Debug)]
struct Alternative {
    message: AlternativeMessage,
}

#[derive(Deserialize, Debug)]
struct AlternativeMessage {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageRequest<'a> {
    model_uri: &'a str,
    generation_options: GenerationOptions,
    messages: Vec<WeightedText<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationOptions {
    aspect_ratio: AspectRatio,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AspectRatio {
    width_ratio: String,
    height_ratio: String,
}

#[derive(Serialize)]
struct WeightedText<'a> {
    weight: String,
    text: &'a str,
}

#[derive(Deserialize, Debug)]
struct Operation {
    id: String,
    #[serde(default)]
    done: bool,
    error: Option<OperationError>,
    response: Option<ImageResponse>,
}

#[derive(Deserialize, Debug)]
struct OperationError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize, Debug)]
struct ImageResponse {
    image: String,
}

impl YandexClient {
    pub fn new(
        api_key: String,
        folder_id: &str,
        model: &str,
        image_model: &str,
        timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            text_model_uri: format!("gpt://{folder_id}/{model}/latest"),
            image_model_uri: format!("art://{folder_id}/{image_model}/latest"),
            timeout,
        })
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError> {
        let response = request
            .header("Authorization", format!("Api-Key {}", self.api_key))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.timeout.as_secs())
                } else {
                    ProviderError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Http(format!("failed to read response: {e}")))?;

        debug!("Yandex response status: {status}");

        if !status.is_success() {
            warn!("Yandex request failed with {status}: {body}");
            return Err(ProviderError::Api(status.to_string()));
        }

        serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))
    }

    async fn poll_operation(
        &self,
        mut operation: Operation,
    ) -> Result<ImageResponse, ProviderError> {
        let started = Instant::now();
        loop {
            if let Some(error) = operation.error {
                warn!("Image operation {} failed: {}", operation.id, error.message);
                return Err(ProviderError::Api(error.message));
            }
            if operation.done {
                return operation.response.ok_or(ProviderError::Empty);
            }
            if started.elapsed() >= self.timeout {
                warn!("Image operation {} still running after {:?}", operation.id, self.timeout);
                return Err(ProviderError::Timeout(self.timeout.as_secs()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            let url = format!("{}/{}", OPERATIONS_URL, operation.id);
            operation = self.send_json(self.client.get(&url)).await?;
        }
    }
}

fn completion_request<'a>(
    model_uri: &'a str,
    history: &'a ConversationHistory,
    temperature: f32,
) -> CompletionRequest<'a> {
    CompletionRequest {
        model_uri,
        completion_options: CompletionOptions {
            stream: false,
            temperature,
            max_tokens: MAX_TOKENS.to_string(),
        },
        messages: history
            .turns
            .iter()
            .map(|t| Message {
                role: t.role.as_str(),
                text: &t.text,
            })
            .collect(),
    }
}

fn reply_text(response: CompletionResponse) -> String {
    response
        .result
        .and_then(|r| r.alternatives.into_iter().next())
        .map(|a| a.message.text)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| EMPTY_REPLY.to_string())
}

#[async_trait]
impl CompletionProvider for YandexClient {
    async fn complete(
        &self,
        history: &ConversationHistory,
        temperature: f32,
    ) -> Result<String, ProviderError> {
        let request = completion_request(&self.text_model_uri, history, temperature);
        debug!("Sending {} turns to {}", request.messages.len(), self.text_model_uri);

        let response: CompletionResponse = self
            .send_json(self.client.post(COMPLETION_URL).json(&request))
            .await?;
        let text = reply_text(response);
        info!("💬 Completion: {} chars", text.len());
        Ok(text)
    }

    async fn generate_image(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
        info!("🎨 Generating image: {}", prompt);

        let request = ImageRequest {
            model_uri: &self.image_model_uri,
            generation_options: GenerationOptions {
                aspect_ratio: AspectRatio {
                    width_ratio: "1".to_string(),
                    height_ratio: "1".to_string(),
                },
            },
            messages: vec![WeightedText {
                weight: "1".to_string(),
                text: prompt,
            }],
        };

        let operation: Operation = self
            .send_json(self.client.post(IMAGE_URL).json(&request))
            .await?;
        debug!("Image operation started: {}", operation.id);

        let image = self.poll_operation(operation).await?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(&image.image)
            .map_err(|e| ProviderError::Parse(format!("failed to decode base64: {e}")))?;
        if data.is_empty() {
            return Err(ProviderError::Empty);
        }

        info!("🎨 Image generated: {} bytes", data.len());
        Ok(data)
    }
}
