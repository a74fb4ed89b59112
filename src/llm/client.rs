use crate::{
    config::Config,
    error::{ApiError, Result},
    llm::{
        AssistantMessage, CompletionRequest, CompletionResponse, ImageRequest, ImageResponse,
        LanguageModel,
    },
};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

const RETRY_BASE_DELAY_MS: u64 = 500;
const RETRY_MAX_DELAY_MS: u64 = 30_000;
const IMAGE_SIZE: &str = "1024x1024";

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    #[serde(flatten)]
    request: &'a CompletionRequest,
}

/// Client for an OpenAI-compatible chat completions and image generation API.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    image_model: String,
    max_retries: u32,
}

impl LlmClient {
    pub fn new(config: &Config) -> Result<Self> {
        if config.llm_api_key.trim().is_empty() {
            warn!("APP_LLM_API_KEY is not set; assistive features will fail upstream");
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.llm_timeout_secs))
            .connect_timeout(Duration::from_secs(config.llm_timeout_secs.min(10)))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| ApiError::InternalError(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            "LLM client using model {} (images: {}) at {}",
            config.llm_model, config.llm_image_model, config.llm_base_url
        );

        Ok(Self {
            client,
            base_url: config.llm_base_url.trim_end_matches('/').to_string(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
            image_model: config.llm_image_model.clone(),
            max_retries: config.llm_max_retries,
        })
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0;

        loop {
            let outcome = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(body)
                .send()
                .await;

            let retryable = match outcome {
                Ok(response) if response.status().is_success() => {
                    return response.json::<T>().await.map_err(|e| {
                        ApiError::ExternalServiceError(format!(
                            "Malformed response from {}: {}",
                            path, e
                        ))
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    let message = format!("{} returned {}: {}", path, status, text);
                    if !is_retryable(status) {
                        error!("{}", message);
                        return Err(ApiError::ExternalServiceError(message));
                    }
                    message
                }
                Err(e) => format!("{} request failed: {}", path, e),
            };

            if attempt >= self.max_retries {
                error!("Giving up after {} attempts: {}", attempt + 1, retryable);
                return Err(ApiError::ExternalServiceError(retryable));
            }

            let delay = retry_delay(attempt);
            warn!("{}; retrying in {}ms", retryable, delay.as_millis());
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Exponential backoff from `RETRY_BASE_DELAY_MS`, capped at `RETRY_MAX_DELAY_MS`.
fn retry_delay(attempt: u32) -> Duration {
    let delay = RETRY_BASE_DELAY_MS
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(RETRY_MAX_DELAY_MS);
    Duration::from_millis(delay)
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<AssistantMessage> {
        debug!(
            "Requesting completion: {} messages, {} tools",
            request.messages.len(),
            request.tools.len()
        );

        let body = ChatCompletionBody {
            model: &self.model,
            request,
        };
        let response: CompletionResponse = self.post_json("/chat/completions", &body).await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| {
                ApiError::ExternalServiceError("Completion returned no choices".to_string())
            })
    }

    async fn generate_image(&self, prompt: &str) -> Result<String> {
        let body = ImageRequest {
            model: &self.image_model,
            prompt,
            n: 1,
            size: IMAGE_SIZE,
        };
        let response: ImageResponse = self.post_json("/images/generations", &body).await?;

        let image = response.data.into_iter().next().ok_or_else(|| {
            ApiError::ExternalServiceError("Image generation returned no images".to_string())
        })?;

        match (image.url, image.b64_json) {
            (Some(url), _) => Ok(url),
            (None, Some(b64)) => Ok(format!("data:image/png;base64,{}", b64)),
            (None, None) => Err(ApiError::ExternalServiceError(
                "Image generation returned neither a URL nor image data".to_string(),
            )),
        }
    }
}
