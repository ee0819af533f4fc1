//! OpenAI Images API client.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{GeneratedImage, ImageGenerator};
use crate::config::GeneratorConfig;
use crate::error::GenerationError;

const PROVIDER: &str = "openai";

/// Image generator backed by `POST {base_url}/images/generations`.
pub struct OpenAiImageGenerator {
    client: reqwest::Client,
    api_key: SecretString,
    config: GeneratorConfig,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    code: Option<String>,
}

impl OpenAiImageGenerator {
    /// Create a client. Fails if the config carries no API key.
    pub fn new(config: GeneratorConfig) -> Result<Self, GenerationError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| GenerationError::NotConfigured("OPENAI_API_KEY not set".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerationError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        info!("Using OpenAI images (model: {})", config.model);
        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/images/generations", self.config.base_url)
    }

    async fn request(&self, prompt: &str) -> Result<GeneratedImage, GenerationError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "size": self.config.size,
            "quality": self.config.quality,
            "n": 1,
            "response_format": "b64_json",
        });

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let text = resp.text().await.map_err(|e| GenerationError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: format!("Failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(classify_error(status, retry_after, &text));
        }

        parse_images_response(&text)
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn generate(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<GeneratedImage, GenerationError> {
        debug!(model = %self.config.model, prompt_len = prompt.len(), "Requesting image");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GenerationError::Cancelled),
            result = self.request(prompt) => result,
        }
    }
}

/// Pull the first image out of a successful response body.
fn parse_images_response(body: &str) -> Result<GeneratedImage, GenerationError> {
    let parsed: ImagesResponse =
        serde_json::from_str(body).map_err(|e| GenerationError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: format!("Malformed JSON: {e}"),
        })?;

    let first = parsed
        .data
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: "No image data returned".to_string(),
        })?;

    if let Some(b64) = first.b64_json.filter(|s| !s.is_empty()) {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64.as_bytes())
            .map_err(|e| GenerationError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: format!("Invalid base64 image: {e}"),
            })?;
        return Ok(GeneratedImage::Bytes(bytes));
    }

    match first.url.filter(|s| !s.is_empty()) {
        Some(url) => Ok(GeneratedImage::Url(url)),
        None => Err(GenerationError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: "Response carried neither b64_json nor url".to_string(),
        }),
    }
}

/// Map a non-2xx response to a generation error.
fn classify_error(status: StatusCode, retry_after: Option<Duration>, body: &str) -> GenerationError {
    let api_error = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|e| e.error);
    let message = api_error
        .as_ref()
        .map(|e| e.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GenerationError::AuthFailed {
            provider: PROVIDER.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => GenerationError::RateLimited {
            provider: PROVIDER.to_string(),
            retry_after,
        },
        StatusCode::BAD_REQUEST
            if api_error
                .as_ref()
                .and_then(|e| e.code.as_deref())
                .is_some_and(|c| c == "content_policy_violation") =>
        {
            GenerationError::Rejected {
                provider: PROVIDER.to_string(),
                reason: message,
            }
        }
        _ => GenerationError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: format!("HTTP {}: {}", status.as_u16(), message),
        },
    }
}
