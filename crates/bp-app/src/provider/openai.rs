//! DALL·E-style image generation adapter.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::info;

use bp_core::RawImage;

use crate::error::{ProviderError, ProviderErrorKind};
use crate::provider::{GenerationRequest, ImageProvider, classify_status};

pub const PROVIDER_NAME: &str = "dall-e";

const API_URL: &str = "https://api.openai.com/v1/images/generations";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct ImagesRequest<'a> {
    prompt: &'a str,
    n: u32,
    size: &'static str,
    response_format: &'static str,
}

#[derive(Deserialize)]
struct ImagesResponse {
    data: Vec<ImageEntry>,
}

#[derive(Deserialize)]
struct ImageEntry {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

pub struct DallEProvider {
    client: reqwest::Client,
    api_key: String,
}

impl DallEProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    /// The API only accepts fixed square sizes; pick the largest one that
    /// the compositor can still scale up acceptably.
    fn size_for(req: &GenerationRequest) -> &'static str {
        if req.width >= 1024 || req.height >= 1024 {
            "1024x1024"
        } else if req.width >= 512 || req.height >= 512 {
            "512x512"
        } else {
            "256x256"
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| ProviderError::new(PROVIDER_NAME, ProviderErrorKind::NetworkError, e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProviderError::new(
                PROVIDER_NAME,
                classify_status(response.status()),
                format!("image download failed: HTTP {}", response.status()),
            ));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::new(PROVIDER_NAME, ProviderErrorKind::NetworkError, e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageProvider for DallEProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn generate(&self, req: &GenerationRequest) -> Result<Vec<RawImage>, ProviderError> {
        let body = ImagesRequest {
            prompt: &req.prompt,
            n: req.count,
            size: Self::size_for(req),
            response_format: "b64_json",
        };

        let response = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| ProviderError::new(PROVIDER_NAME, ProviderErrorKind::NetworkError, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(
                PROVIDER_NAME,
                classify_status(status),
                format!("HTTP {status}: {body}"),
            ));
        }

        let parsed: ImagesResponse = response.json().await.map_err(|e| {
            ProviderError::new(
                PROVIDER_NAME,
                ProviderErrorKind::BadResponse,
                format!("malformed response: {e}"),
            )
        })?;

        let mut images = Vec::with_capacity(parsed.data.len());
        for entry in parsed.data {
            let bytes = match (entry.b64_json, entry.url) {
                (Some(b64), _) => BASE64.decode(b64.as_bytes()).map_err(|e| {
                    ProviderError::new(
                        PROVIDER_NAME,
                        ProviderErrorKind::BadResponse,
                        format!("invalid b64_json payload: {e}"),
                    )
                })?,
                (None, Some(url)) => self.fetch(&url).await?,
                (None, None) => {
                    return Err(ProviderError::new(
                        PROVIDER_NAME,
                        ProviderErrorKind::BadResponse,
                        "image entry carried neither b64_json nor url",
                    ));
                }
            };
            let decoded = image::load_from_memory(&bytes).map_err(|e| {
                ProviderError::new(
                    PROVIDER_NAME,
                    ProviderErrorKind::BadResponse,
                    format!("undecodable image payload: {e}"),
                )
            })?;
            images.push(RawImage::new(decoded.to_rgba8(), PROVIDER_NAME));
        }

        info!(provider = PROVIDER_NAME, count = images.len(), "generated images");
        Ok(images)
    }
}
