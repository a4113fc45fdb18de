//! Adapter for an Automatic1111-style local diffusion server. Generation
//! happens at the model's native resolution; when the request wants more
//! pixels than the model can render, a second call to the server's upscale
//! endpoint raises the resolution before decoding.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use bp_core::RawImage;

use crate::error::{ProviderError, ProviderErrorKind};
use crate::provider::{GenerationRequest, ImageProvider, classify_status};

pub const PROVIDER_NAME: &str = "diffusion";

const TXT2IMG_PATH: &str = "/sdapi/v1/txt2img";
const UPSCALE_PATH: &str = "/sdapi/v1/extra-single-image";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Largest edge the model renders natively.
const MAX_NATIVE_EDGE: u32 = 1024;
const MAX_UPSCALE_FACTOR: f32 = 4.0;

#[derive(Serialize)]
struct Txt2ImgRequest<'a> {
    prompt: &'a str,
    batch_size: u32,
    width: u32,
    height: u32,
    steps: u32,
}

#[derive(Deserialize)]
struct Txt2ImgResponse {
    images: Vec<String>,
}

#[derive(Serialize)]
struct UpscaleRequest<'a> {
    image: &'a str,
    upscaling_resize: f32,
    upscaler_1: &'static str,
}

#[derive(Deserialize)]
struct UpscaleResponse {
    image: String,
}

pub struct DiffusionProvider {
    client: reqwest::Client,
    base_url: String,
}

impl DiffusionProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn network(e: reqwest::Error) -> ProviderError {
        ProviderError::new(PROVIDER_NAME, ProviderErrorKind::NetworkError, e.to_string())
    }

    fn bad(message: impl Into<String>) -> ProviderError {
        ProviderError::new(PROVIDER_NAME, ProviderErrorKind::BadResponse, message)
    }

    async fn post_json<Req: Serialize, Resp: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(Self::network)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(
                PROVIDER_NAME,
                classify_status(status),
                format!("HTTP {status}: {body}"),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| Self::bad(format!("malformed response: {e}")))
    }

    /// Secondary upscale pass, applied when the native render is smaller
    /// than the requested canvas.
    async fn upscale(&self, b64: &str, factor: f32) -> Result<String, ProviderError> {
        debug!(provider = PROVIDER_NAME, factor, "upscaling native render");
        let response: UpscaleResponse = self
            .post_json(
                UPSCALE_PATH,
                &UpscaleRequest {
                    image: b64,
                    upscaling_resize: factor,
                    upscaler_1: "Lanczos",
                },
            )
            .await?;
        Ok(response.image)
    }

    fn upscale_factor(req: &GenerationRequest, native_w: u32, native_h: u32) -> f32 {
        let factor = f32::max(
            req.width as f32 / native_w as f32,
            req.height as f32 / native_h as f32,
        );
        factor.clamp(1.0, MAX_UPSCALE_FACTOR)
    }
}

#[async_trait]
impl ImageProvider for DiffusionProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn generate(&self, req: &GenerationRequest) -> Result<Vec<RawImage>, ProviderError> {
        let native_w = req.width.min(MAX_NATIVE_EDGE);
        let native_h = req.height.min(MAX_NATIVE_EDGE);

        let rendered: Txt2ImgResponse = self
            .post_json(
                TXT2IMG_PATH,
                &Txt2ImgRequest {
                    prompt: &req.prompt,
                    batch_size: req.count,
                    width: native_w,
                    height: native_h,
                    steps: 30,
                },
            )
            .await?;

        let factor = Self::upscale_factor(req, native_w, native_h);

        let mut images = Vec::with_capacity(rendered.images.len());
        for b64 in rendered.images {
            let b64 = if factor > 1.0 {
                self.upscale(&b64, factor).await?
            } else {
                b64
            };
            let bytes = BASE64
                .decode(b64.as_bytes())
                .map_err(|e| Self::bad(format!("invalid image payload: {e}")))?;
            let decoded = image::load_from_memory(&bytes)
                .map_err(|e| Self::bad(format!("undecodable image payload: {e}")))?;
            images.push(RawImage::new(decoded.to_rgba8(), PROVIDER_NAME));
        }

        info!(provider = PROVIDER_NAME, count = images.len(), "generated images");
        Ok(images)
    }
}
