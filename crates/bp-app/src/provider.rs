//! Generation backends behind one capability interface, plus the ordered
//! fallback chain that tries them in sequence.

pub mod diffusion;
pub mod openai;

use std::fmt;

use async_trait::async_trait;
use tracing::warn;

use bp_core::RawImage;

use crate::error::{ProviderError, ProviderErrorKind};

/// Request shape shared by every backend, regardless of its native wire
/// format.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub count: u32,
    pub width: u32,
    pub height: u32,
}

/// A text-to-image backend. Stateless and safe to reuse across designs.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Returns up to `req.count` decoded images. Returning fewer than
    /// requested is a success; the shortfall is the caller's policy call.
    async fn generate(&self, req: &GenerationRequest) -> Result<Vec<RawImage>, ProviderError>;
}

pub(crate) fn classify_status(status: reqwest::StatusCode) -> ProviderErrorKind {
    match status.as_u16() {
        429 => ProviderErrorKind::RateLimited,
        401 | 403 => ProviderErrorKind::AuthFailed,
        _ => ProviderErrorKind::BadResponse,
    }
}

/// One exhausted provider in a chain run.
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: String,
    pub attempts: u32,
    pub error: ProviderError,
}

/// Every provider in the chain was exhausted.
#[derive(Debug)]
pub struct ChainExhausted {
    pub failures: Vec<ProviderFailure>,
}

impl fmt::Display for ChainExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} providers exhausted: ", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ChainExhausted {}

/// Successful chain run: the winning provider's images plus the failures
/// recorded along the way.
#[derive(Debug)]
pub struct ChainOutcome {
    pub images: Vec<RawImage>,
    pub failures: Vec<ProviderFailure>,
}

/// Ordered providers tried in sequence until one succeeds. Transient
/// failures (`RateLimited`, `NetworkError`) are retried within a small
/// fixed budget before the chain advances; the other kinds advance
/// immediately.
pub struct ProviderChain {
    providers: Vec<Box<dyn ImageProvider>>,
    transient_retries: u32,
}

impl ProviderChain {
    pub fn new(providers: Vec<Box<dyn ImageProvider>>) -> Self {
        Self {
            providers,
            transient_retries: 1,
        }
    }

    pub fn with_transient_retries(mut self, retries: u32) -> Self {
        self.transient_retries = retries;
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub async fn generate(&self, req: &GenerationRequest) -> Result<ChainOutcome, ChainExhausted> {
        let mut failures = Vec::new();

        for provider in &self.providers {
            let mut attempts = 0;
            let error = loop {
                attempts += 1;
                match provider.generate(req).await {
                    Ok(images) if images.is_empty() => {
                        // An empty sequence cannot produce a design; treat
                        // it as a malformed response and advance.
                        break ProviderError::new(
                            provider.name(),
                            ProviderErrorKind::BadResponse,
                            "provider returned no images",
                        );
                    }
                    Ok(images) => {
                        if (images.len() as u32) < req.count {
                            warn!(
                                provider = provider.name(),
                                got = images.len(),
                                requested = req.count,
                                "provider returned fewer images than requested"
                            );
                        }
                        return Ok(ChainOutcome { images, failures });
                    }
                    Err(err) if err.kind.is_transient() && attempts <= self.transient_retries => {
                        warn!(provider = provider.name(), attempt = attempts, %err, "transient failure, retrying");
                    }
                    Err(err) => break err,
                }
            };
            warn!(provider = provider.name(), attempts, %error, "provider exhausted, advancing the chain");
            failures.push(ProviderFailure {
                provider: provider.name().to_string(),
                attempts,
                error,
            });
        }

        Err(ChainExhausted { failures })
    }
}
