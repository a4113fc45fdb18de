//! Sequences the pipeline per prompt: provider fallback chain, compositor,
//! then serialized publishing through the single upload session. A failed
//! design never aborts the batch; the run reports ordered partial results.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use bp_core::{CanvasSpec, Design, DesignMetadata, DesignStatus, Prompt, composite};

use crate::driver::RemoteFormDriver;
use crate::error::DriverError;
use crate::provider::{GenerationRequest, ProviderChain};
use crate::session::UploadSession;

/// Cooperative cancellation, checked only at design boundaries. A design
/// mid-upload always runs to completion; partially-submitted remote state
/// cannot be rolled back.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Published { url: String },
    Failed { stage: String, reason: String },
}

/// One immutable record per design, in pipeline order.
#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub design_id: Uuid,
    pub title: String,
    pub outcome: Outcome,
    pub finished_at: DateTime<Utc>,
}

impl UploadResult {
    fn published(design: &Design, url: String) -> Self {
        Self {
            design_id: design.id,
            title: design.metadata.title.clone(),
            outcome: Outcome::Published { url },
            finished_at: Utc::now(),
        }
    }

    fn failed(design: &Design, stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            design_id: design.id,
            title: design.metadata.title.clone(),
            outcome: Outcome::Failed {
                stage: stage.into(),
                reason: reason.into(),
            },
            finished_at: Utc::now(),
        }
    }

    fn cancelled(design: &Design) -> Self {
        Self::failed(design, "Cancelled", "run cancelled before this design")
    }
}

/// Per-run metadata applied to every design on top of what the prompt
/// derives.
#[derive(Debug, Clone, Default)]
pub struct MetadataDefaults {
    pub description: Option<String>,
    pub tags: Vec<String>,
}

pub struct Orchestrator<D: RemoteFormDriver> {
    chain: ProviderChain,
    session: UploadSession<D>,
    canvas: CanvasSpec,
    defaults: MetadataDefaults,
}

impl<D: RemoteFormDriver> Orchestrator<D> {
    pub fn new(chain: ProviderChain, session: UploadSession<D>, canvas: CanvasSpec) -> Self {
        Self {
            chain,
            session,
            canvas,
            defaults: MetadataDefaults::default(),
        }
    }

    pub fn with_metadata_defaults(mut self, defaults: MetadataDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    fn metadata_for(&self, prompt: &Prompt, variant: usize) -> DesignMetadata {
        let mut meta = DesignMetadata::derived(prompt, variant);
        if let Some(description) = &self.defaults.description {
            meta.description = description.clone();
        }
        meta.tags = self.defaults.tags.clone();
        meta
    }

    fn placeholder_design(&self, prompt: &Prompt) -> Design {
        Design::new(prompt.clone(), self.metadata_for(prompt, 0))
    }

    pub async fn run(&mut self, prompts: &[Prompt], cancel: &CancelToken) -> Vec<UploadResult> {
        let mut results = Vec::new();

        if cancel.is_cancelled() {
            return prompts
                .iter()
                .map(|p| UploadResult::cancelled(&self.placeholder_design(p)))
                .collect();
        }

        // One authenticated session for the whole run. Without it no design
        // can publish, so a login failure fails every prompt up front.
        if let Err(err) = self.session.login().await {
            error!(%err, "login failed, aborting the run");
            return prompts
                .iter()
                .map(|p| {
                    UploadResult::failed(
                        &self.placeholder_design(p),
                        err.stage.to_string(),
                        err.to_string(),
                    )
                })
                .collect();
        }

        for (idx, prompt) in prompts.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(remaining = prompts.len() - idx, "run cancelled");
                for p in &prompts[idx..] {
                    results.push(UploadResult::cancelled(&self.placeholder_design(p)));
                }
                break;
            }
            self.run_prompt(prompt, cancel, &mut results).await;
        }

        results
    }

    async fn run_prompt(
        &mut self,
        prompt: &Prompt,
        cancel: &CancelToken,
        results: &mut Vec<UploadResult>,
    ) {
        let request = GenerationRequest {
            prompt: prompt.text().to_string(),
            count: prompt.variants(),
            width: self.canvas.width,
            height: self.canvas.height,
        };

        info!(prompt = prompt.text(), count = prompt.variants(), "generating");
        let outcome = match self.chain.generate(&request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(prompt = prompt.text(), %err, "generation failed");
                let mut design = self.placeholder_design(prompt);
                design.status = DesignStatus::Failed(err.to_string());
                results.push(UploadResult::failed(&design, "Generation", err.to_string()));
                return;
            }
        };
        if !outcome.failures.is_empty() {
            info!(
                fallbacks = outcome.failures.len(),
                provider = outcome.images[0].provider,
                "generation succeeded after fallback"
            );
        }

        for (variant, raw) in outcome.images.into_iter().enumerate() {
            let mut design = Design::new(prompt.clone(), self.metadata_for(prompt, variant));
            if cancel.is_cancelled() {
                results.push(UploadResult::cancelled(&design));
                continue;
            }
            design.status = DesignStatus::Generated;

            let composited = match composite(&raw, self.canvas) {
                Ok(c) => c,
                Err(err) => {
                    // contract violation, not a runtime condition to retry
                    error!(design = %design.id, %err, "compositing failed");
                    design.status = DesignStatus::Failed(err.to_string());
                    results.push(UploadResult::failed(&design, "Composite", err.to_string()));
                    continue;
                }
            };
            design.composite = Some(composited);
            design.status = DesignStatus::Composited;

            design.status = DesignStatus::Publishing;
            match self.session.publish(&design).await {
                Ok(url) => {
                    design.status = DesignStatus::Published(url.clone());
                    results.push(UploadResult::published(&design, url));
                }
                Err(err) => {
                    // Never retried: re-submission against the remote form
                    // risks duplicate listings.
                    design.status = DesignStatus::Failed(err.to_string());
                    results.push(UploadResult::failed(
                        &design,
                        err.stage.to_string(),
                        err.to_string(),
                    ));
                }
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), DriverError> {
        self.session.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::MockDriver;
    use crate::error::ProviderErrorKind;
    use crate::provider::testing::StubProvider;
    use crate::session::{Credentials, SessionState, landmarks};

    const WORK_URL: &str = "https://www.redbubble.com/people/test/works/7-cat";

    fn credentials() -> Credentials {
        Credentials {
            email: "artist@example.com".into(),
            password: "hunter2".into(),
        }
    }

    fn orchestrator(
        providers: Vec<Box<dyn crate::provider::ImageProvider>>,
        driver: MockDriver,
    ) -> Orchestrator<MockDriver> {
        Orchestrator::new(
            ProviderChain::new(providers),
            UploadSession::new(driver, credentials()),
            CanvasSpec::new(90, 108),
        )
    }

    fn prompts(texts: &[&str]) -> Vec<Prompt> {
        texts.iter().map(|t| Prompt::new(*t, 1)).collect()
    }

    #[tokio::test]
    async fn happy_path_publishes_every_prompt() {
        let mut orch = orchestrator(
            vec![Box::new(StubProvider::ok("a"))],
            MockDriver::with_confirmation_url(WORK_URL),
        );
        let results = orch
            .run(&prompts(&["red circle", "blue square"]), &CancelToken::new())
            .await;

        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(
                result.outcome,
                Outcome::Published {
                    url: WORK_URL.to_string()
                }
            );
        }
    }

    #[tokio::test]
    async fn submit_timeout_fails_one_design_and_the_run_continues() {
        // first publish confirms, second times out, third confirms again
        let driver = MockDriver::with_confirmation_url(WORK_URL)
            .wait_outcomes(landmarks::CONFIRMATION_LINK, &[true, false, true]);
        let mut orch = orchestrator(vec![Box::new(StubProvider::ok("a"))], driver);

        let results = orch
            .run(&prompts(&["one", "two", "three"]), &CancelToken::new())
            .await;

        assert_eq!(results.len(), 3);
        assert!(matches!(results[0].outcome, Outcome::Published { .. }));
        match &results[1].outcome {
            Outcome::Failed { stage, .. } => assert_eq!(stage, "Submitting"),
            other => panic!("expected a Submitting failure, got {other:?}"),
        }
        assert!(
            matches!(results[2].outcome, Outcome::Published { .. }),
            "session stayed usable after the timeout"
        );
    }

    #[tokio::test]
    async fn login_failure_fails_the_whole_run() {
        let driver = MockDriver::with_confirmation_url(WORK_URL)
            .never_shows(landmarks::LOGGED_IN_HEADER);
        let mut orch = orchestrator(vec![Box::new(StubProvider::ok("a"))], driver);

        let results = orch.run(&prompts(&["one", "two"]), &CancelToken::new()).await;

        assert_eq!(results.len(), 2);
        for result in &results {
            match &result.outcome {
                Outcome::Failed { stage, .. } => assert_eq!(stage, "LoggingIn"),
                other => panic!("expected a LoggingIn failure, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn exhausted_generation_fails_only_that_prompt() {
        // the single provider fails hard on the first call, then recovers
        let provider = StubProvider::scripted(
            "a",
            vec![Err(ProviderErrorKind::AuthFailed), Ok(1)],
        );
        let mut orch = orchestrator(
            vec![Box::new(provider)],
            MockDriver::with_confirmation_url(WORK_URL),
        );

        let results = orch.run(&prompts(&["one", "two"]), &CancelToken::new()).await;

        match &results[0].outcome {
            Outcome::Failed { stage, reason } => {
                assert_eq!(stage, "Generation");
                assert!(reason.contains("auth failed"), "{reason}");
            }
            other => panic!("expected a Generation failure, got {other:?}"),
        }
        assert!(matches!(results[1].outcome, Outcome::Published { .. }));
    }

    #[tokio::test]
    async fn variants_produce_one_result_each() {
        let mut orch = orchestrator(
            vec![Box::new(StubProvider::ok("a"))],
            MockDriver::with_confirmation_url(WORK_URL),
        );
        let results = orch
            .run(&[Prompt::new("cat", 3)], &CancelToken::new())
            .await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| matches!(r.outcome, Outcome::Published { .. })));
        assert_eq!(results[1].title, "cat #2");
    }

    #[tokio::test]
    async fn pre_cancelled_run_touches_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut orch = orchestrator(
            vec![Box::new(StubProvider::ok("a"))],
            MockDriver::with_confirmation_url(WORK_URL),
        );
        let results = orch.run(&prompts(&["one", "two"]), &cancel).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(
            &r.outcome,
            Outcome::Failed { stage, .. } if stage == "Cancelled"
        )));
        assert_eq!(*orch.session.state(), SessionState::LoggedOut);
    }
}
