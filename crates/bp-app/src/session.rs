//! The upload session: one authenticated browser context, driven through
//! the marketplace's multi-step publish form as a state machine with
//! bounded waits and per-stage failure classification.

use std::time::Duration;

use tracing::{info, warn};

use bp_core::Design;

use crate::driver::RemoteFormDriver;
use crate::error::{DriverError, SessionError, SessionErrorKind, SessionStage};

/// Marketplace URLs and the selector set the session depends on.
pub mod landmarks {
    pub const LOGIN_URL: &str = "https://www.redbubble.com/auth/login/traditional";
    pub const UPLOAD_URL: &str = "https://www.redbubble.com/portfolio/images/upload";

    pub const USERNAME_FIELD: &str = "input[name=\"username\"]";
    pub const PASSWORD_FIELD: &str = "input[name=\"password\"]";
    pub const LOGIN_SUBMIT: &str = "button[type=\"submit\"]";
    /// Appears once the identity endpoint accepts the credentials.
    pub const LOGGED_IN_HEADER: &str = "header[aria-label=\"Redbubble\"]";

    pub const FILE_INPUT: &str = "input[type=\"file\"]";
    pub const TITLE_FIELD: &str = "input[name=\"title\"]";
    pub const DESCRIPTION_FIELD: &str = "textarea[name=\"description\"]";
    pub const TAGS_FIELD: &str = "input[name=\"tags\"]";
    pub const FORM_SUBMIT: &str = "button[type=\"submit\"]";
    /// Post-publish confirmation; its href is the canonical listing URL.
    pub const CONFIRMATION_LINK: &str = "a[href*='/work/']";
}

pub const AUTH_TIMEOUT: Duration = Duration::from_secs(60);
pub const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(60);
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    LoggingIn,
    LoggedIn,
    NavigatingToUploadForm,
    FormReady,
    FilePicked,
    MetadataFilled,
    Submitting,
    Published,
    Failed {
        stage: SessionStage,
        reason: SessionErrorKind,
    },
}

impl SessionState {
    /// A login failure poisons the session; everything else leaves the
    /// authenticated context intact.
    fn usable_for_publish(&self) -> bool {
        match self {
            Self::LoggedIn | Self::Published => true,
            Self::Failed { stage, .. } => *stage != SessionStage::LoggingIn,
            _ => false,
        }
    }
}

pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// One session maps to exactly one authenticated identity and publishes an
/// ordered sequence of designs without re-authenticating between them. Not
/// shared across concurrent callers.
pub struct UploadSession<D: RemoteFormDriver> {
    driver: D,
    credentials: Credentials,
    state: SessionState,
}

impl<D: RemoteFormDriver> UploadSession<D> {
    pub fn new(driver: D, credentials: Credentials) -> Self {
        Self {
            driver,
            credentials,
            state: SessionState::LoggedOut,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[cfg(test)]
    pub(crate) fn driver_ref(&self) -> &D {
        &self.driver
    }

    fn fail(
        &mut self,
        stage: SessionStage,
        timeout_kind: SessionErrorKind,
        err: DriverError,
    ) -> SessionError {
        let (kind, message) = match err {
            DriverError::Timeout(selector) => {
                (timeout_kind, format!("no `{selector}` within the deadline"))
            }
            other => (SessionErrorKind::Driver, other.to_string()),
        };
        self.state = SessionState::Failed {
            stage,
            reason: kind,
        };
        let err = SessionError {
            stage,
            kind,
            message,
        };
        warn!(%err, "session failure");
        err
    }

    fn contract_violation(stage: SessionStage, message: impl Into<String>) -> SessionError {
        SessionError {
            stage,
            kind: SessionErrorKind::Driver,
            message: message.into(),
        }
    }

    pub async fn login(&mut self) -> Result<(), SessionError> {
        self.state = SessionState::LoggingIn;
        info!("logging in to the marketplace");

        use SessionErrorKind::AuthTimeout;
        use SessionStage::LoggingIn;

        if let Err(e) = self.driver.goto(landmarks::LOGIN_URL).await {
            return Err(self.fail(LoggingIn, AuthTimeout, e));
        }
        if let Err(e) = self
            .driver
            .fill_field(landmarks::USERNAME_FIELD, &self.credentials.email)
            .await
        {
            return Err(self.fail(LoggingIn, AuthTimeout, e));
        }
        if let Err(e) = self
            .driver
            .fill_field(landmarks::PASSWORD_FIELD, &self.credentials.password)
            .await
        {
            return Err(self.fail(LoggingIn, AuthTimeout, e));
        }
        if let Err(e) = self.driver.click(landmarks::LOGIN_SUBMIT).await {
            return Err(self.fail(LoggingIn, AuthTimeout, e));
        }
        if let Err(e) = self
            .driver
            .wait_for_landmark(landmarks::LOGGED_IN_HEADER, AUTH_TIMEOUT)
            .await
        {
            return Err(self.fail(LoggingIn, AuthTimeout, e));
        }

        self.state = SessionState::LoggedIn;
        info!("authenticated");
        Ok(())
    }

    /// Publish one design through the remote form. After a non-login
    /// failure the session re-arms to `LoggedIn` on the next call; the
    /// authenticated context carries over.
    pub async fn publish(&mut self, design: &Design) -> Result<String, SessionError> {
        if !self.state.usable_for_publish() {
            return Err(Self::contract_violation(
                SessionStage::LoggingIn,
                format!("cannot publish from session state {:?}", self.state),
            ));
        }

        let composite = design.composite.as_ref().ok_or_else(|| {
            Self::contract_violation(SessionStage::FormReady, "design has no composite image")
        })?;
        let png = composite.encode_png().map_err(|e| {
            Self::contract_violation(SessionStage::FormReady, format!("encoding upload: {e}"))
        })?;

        use SessionErrorKind::{PageLoadTimeout, PublishTimeout};

        self.state = SessionState::NavigatingToUploadForm;
        info!(design = %design.id, "navigating to the upload form");
        if let Err(e) = self.driver.goto(landmarks::UPLOAD_URL).await {
            return Err(self.fail(SessionStage::FormReady, PageLoadTimeout, e));
        }
        if let Err(e) = self
            .driver
            .wait_for_landmark(landmarks::FILE_INPUT, PAGE_LOAD_TIMEOUT)
            .await
        {
            return Err(self.fail(SessionStage::FormReady, PageLoadTimeout, e));
        }
        self.state = SessionState::FormReady;

        let file_name = design.file_name();
        if let Err(e) = self
            .driver
            .attach_file(landmarks::FILE_INPUT, &file_name, &png)
            .await
        {
            return Err(self.fail(SessionStage::FormReady, PageLoadTimeout, e));
        }
        // The title field turning interactable is the only signal the
        // remote form gives that the file was accepted.
        if let Err(e) = self
            .driver
            .wait_for_landmark(landmarks::TITLE_FIELD, PAGE_LOAD_TIMEOUT)
            .await
        {
            return Err(self.fail(SessionStage::FormReady, PageLoadTimeout, e));
        }
        self.state = SessionState::FilePicked;

        let fills = [
            (landmarks::TITLE_FIELD, design.metadata.title.clone()),
            (
                landmarks::DESCRIPTION_FIELD,
                design.metadata.description.clone(),
            ),
            (landmarks::TAGS_FIELD, design.metadata.tags.join(",")),
        ];
        for (selector, value) in fills {
            if let Err(e) = self.driver.fill_field(selector, &value).await {
                return Err(self.fail(SessionStage::FilePicked, PageLoadTimeout, e));
            }
        }
        self.state = SessionState::MetadataFilled;

        self.state = SessionState::Submitting;
        info!(design = %design.id, "submitting");
        if let Err(e) = self.driver.click(landmarks::FORM_SUBMIT).await {
            return Err(self.fail(SessionStage::Submitting, PublishTimeout, e));
        }
        if let Err(e) = self
            .driver
            .wait_for_landmark(landmarks::CONFIRMATION_LINK, PUBLISH_TIMEOUT)
            .await
        {
            return Err(self.fail(SessionStage::Submitting, PublishTimeout, e));
        }

        let url = match self
            .driver
            .landmark_attr(landmarks::CONFIRMATION_LINK, "href")
            .await
        {
            Ok(Some(url)) => url,
            Ok(None) => {
                return Err(self.fail(
                    SessionStage::Submitting,
                    PublishTimeout,
                    DriverError::Timeout(landmarks::CONFIRMATION_LINK.to_string()),
                ));
            }
            Err(e) => return Err(self.fail(SessionStage::Submitting, PublishTimeout, e)),
        };

        self.state = SessionState::Published;
        info!(design = %design.id, url, "published");
        Ok(url)
    }

    pub async fn close(&mut self) -> Result<(), DriverError> {
        self.driver.close().await
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use bp_core::{CanvasSpec, Design, DesignMetadata, DesignStatus, Prompt, RawImage, composite};

    use super::landmarks::*;
    use super::*;
    use crate::driver::testing::MockDriver;

    const WORK_URL: &str = "https://www.redbubble.com/people/test/works/1-cat";

    fn credentials() -> Credentials {
        Credentials {
            email: "artist@example.com".into(),
            password: "hunter2".into(),
        }
    }

    fn composited_design() -> Design {
        let raw = RawImage::new(
            RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255])),
            "test",
        );
        let prompt = Prompt::new("red circle", 1);
        let mut design = Design::new(prompt.clone(), DesignMetadata::derived(&prompt, 0));
        design.composite = Some(composite(&raw, CanvasSpec::new(16, 16)).unwrap());
        design.status = DesignStatus::Composited;
        design
    }

    #[tokio::test]
    async fn login_reaches_logged_in() {
        let mut session =
            UploadSession::new(MockDriver::with_confirmation_url(WORK_URL), credentials());
        session.login().await.unwrap();
        assert_eq!(*session.state(), SessionState::LoggedIn);
        let calls = &session.driver_ref().calls;
        assert!(calls.iter().any(|c| c.starts_with("goto https://")));
        assert!(calls.contains(&format!("wait {LOGGED_IN_HEADER}")));
    }

    #[tokio::test]
    async fn login_timeout_is_fatal() {
        let driver =
            MockDriver::with_confirmation_url(WORK_URL).never_shows(LOGGED_IN_HEADER);
        let mut session = UploadSession::new(driver, credentials());
        let err = session.login().await.unwrap_err();
        assert_eq!(err.stage, SessionStage::LoggingIn);
        assert_eq!(err.kind, SessionErrorKind::AuthTimeout);

        // the poisoned session refuses further publishing
        let err = session.publish(&composited_design()).await.unwrap_err();
        assert_eq!(err.stage, SessionStage::LoggingIn);
    }

    #[tokio::test]
    async fn publish_walks_the_form_and_returns_the_url() {
        let mut session =
            UploadSession::new(MockDriver::with_confirmation_url(WORK_URL), credentials());
        session.login().await.unwrap();

        let design = composited_design();
        let url = session.publish(&design).await.unwrap();
        assert_eq!(url, WORK_URL);
        assert_eq!(*session.state(), SessionState::Published);

        let calls = &session.driver_ref().calls;
        let fill_title = calls
            .iter()
            .position(|c| c.starts_with(&format!("fill {TITLE_FIELD}")))
            .unwrap();
        let attach = calls
            .iter()
            .position(|c| c.starts_with("attach design_"))
            .unwrap();
        let submit_click = calls
            .iter()
            .rposition(|c| c == &format!("click {FORM_SUBMIT}"))
            .unwrap();
        assert!(attach < fill_title, "file goes in before metadata");
        assert!(fill_title < submit_click, "metadata goes in before submit");
    }

    #[tokio::test]
    async fn missing_title_field_fails_at_form_ready() {
        let driver = MockDriver::with_confirmation_url(WORK_URL).never_shows(TITLE_FIELD);
        let mut session = UploadSession::new(driver, credentials());
        session.login().await.unwrap();

        let err = session.publish(&composited_design()).await.unwrap_err();
        assert_eq!(err.stage, SessionStage::FormReady);
        assert_eq!(err.kind, SessionErrorKind::PageLoadTimeout);
        assert_eq!(
            *session.state(),
            SessionState::Failed {
                stage: SessionStage::FormReady,
                reason: SessionErrorKind::PageLoadTimeout,
            }
        );
    }

    #[tokio::test]
    async fn session_survives_a_submit_timeout() {
        // first confirmation wait times out, the second succeeds
        let driver = MockDriver::with_confirmation_url(WORK_URL)
            .wait_outcomes(CONFIRMATION_LINK, &[false, true]);
        let mut session = UploadSession::new(driver, credentials());
        session.login().await.unwrap();

        let err = session.publish(&composited_design()).await.unwrap_err();
        assert_eq!(err.stage, SessionStage::Submitting);
        assert_eq!(err.kind, SessionErrorKind::PublishTimeout);

        let url = session.publish(&composited_design()).await.unwrap();
        assert_eq!(url, WORK_URL);
    }

    #[tokio::test]
    async fn publishing_without_login_is_refused() {
        let mut session =
            UploadSession::new(MockDriver::with_confirmation_url(WORK_URL), credentials());
        let err = session.publish(&composited_design()).await.unwrap_err();
        assert_eq!(err.stage, SessionStage::LoggingIn);
        assert!(session.driver_ref().calls.is_empty(), "nothing was driven");
    }

    #[tokio::test]
    async fn confirmation_without_href_counts_as_publish_timeout() {
        let mut session = UploadSession::new(MockDriver::default(), credentials());
        session.login().await.unwrap();
        let err = session.publish(&composited_design()).await.unwrap_err();
        assert_eq!(err.stage, SessionStage::Submitting);
        assert_eq!(err.kind, SessionErrorKind::PublishTimeout);
    }
}
