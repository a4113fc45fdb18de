//! WebDriver binding for the form driver, via fantoccini.

use std::io::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder, Locator};
use tempfile::NamedTempFile;
use tracing::debug;

use super::RemoteFormDriver;
use crate::error::DriverError;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct WebDriverForm {
    client: Client,
    /// Staged upload files; they must outlive the submit that reads them.
    staged: Vec<NamedTempFile>,
}

impl WebDriverForm {
    pub async fn connect(webdriver_url: &str) -> Result<Self, DriverError> {
        let client = ClientBuilder::native()
            .connect(webdriver_url)
            .await
            .map_err(|e| DriverError::Navigation(webdriver_url.to_string(), e.to_string()))?;
        debug!(webdriver_url, "connected to the browser");
        Ok(Self {
            client,
            staged: Vec::new(),
        })
    }

    fn interaction(selector: &str, e: impl std::fmt::Display) -> DriverError {
        DriverError::Interaction(selector.to_string(), e.to_string())
    }
}

#[async_trait]
impl RemoteFormDriver for WebDriverForm {
    async fn goto(&mut self, url: &str) -> Result<(), DriverError> {
        self.client
            .goto(url)
            .await
            .map_err(|e| DriverError::Navigation(url.to_string(), e.to_string()))
    }

    async fn fill_field(&mut self, selector: &str, value: &str) -> Result<(), DriverError> {
        let element = self
            .client
            .find(Locator::Css(selector))
            .await
            .map_err(|e| Self::interaction(selector, e))?;
        element
            .clear()
            .await
            .map_err(|e| Self::interaction(selector, e))?;
        element
            .send_keys(value)
            .await
            .map_err(|e| Self::interaction(selector, e))
    }

    async fn attach_file(
        &mut self,
        selector: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<(), DriverError> {
        let mut file = NamedTempFile::new()
            .and_then(|mut f| f.write_all(bytes).map(|_| f))
            .map_err(|e| Self::interaction(selector, format!("staging {file_name}: {e}")))?;
        file.flush()
            .map_err(|e| Self::interaction(selector, format!("staging {file_name}: {e}")))?;

        let path = file.path().to_string_lossy().into_owned();
        let input = self
            .client
            .find(Locator::Css(selector))
            .await
            .map_err(|e| Self::interaction(selector, e))?;
        input
            .send_keys(&path)
            .await
            .map_err(|e| Self::interaction(selector, e))?;

        self.staged.push(file);
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
        let element = self
            .client
            .find(Locator::Css(selector))
            .await
            .map_err(|e| Self::interaction(selector, e))?;
        element
            .click()
            .await
            .map_err(|e| Self::interaction(selector, e))
    }

    async fn wait_for_landmark(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(element) = self.client.find(Locator::Css(selector)).await {
                if element.is_displayed().await.unwrap_or(false) {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::Timeout(selector.to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn landmark_attr(
        &mut self,
        selector: &str,
        attr: &str,
    ) -> Result<Option<String>, DriverError> {
        let element = self
            .client
            .find(Locator::Css(selector))
            .await
            .map_err(|e| Self::interaction(selector, e))?;
        element
            .attr(attr)
            .await
            .map_err(|e| Self::interaction(selector, e))
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.staged.clear();
        self.client
            .clone()
            .close()
            .await
            .map_err(|e| DriverError::Interaction("session".to_string(), e.to_string()))
    }
}
