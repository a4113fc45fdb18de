//! Capability surface the upload session needs from a browser. Keeping it
//! this narrow lets tests script the remote form and keeps the concrete
//! automation engine swappable.

pub mod webdriver;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::DriverError;

#[async_trait]
pub trait RemoteFormDriver: Send {
    async fn goto(&mut self, url: &str) -> Result<(), DriverError>;

    /// Clear the field and type `value` into it.
    async fn fill_field(&mut self, selector: &str, value: &str) -> Result<(), DriverError>;

    /// Hand `bytes` to a file input as an upload named `file_name`.
    async fn attach_file(
        &mut self,
        selector: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<(), DriverError>;

    async fn click(&mut self, selector: &str) -> Result<(), DriverError>;

    /// Poll until the element is present and displayed, or the deadline
    /// passes. Never blocks past `timeout`.
    async fn wait_for_landmark(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// Read an attribute off an element that is already present.
    async fn landmark_attr(
        &mut self,
        selector: &str,
        attr: &str,
    ) -> Result<Option<String>, DriverError>;

    async fn close(&mut self) -> Result<(), DriverError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::RemoteFormDriver;
    use crate::error::DriverError;

    /// Scripted driver for exercising the session without a browser.
    #[derive(Default)]
    pub(crate) struct MockDriver {
        /// Selectors that never become available.
        pub missing: HashSet<String>,
        /// Per-selector wait outcomes, consumed front to back; an
        /// exhausted script falls through to `missing`.
        pub wait_script: HashMap<String, VecDeque<bool>>,
        /// Attribute values served by `landmark_attr`, keyed by
        /// (selector, attribute).
        pub attrs: HashMap<(String, String), String>,
        /// Every driver call, in order, for assertions.
        pub calls: Vec<String>,
    }

    impl MockDriver {
        pub fn with_confirmation_url(url: &str) -> Self {
            let mut driver = Self::default();
            driver.attrs.insert(
                (
                    crate::session::landmarks::CONFIRMATION_LINK.to_string(),
                    "href".to_string(),
                ),
                url.to_string(),
            );
            driver
        }

        pub fn never_shows(mut self, selector: &str) -> Self {
            self.missing.insert(selector.to_string());
            self
        }

        pub fn wait_outcomes(mut self, selector: &str, outcomes: &[bool]) -> Self {
            self.wait_script
                .insert(selector.to_string(), outcomes.iter().copied().collect());
            self
        }
    }

    #[async_trait]
    impl RemoteFormDriver for MockDriver {
        async fn goto(&mut self, url: &str) -> Result<(), DriverError> {
            self.calls.push(format!("goto {url}"));
            Ok(())
        }

        async fn fill_field(&mut self, selector: &str, value: &str) -> Result<(), DriverError> {
            self.calls.push(format!("fill {selector} = {value}"));
            Ok(())
        }

        async fn attach_file(
            &mut self,
            _selector: &str,
            file_name: &str,
            bytes: &[u8],
        ) -> Result<(), DriverError> {
            self.calls
                .push(format!("attach {file_name} ({} bytes)", bytes.len()));
            Ok(())
        }

        async fn click(&mut self, selector: &str) -> Result<(), DriverError> {
            self.calls.push(format!("click {selector}"));
            Ok(())
        }

        async fn wait_for_landmark(
            &mut self,
            selector: &str,
            _timeout: Duration,
        ) -> Result<(), DriverError> {
            self.calls.push(format!("wait {selector}"));
            if let Some(script) = self.wait_script.get_mut(selector) {
                if let Some(ok) = script.pop_front() {
                    return if ok {
                        Ok(())
                    } else {
                        Err(DriverError::Timeout(selector.to_string()))
                    };
                }
            }
            if self.missing.contains(selector) {
                return Err(DriverError::Timeout(selector.to_string()));
            }
            Ok(())
        }

        async fn landmark_attr(
            &mut self,
            selector: &str,
            attr: &str,
        ) -> Result<Option<String>, DriverError> {
            Ok(self
                .attrs
                .get(&(selector.to_string(), attr.to_string()))
                .cloned())
        }

        async fn close(&mut self) -> Result<(), DriverError> {
            self.calls.push("close".to_string());
            Ok(())
        }
    }
}
