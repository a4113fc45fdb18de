use std::fmt;

use thiserror::Error;

/// Classification of a generation-backend failure. Only the transient
/// kinds participate in the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    RateLimited,
    AuthFailed,
    BadResponse,
    NetworkError,
}

impl ProviderErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(self, Self::RateLimited | Self::NetworkError)
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RateLimited => "rate limited",
            Self::AuthFailed => "auth failed",
            Self::BadResponse => "bad response",
            Self::NetworkError => "network error",
        })
    }
}

#[derive(Debug, Clone, Error)]
#[error("{provider}: {kind}: {message}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: &str, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            kind,
            message: message.into(),
        }
    }
}

/// Failure surfaced by the browser-driving adapter.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("timed out waiting for `{0}`")]
    Timeout(String),

    #[error("navigation to {0} failed: {1}")]
    Navigation(String, String),

    #[error("interaction with `{0}` failed: {1}")]
    Interaction(String, String),
}

/// Where in the upload sequence a session failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    LoggingIn,
    FormReady,
    FilePicked,
    MetadataFilled,
    Submitting,
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LoggingIn => "LoggingIn",
            Self::FormReady => "FormReady",
            Self::FilePicked => "FilePicked",
            Self::MetadataFilled => "MetadataFilled",
            Self::Submitting => "Submitting",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    AuthTimeout,
    PageLoadTimeout,
    PublishTimeout,
    /// Non-timeout driver failure: element vanished, connection dropped.
    Driver,
}

impl fmt::Display for SessionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AuthTimeout => "AuthTimeout",
            Self::PageLoadTimeout => "PageLoadTimeout",
            Self::PublishTimeout => "PublishTimeout",
            Self::Driver => "Driver",
        })
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind} during {stage}: {message}")]
pub struct SessionError {
    pub stage: SessionStage,
    pub kind: SessionErrorKind,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limit_and_network_are_transient() {
        assert!(ProviderErrorKind::RateLimited.is_transient());
        assert!(ProviderErrorKind::NetworkError.is_transient());
        assert!(!ProviderErrorKind::AuthFailed.is_transient());
        assert!(!ProviderErrorKind::BadResponse.is_transient());
    }
}
