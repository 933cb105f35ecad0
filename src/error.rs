//! Error types for the portal client and the webhook notifier

use reqwest::StatusCode;

/// Failure talking to the portal.
///
/// A portal that answers but rejects the credentials is not an error: that
/// case is carried by [`crate::models::LoginOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    /// Timeout, DNS failure, refused connection
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Body did not unwrap to valid JSON
    #[error("failed to parse portal response: {reason}, content: {body}")]
    Protocol { reason: String, body: String },

    /// Neither user-info schema carried any data
    #[error("portal returned no usable user info")]
    EmptyStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook returned status {0}")]
    Status(StatusCode),
}
