//! Error types for the roamwatch tracker
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for roamwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the roamwatch tracker
#[derive(Error, Debug)]
pub enum Error {
    /// Controller unreachable, timed out, or returned an unusable response.
    /// A reconciliation cycle that hits this aborts without mutating state.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// MAC address input that cannot be normalized
    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),

    /// Registration conflict: the MAC is already tracked
    #[error("Device already tracked: {0}")]
    DuplicateDevice(String),

    /// Device, history, AP, or endpoint not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Commit or load failure in the device store
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Webhook or broadcast delivery failure (never fatal)
    #[error("Delivery failure: {0}")]
    Delivery(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Controller rejected the credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an upstream-unavailable error
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }

    /// Create an invalid MAC error
    pub fn invalid_mac(msg: impl Into<String>) -> Self {
        Self::InvalidMac(msg.into())
    }

    /// Create a duplicate device error
    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::DuplicateDevice(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a delivery error
    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// An equivalent error for a second observer of the same failure.
    ///
    /// Variants wrapping non-`Clone` sources are carried as `Other`.
    pub fn reissue(&self) -> Self {
        match self {
            Self::UpstreamUnavailable(m) => Self::UpstreamUnavailable(m.clone()),
            Self::InvalidMac(m) => Self::InvalidMac(m.clone()),
            Self::DuplicateDevice(m) => Self::DuplicateDevice(m.clone()),
            Self::NotFound(m) => Self::NotFound(m.clone()),
            Self::Persistence(m) => Self::Persistence(m.clone()),
            Self::Delivery(m) => Self::Delivery(m.clone()),
            Self::Config(m) => Self::Config(m.clone()),
            Self::Authentication(m) => Self::Authentication(m.clone()),
            Self::InvalidInput(m) => Self::InvalidInput(m.clone()),
            Self::Io(e) => Self::Other(format!("I/O error: {}", e)),
            Self::Json(e) => Self::Other(format!("JSON error: {}", e)),
            Self::Other(m) => Self::Other(m.clone()),
        }
    }

    /// True for failures of the shared upstream fetch.
    ///
    /// Authentication failures count: the next tick reconnects.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable(_) | Self::Authentication(_)
        )
    }

    /// True for errors caused by caller input, surfaced as structured errors
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMac(_) | Self::DuplicateDevice(_) | Self::NotFound(_) | Self::InvalidInput(_)
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_classification() {
        assert!(Error::upstream("down").is_upstream());
        assert!(Error::auth("bad password").is_upstream());
        assert!(!Error::persistence("disk full").is_upstream());
    }

    #[test]
    fn user_error_classification() {
        assert!(Error::invalid_mac("zz").is_user_error());
        assert!(Error::duplicate("aa:bb:cc:dd:ee:ff").is_user_error());
        assert!(!Error::delivery("503").is_user_error());
    }

    #[test]
    fn reissue_keeps_classification() {
        let original = Error::upstream("controller fetch exceeded 30s");
        let copy = original.reissue();
        assert!(copy.is_upstream());
        assert_eq!(copy.to_string(), original.to_string());
    }
}
