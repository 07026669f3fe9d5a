//! Typed errors for the chatter's component seams.
//!
//! Binaries wrap all of these in `eyre::Report`.

use thiserror::Error;

/// Failures of the chat connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Bad or expired credentials. Retrying without new credentials is pointless.
    #[error("chat authentication failed: {0}")]
    Auth(String),

    /// Transient transport trouble, `connect` may be retried.
    #[error("chat network error: {0}")]
    Network(String),

    /// A message was sent while there was no live connection.
    #[error("not connected to chat")]
    NotConnected,
}

impl ChatError {
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth(reason.into())
    }

    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network(reason.into())
    }

    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// The telemetry source couldn't be subscribed to. Fatal until the listener is re-initialised.
#[derive(Debug, Error)]
pub enum ListenerSetupError {
    #[error("couldn't open telemetry socket {path}: {source}")]
    Socket {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("telemetry source refused the required features: {0}")]
    FeaturesRejected(String),

    #[error("telemetry handshake failed: {0}")]
    Handshake(String),
}

impl ListenerSetupError {
    pub fn socket(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Self::Socket {
            path: path.into(),
            source,
        }
    }
}

/// A malformed bot configuration, rejected before it can become active.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid `{field}`: {reason}")]
pub struct InvalidConfigurationError {
    pub field: &'static str,
    pub reason: String,
}

impl InvalidConfigurationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Failures of the settings store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error(transparent)]
    Invalid(#[from] InvalidConfigurationError),

    #[error("no configuration exists to update")]
    NoConfiguration,
}
