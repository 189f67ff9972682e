//! Unified error type for afkwatch.

use std::path::PathBuf;

use afkwatch_protocol::ProtocolError;
use afkwatch_session::SessionError;
use afkwatch_tracker::PolicyError;
use afkwatch_transport::TransportError;

use crate::RoutingError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum AfkError {
    /// Connection-level failure (bind, send, receive).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encode, decode or handshake failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Registry lookup failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A command could not be delivered.
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// Bad configuration or a rejected policy reload.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Problems loading or validating an [`AfkConfig`](crate::AfkConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid afk policy: {0}")]
    Policy(#[from] PolicyError),
}

impl From<PolicyError> for AfkError {
    fn from(e: PolicyError) -> Self {
        Self::Config(ConfigError::Policy(e))
    }
}

#[cfg(test)]
mod tests {
    use afkwatch_protocol::PlayerId;

    use super::*;

    #[test]
    fn test_from_transport_error_is_transparent() {
        let err = TransportError::ConnectionClosed("gone".into());
        let afk_err: AfkError = err.into();
        assert!(matches!(afk_err, AfkError::Transport(_)));
        assert!(afk_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_session_error_wraps() {
        let err = SessionError::NotFound(PlayerId::from_u128(1));
        let afk_err: AfkError = err.into();
        assert!(matches!(afk_err, AfkError::Session(_)));
    }

    #[test]
    fn test_from_routing_error_wraps() {
        let err = RoutingError::UnknownPlayer(PlayerId::from_u128(1));
        let afk_err: AfkError = err.into();
        assert!(matches!(afk_err, AfkError::Routing(_)));
    }

    #[test]
    fn test_from_policy_error_lands_in_config() {
        let err = PolicyError::ZeroThreshold("idle threshold");
        let afk_err: AfkError = err.into();
        assert!(matches!(afk_err, AfkError::Config(ConfigError::Policy(_))));
        assert!(afk_err.to_string().contains("idle threshold"));
    }
}
