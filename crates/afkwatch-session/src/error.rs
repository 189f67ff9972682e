//! Error types for the session layer.

use afkwatch_protocol::PlayerId;

/// Errors that can occur during session lookups.
///
/// Membership changes never fail: races and duplicates are reported as
/// [`Membership`](crate::Membership) outcomes instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No session exists for the given player. Callers treat this as
    /// "no safe target" and drop whatever they wanted to send.
    #[error("session not found for player {0}")]
    NotFound(PlayerId),
}
