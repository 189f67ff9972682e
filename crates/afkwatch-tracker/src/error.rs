use std::time::Duration;

/// Reasons an [`AfkPolicy`](crate::AfkPolicy) is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// A threshold is zero.
    #[error("{0} must be greater than zero")]
    ZeroThreshold(&'static str),

    /// The AFK threshold does not come after the idle threshold.
    #[error("afk threshold ({afk:?}) must be greater than idle threshold ({idle:?})")]
    ThresholdOrder { idle: Duration, afk: Duration },

    /// The limbo node name is unusable.
    #[error("invalid limbo node name: {0}")]
    InvalidLimbo(String),
}
