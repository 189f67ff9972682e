//! AFK tracking for afkwatch.
//!
//! Turns a stream of activity timestamps into `WARN`, `TELEPORT_LIMBO`,
//! `DISCONNECT` and `CLEAR_STATE` commands according to an [`AfkPolicy`].
//!
//! # Key types
//!
//! - [`AfkPolicy`]: thresholds, messages and the AFK action
//! - [`AfkTracker`]: the per-player state machine and periodic sweep
//! - [`PlayerStatus`]: read-only snapshot for adapters
//!
//! The tracker is pure: it reads and writes [`PlayerSession`] fields and
//! returns commands, but never sends anything. Routing is the caller's job.
//!
//! [`PlayerSession`]: afkwatch_session::PlayerSession

mod error;
mod policy;
mod tracker;

pub use error::PolicyError;
pub use policy::{AfkAction, AfkPolicy};
pub use tracker::{AfkTracker, PlayerStatus};
