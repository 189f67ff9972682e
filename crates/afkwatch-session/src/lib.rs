//! Player session registry for afkwatch.
//!
//! Answers one question for the rest of the proxy: which backend node is
//! hosting this player right now? It also stores the per-player AFK fields
//! the tracker reads and writes.
//!
//! # How it fits in the stack
//!
//! ```text
//! Tracker (above)   ← reads/writes AFK fields on PlayerSession
//!     ↕
//! Session Layer (this crate)  ← player → host mapping, tombstones
//!     ↕
//! Protocol Layer (below)  ← provides PlayerId, NodeId
//! ```

mod error;
mod registry;
mod session;

pub use error::SessionError;
pub use registry::{Membership, SessionRegistry};
pub use session::{AfkState, Host, PlayerSession, RegistryConfig};
