//! # afkwatch
//!
//! Proxy-side AFK detection for a network of backend game servers.
//!
//! Backend nodes report player activity and membership over a small binary
//! protocol; the proxy tracks who is hosted where, decides when a player is
//! idle or AFK, and sends the resulting command back to the node that
//! currently hosts them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use afkwatch::prelude::*;
//!
//! # async fn start() -> Result<(), AfkError> {
//! let proxy = AfkProxy::builder()
//!     .config(AfkConfig::from_json_str(r#"{"bind_addr": "0.0.0.0:9000"}"#)?)
//!     .build()
//!     .await?;
//! proxy.run().await
//! # }
//! ```
//!
//! A backend node connects with [`NodeClient`](afkwatch_transport::NodeClient)
//! and receives commands through a [`CommandSink`](afkwatch_transport::CommandSink).

mod config;
mod dispatcher;
mod error;
mod proxy;
mod server;

pub use config::AfkConfig;
pub use dispatcher::{CommandDispatcher, NodeLink, Outbound, RoutingError};
pub use error::{AfkError, ConfigError};
pub use proxy::{NodeEvent, ProxyCore};
pub use server::{AfkProxy, AfkProxyBuilder, ProxyHandle};

/// Re-exports of the afkwatch crates.
pub use afkwatch_protocol as protocol;
pub use afkwatch_session as session;
pub use afkwatch_tracker as tracker;
pub use afkwatch_transport as transport;

pub mod prelude {
    //! Everything a proxy or node adapter typically needs.

    pub use crate::{AfkConfig, AfkError, AfkProxy, AfkProxyBuilder, ProxyHandle, RoutingError};
    pub use afkwatch_protocol::{
        ActivityKind, Command, CommandAction, NodeId, NodeRole, PlayerId, now_millis,
    };
    pub use afkwatch_session::{AfkState, Host};
    pub use afkwatch_tracker::{AfkAction, AfkPolicy, PlayerStatus};
    pub use afkwatch_transport::{CommandSink, Liveness, NodeClient, TransportConfig};
}
