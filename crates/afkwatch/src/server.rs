//! `AfkProxy` builder, proxy loop and handle.
//!
//! ```text
//!  NodeListener ──TransportEvent──┐
//!                                 ├──▶ proxy loop (owns ProxyCore) ──▶ node links
//!  ProxyHandle ───ProxyInput──────┤
//!                                 │
//!  TickScheduler ──sweep──────────┘
//! ```
//!
//! The loop is the only owner of the registry, the tracker and the node
//! links. Everything else talks to it through bounded queues.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use afkwatch_protocol::{ActivityKind, EventKind, NodeId, NodeRole, PlayerId, now_millis};
use afkwatch_tick::{TickConfig, TickScheduler};
use afkwatch_tracker::{AfkPolicy, PlayerStatus};
use afkwatch_transport::{CommandSink, NodeListener, TransportError, TransportEvent};
use tokio::sync::{mpsc, oneshot};

use crate::{AfkConfig, AfkError, ConfigError, NodeEvent, ProxyCore, RoutingError};

/// What a [`ProxyHandle`] can ask of the proxy loop.
enum ProxyInput {
    Report(NodeEvent),
    Status {
        player: PlayerId,
        reply: oneshot::Sender<Option<PlayerStatus>>,
    },
    SetAfk {
        player: PlayerId,
        reply: oneshot::Sender<Result<bool, RoutingError>>,
    },
    ReloadPolicy {
        policy: AfkPolicy,
        reply: oneshot::Sender<Result<(), ConfigError>>,
    },
    Shutdown,
}

/// Builder for configuring and starting a proxy.
///
/// # Example
///
/// ```rust,ignore
/// use afkwatch::prelude::*;
///
/// let proxy = AfkProxy::builder()
///     .config(AfkConfig::load("afkwatch.json")?)
///     .local_node(NodeId::new("proxy"), NodeRole::Game, Arc::new(|cmd| println!("{cmd:?}")))
///     .build()
///     .await?;
/// let handle = proxy.handle();
/// tokio::spawn(proxy.run());
/// ```
pub struct AfkProxyBuilder {
    config: AfkConfig,
    local_nodes: Vec<(NodeId, NodeRole, Arc<dyn CommandSink>)>,
}

impl AfkProxyBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: AfkConfig::default(),
            local_nodes: Vec::new(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: AfkConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address node connections are accepted on.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Adds a node served inside this process. Its players are reported
    /// through [`ProxyHandle`] and its commands go to `sink`.
    pub fn local_node(mut self, node: NodeId, role: NodeRole, sink: Arc<dyn CommandSink>) -> Self {
        self.local_nodes.push((node, role, sink));
        self
    }

    /// Validates the configuration and binds the listener.
    pub async fn build(self) -> Result<AfkProxy, AfkError> {
        let config = self.config;
        config.validate()?;

        let (transport_tx, transport_rx) = mpsc::channel(config.input_queue);
        let listener =
            NodeListener::bind(&config.bind_addr, config.transport(), transport_tx).await?;

        let mut core = ProxyCore::new(config.policy(), config.registry());
        for (node, role, sink) in self.local_nodes {
            core.add_local_node(node, role, sink);
        }

        let (input_tx, input_rx) = mpsc::channel(config.input_queue);

        Ok(AfkProxy {
            listener,
            core,
            transport_rx,
            input_rx,
            handle: ProxyHandle { input: input_tx },
            sweep: config.tick(),
        })
    }
}

impl Default for AfkProxyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound proxy, ready to [`run`](Self::run).
pub struct AfkProxy {
    listener: NodeListener,
    core: ProxyCore,
    transport_rx: mpsc::Receiver<TransportEvent>,
    input_rx: mpsc::Receiver<ProxyInput>,
    handle: ProxyHandle,
    sweep: TickConfig,
}

impl AfkProxy {
    /// Creates a new builder.
    pub fn builder() -> AfkProxyBuilder {
        AfkProxyBuilder::new()
    }

    /// Returns the local address nodes connect to.
    pub fn local_addr(&self) -> Result<SocketAddr, AfkError> {
        Ok(self.listener.local_addr()?)
    }

    /// A handle for local reports, status queries and shutdown.
    pub fn handle(&self) -> ProxyHandle {
        self.handle.clone()
    }

    /// Runs the proxy loop until [`ProxyHandle::shutdown`] is called.
    ///
    /// Dropping out of the loop drops every node link, which closes the
    /// node connections.
    pub async fn run(self) -> Result<(), AfkError> {
        let Self {
            listener,
            mut core,
            mut transport_rx,
            mut input_rx,
            handle,
            sweep,
        } = self;
        // Handles given out keep the input queue open; this one must not.
        drop(handle);

        let addr = listener.local_addr()?;
        let accept = tokio::spawn(listener.run());
        let mut sweeps = TickScheduler::new(sweep);
        tracing::info!(%addr, "afkwatch proxy running");

        loop {
            tokio::select! {
                Some(event) = transport_rx.recv() => core.on_transport(event),
                Some(input) = input_rx.recv() => match input {
                    ProxyInput::Report(event) => core.on_node_event(event),
                    ProxyInput::Status { player, reply } => {
                        let _ = reply.send(core.status(player, now_millis()));
                    }
                    ProxyInput::SetAfk { player, reply } => {
                        let _ = reply.send(core.set_afk(player, now_millis()));
                    }
                    ProxyInput::ReloadPolicy { policy, reply } => {
                        let result = check_sweep_interval(&policy, sweeps.interval())
                            .and_then(|()| core.reload_policy(policy).map_err(ConfigError::from));
                        let _ = reply.send(result);
                    }
                    ProxyInput::Shutdown => break,
                },
                _ = sweeps.wait_for_tick() => {
                    core.sweep(now_millis());
                    sweeps.record_tick_end();
                }
            }
        }

        tracing::info!(sweeps = sweeps.tick_count(), "afkwatch proxy stopping");
        drop(core);
        accept.abort();
        Ok(())
    }
}

/// A sweep must run more often than the idle threshold, or warnings would
/// be skipped.
fn check_sweep_interval(policy: &AfkPolicy, sweep: Duration) -> Result<(), ConfigError> {
    if sweep >= policy.idle_threshold {
        return Err(ConfigError::Invalid(format!(
            "idle threshold ({:?}) must be longer than the sweep interval ({sweep:?})",
            policy.idle_threshold
        )));
    }
    Ok(())
}

/// Cloneable handle to a running proxy.
///
/// Reports are non-blocking and fail with `QueueFull` when the proxy loop
/// is behind, or `Shutdown` once it has stopped.
#[derive(Clone)]
pub struct ProxyHandle {
    input: mpsc::Sender<ProxyInput>,
}

impl ProxyHandle {
    pub fn report_activity(
        &self,
        player: PlayerId,
        node: NodeId,
        timestamp: u64,
        kind: ActivityKind,
    ) -> Result<(), AfkError> {
        self.report(NodeEvent::new(node, player, timestamp, EventKind::Activity(kind)))
    }

    pub fn report_join(&self, player: PlayerId, node: NodeId, timestamp: u64) -> Result<(), AfkError> {
        self.report(NodeEvent::new(node, player, timestamp, EventKind::Join))
    }

    pub fn report_switch(&self, player: PlayerId, node: NodeId, timestamp: u64) -> Result<(), AfkError> {
        self.report(NodeEvent::new(node, player, timestamp, EventKind::SwitchNode))
    }

    pub fn report_leave(&self, player: PlayerId, node: NodeId, timestamp: u64) -> Result<(), AfkError> {
        self.report(NodeEvent::new(node, player, timestamp, EventKind::Leave))
    }

    fn report(&self, event: NodeEvent) -> Result<(), AfkError> {
        self.input
            .try_send(ProxyInput::Report(event))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => TransportError::Shutdown,
            })?;
        Ok(())
    }

    /// Current AFK status of `player`, or `None` if they have no session.
    pub async fn status(&self, player: PlayerId) -> Result<Option<PlayerStatus>, AfkError> {
        let (reply, rx) = oneshot::channel();
        self.request(ProxyInput::Status { player, reply }).await?;
        Ok(rx.await.map_err(|_| TransportError::Shutdown)?)
    }

    /// Marks `player` AFK now (an `/afk` command) and applies the AFK
    /// action. `Ok(false)` means there was nothing to do: the player is
    /// already AFK or on a node with AFK checks disabled.
    pub async fn set_afk(&self, player: PlayerId) -> Result<bool, AfkError> {
        let (reply, rx) = oneshot::channel();
        self.request(ProxyInput::SetAfk { player, reply }).await?;
        Ok(rx.await.map_err(|_| TransportError::Shutdown)??)
    }

    /// Swaps the AFK policy. Applies from the next sweep. Rejected if the
    /// policy is invalid or its idle threshold is not longer than the
    /// running sweep interval.
    pub async fn reload_policy(&self, policy: AfkPolicy) -> Result<(), AfkError> {
        let (reply, rx) = oneshot::channel();
        self.request(ProxyInput::ReloadPolicy { policy, reply }).await?;
        rx.await.map_err(|_| TransportError::Shutdown)??;
        Ok(())
    }

    /// Stops the proxy loop. Returns once the request is queued.
    pub async fn shutdown(&self) {
        let _ = self.input.send(ProxyInput::Shutdown).await;
    }

    async fn request(&self, input: ProxyInput) -> Result<(), AfkError> {
        self.input
            .send(input)
            .await
            .map_err(|_| TransportError::Shutdown)?;
        Ok(())
    }
}
