//! Node side: the outbound link from a backend node to the proxy.
//!
//! [`NodeClient::spawn`] starts a background task that connects, sends
//! HELLO, re-announces the node's hosted players, and then multiplexes
//! reports, heartbeats and incoming commands until the link drops. It then
//! reconnects with [`Backoff`].
//!
//! Re-announcements carry the timestamps the node originally reported, so
//! a player who has since moved to another node loses the newest-wins race
//! in the proxy registry instead of being pulled back.
//!
//! ```text
//! report_*() ─try_send─▶ reports queue ─▶ ┌──────────────┐ ─▶ proxy
//!                                         │ link task    │
//! CommandSink::on_command ◀───────────────│  (reconnect) │ ◀─ proxy
//! liveness() ◀── watch ───────────────────└──────────────┘
//! ```
//!
//! While the link is down every report fails fast with `NotConnected` and
//! no AFK command can arrive, so the node simply does nothing AFK-related
//! until the proxy is reachable again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use afkwatch_protocol::{
    ActivityKind, Command, CommandAction, Event, EventKind, Message, NodeId, NodeRole,
    PlayerId, ProtocolError, now_millis,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::backoff::Backoff;
use crate::framed::{FrameReader, FrameWriter};
use crate::heartbeat::{HeartbeatMonitor, Liveness};
use crate::{TransportConfig, TransportError};

/// Receives commands addressed to players.
///
/// Implemented for any `Fn(Command)` closure, so a sink can be as small as
/// `Arc::new(|cmd| println!("{cmd:?}"))`.
pub trait CommandSink: Send + Sync + 'static {
    fn on_command(&self, command: Command);
}

impl<F> CommandSink for F
where
    F: Fn(Command) + Send + Sync + 'static,
{
    fn on_command(&self, command: Command) {
        self(command)
    }
}

/// A report waiting for the link task to stamp it with a sequence number.
#[derive(Debug)]
struct Report {
    player: PlayerId,
    timestamp: u64,
    kind: EventKind,
}

/// What the node last told the proxy about a player it hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HostedPlayer {
    /// Timestamp of the JOIN or SWITCH_NODE that brought the player here.
    arrived: u64,
    /// Newest reported activity (or `arrived`).
    last_activity: u64,
}

type Hosted = Arc<Mutex<HashMap<PlayerId, HostedPlayer>>>;

fn lock(hosted: &Hosted) -> MutexGuard<'_, HashMap<PlayerId, HostedPlayer>> {
    // The map holds plain values; a panic mid-update cannot leave it invalid.
    hosted.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a node's link to the proxy.
pub struct NodeClient {
    node: NodeId,
    reports: mpsc::Sender<Report>,
    hosted: Hosted,
    liveness: watch::Receiver<Liveness>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl NodeClient {
    /// Starts the link task. Returns immediately; the first connection
    /// attempt happens in the background.
    ///
    /// Fails only if `config` does not validate.
    pub fn spawn(
        proxy_addr: impl Into<String>,
        node: NodeId,
        role: NodeRole,
        config: TransportConfig,
        sink: Arc<dyn CommandSink>,
    ) -> Result<Self, TransportError> {
        config.validate()?;
        let (reports_tx, reports_rx) = mpsc::channel(config.outbound_queue);
        let (liveness_tx, liveness_rx) = watch::channel(Liveness::Degraded);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let hosted: Hosted = Arc::default();

        let link = Link {
            addr: proxy_addr.into(),
            node: node.clone(),
            role,
            config,
            sink,
            reports: reports_rx,
            hosted: Arc::clone(&hosted),
            liveness: liveness_tx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(link.run());

        Ok(Self {
            node,
            reports: reports_tx,
            hosted,
            liveness: liveness_rx,
            shutdown: shutdown_tx,
            task,
        })
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Watch of the link state. Starts `Degraded` until the first handshake.
    pub fn liveness(&self) -> watch::Receiver<Liveness> {
        self.liveness.clone()
    }

    pub fn is_connected(&self) -> bool {
        *self.liveness.borrow() == Liveness::Connected
    }

    /// Players this node currently hosts (re-announced on every connect),
    /// sorted.
    pub fn hosted_players(&self) -> Vec<PlayerId> {
        let mut players: Vec<PlayerId> = lock(&self.hosted).keys().copied().collect();
        players.sort();
        players
    }

    pub fn report_activity(
        &self,
        player: PlayerId,
        timestamp: u64,
        kind: ActivityKind,
    ) -> Result<(), TransportError> {
        if let Some(hosted) = lock(&self.hosted).get_mut(&player) {
            hosted.last_activity = hosted.last_activity.max(timestamp);
        }
        self.submit(player, timestamp, EventKind::Activity(kind))
    }

    pub fn report_join(&self, player: PlayerId, timestamp: u64) -> Result<(), TransportError> {
        self.arrive(player, timestamp);
        self.submit(player, timestamp, EventKind::Join)
    }

    pub fn report_switch(&self, player: PlayerId, timestamp: u64) -> Result<(), TransportError> {
        self.arrive(player, timestamp);
        self.submit(player, timestamp, EventKind::SwitchNode)
    }

    pub fn report_leave(&self, player: PlayerId, timestamp: u64) -> Result<(), TransportError> {
        lock(&self.hosted).remove(&player);
        self.submit(player, timestamp, EventKind::Leave)
    }

    /// Stops re-announcing `player` without telling the proxy anything.
    ///
    /// For players that left this node on their own (moved by the network
    /// layer, or the LEAVE could not be sent). TELEPORT_LIMBO, DISCONNECT
    /// and a returning CLEAR_STATE forget their target automatically.
    /// Returns `true` if the player was hosted.
    pub fn forget(&self, player: PlayerId) -> bool {
        lock(&self.hosted).remove(&player).is_some()
    }

    fn arrive(&self, player: PlayerId, timestamp: u64) {
        lock(&self.hosted).insert(
            player,
            HostedPlayer {
                arrived: timestamp,
                last_activity: timestamp,
            },
        );
    }

    /// Stops the link task and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    fn submit(
        &self,
        player: PlayerId,
        timestamp: u64,
        kind: EventKind,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.reports
            .try_send(Report {
                player,
                timestamp,
                kind,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => TransportError::Shutdown,
            })
    }
}

/// State owned by the background link task.
struct Link {
    addr: String,
    node: NodeId,
    role: NodeRole,
    config: TransportConfig,
    sink: Arc<dyn CommandSink>,
    reports: mpsc::Receiver<Report>,
    hosted: Hosted,
    liveness: watch::Sender<Liveness>,
    shutdown: watch::Receiver<bool>,
}

/// How one connection ended.
enum LinkEnd {
    Shutdown,
    Lost(TransportError),
}

impl Link {
    async fn run(mut self) {
        let mut backoff = Backoff::new(self.config.backoff.clone());

        loop {
            let connect = tokio::time::timeout(
                self.config.handshake_timeout,
                TcpStream::connect(self.addr.as_str()),
            );
            let attempt = tokio::select! {
                attempt = connect => attempt,
                _ = self.shutdown.changed() => break,
            };

            match attempt {
                Ok(Ok(stream)) => {
                    backoff.mark_live(Instant::now());
                    let end = self.serve(stream).await;
                    backoff.mark_down(Instant::now());
                    self.liveness.send_replace(Liveness::Degraded);
                    match end {
                        LinkEnd::Shutdown => break,
                        LinkEnd::Lost(e) => {
                            tracing::warn!(node = %self.node, error = %e, "link to proxy lost");
                        }
                    }
                }
                Ok(Err(e)) => {
                    let e = TransportError::ConnectFailed(e);
                    tracing::debug!(node = %self.node, addr = %self.addr, error = %e, "connect failed");
                }
                Err(_) => {
                    tracing::debug!(node = %self.node, addr = %self.addr, "connect timed out");
                }
            }

            let delay = backoff.next_delay();
            tracing::debug!(node = %self.node, ?delay, "reconnecting after delay");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        self.liveness.send_replace(Liveness::Closed);
        tracing::info!(node = %self.node, "node client stopped");
    }

    async fn serve(&mut self, stream: TcpStream) -> LinkEnd {
        match self.serve_inner(stream).await {
            Ok(()) => LinkEnd::Shutdown,
            Err(e) => LinkEnd::Lost(e),
        }
    }

    /// Runs one connection. `Ok(())` means shutdown was requested.
    async fn serve_inner(&mut self, stream: TcpStream) -> Result<(), TransportError> {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let mut reader = FrameReader::new(read_half);
        let mut writer = FrameWriter::new(write_half);
        let mut seq = 0u64;

        writer
            .write_message(&Message::hello(self.node.clone(), self.role))
            .await?;

        // Reports queued for the previous connection are stale.
        let mut discarded = 0usize;
        while self.reports.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(node = %self.node, discarded, "discarded stale reports");
        }

        let snapshot: Vec<(PlayerId, HostedPlayer)> = lock(&self.hosted)
            .iter()
            .map(|(player, hosted)| (*player, *hosted))
            .collect();
        for (player, hosted) in &snapshot {
            seq += 1;
            let join = Event {
                seq,
                timestamp: hosted.arrived,
                player: *player,
                kind: EventKind::Join,
            };
            writer.write_message(&Message::Event(join)).await?;
            if hosted.last_activity > hosted.arrived {
                seq += 1;
                let activity = Event {
                    seq,
                    timestamp: hosted.last_activity,
                    player: *player,
                    kind: EventKind::Activity(ActivityKind::Other),
                };
                writer.write_message(&Message::Event(activity)).await?;
            }
        }

        self.liveness.send_replace(Liveness::Connected);
        tracing::info!(
            node = %self.node, addr = %self.addr, resynced = snapshot.len(),
            "connected to proxy"
        );

        let mut monitor = HeartbeatMonitor::new(self.config.heartbeat_timeout(), Instant::now());
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    let _ = writer.shutdown().await;
                    return Ok(());
                }
                _ = ticker.tick() => {
                    seq += 1;
                    let heartbeat = Message::Heartbeat { seq, timestamp: now_millis() };
                    writer.write_message(&heartbeat).await?;
                }
                report = self.reports.recv() => {
                    // Every handle is gone; nobody can report any more.
                    let Some(report) = report else { return Ok(()) };
                    seq += 1;
                    let event = Event {
                        seq,
                        timestamp: report.timestamp,
                        player: report.player,
                        kind: report.kind,
                    };
                    writer.write_message(&Message::Event(event)).await?;
                }
                incoming = tokio::time::timeout_at(monitor.deadline(), reader.read_message()) => {
                    let message = match incoming {
                        Err(_) => {
                            return Err(TransportError::HeartbeatTimeout(monitor.timeout()));
                        }
                        Ok(Ok(Some(message))) => message,
                        Ok(Ok(None)) => {
                            return Err(TransportError::ConnectionClosed(
                                "proxy closed the connection".to_string(),
                            ));
                        }
                        Ok(Err(e)) => return Err(e),
                    };
                    monitor.record(Instant::now());
                    match message {
                        Message::Heartbeat { .. } => {
                            tracing::trace!(node = %self.node, "proxy heartbeat");
                        }
                        Message::Command { command, .. } => {
                            tracing::debug!(
                                node = %self.node, player = %command.target,
                                action = command.action.name(), "command received"
                            );
                            if moves_player_away(&command.action)
                                && lock(&self.hosted).remove(&command.target).is_some()
                            {
                                tracing::debug!(
                                    node = %self.node, player = %command.target,
                                    "player no longer hosted"
                                );
                            }
                            self.sink.on_command(command);
                        }
                        other => {
                            return Err(ProtocolError::UnexpectedMessage(other.kind()).into());
                        }
                    }
                }
            }
        }
    }
}

/// Whether executing `action` takes the player off this node.
fn moves_player_away(action: &CommandAction) -> bool {
    match action {
        CommandAction::TeleportLimbo { .. } | CommandAction::Disconnect { .. } => true,
        CommandAction::ClearState { return_to } => return_to.is_some(),
        CommandAction::Warn { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moves_player_away_only_for_leaving_actions() {
        let p = PlayerId::from_u128(1);
        assert!(moves_player_away(&Command::disconnect(p, "afk").action));
        assert!(moves_player_away(
            &Command::teleport_limbo(p, NodeId::new("limbo")).action
        ));
        assert!(moves_player_away(
            &Command::clear_state_and_return(p, NodeId::new("lobby")).action
        ));
        assert!(!moves_player_away(&Command::clear_state(p).action));
        assert!(!moves_player_away(&Command::warn(p, "hi").action));
    }
}
