//! A fake backend node for poking at a running proxy.
//!
//! Joins a handful of players, keeps the even-numbered ones busy and lets
//! the odd-numbered ones go idle, then logs whatever the proxy sends back.
//! A disconnected player leaves the network; a teleported one just stops
//! being simulated here (the limbo node reports its arrival). Either way
//! the node client stops re-announcing the player on reconnect.
//!
//! ```text
//! node-sim --proxy 127.0.0.1:9000 --node survival-1 --players 4
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use afkwatch::prelude::*;
use afkwatch::transport::TransportError;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Proxy address to connect to
    #[clap(short, long, default_value = "127.0.0.1:9000")]
    proxy: String,
    /// Name this node announces in its handshake
    #[clap(short, long, default_value = "lobby")]
    node: String,
    /// Announce as a limbo node instead of a game node
    #[clap(long)]
    limbo: bool,
    /// Number of simulated players
    #[clap(long, default_value = "3")]
    players: usize,
    /// How often busy players report activity
    #[clap(long, default_value = "1000")]
    active_every_ms: u64,
}

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    let args = Args::parse();
    let role = if args.limbo { NodeRole::Limbo } else { NodeRole::Game };

    // Commands that end a player's stay here are forwarded to the main loop.
    let (gone_tx, mut gone_rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn CommandSink> = Arc::new(move |command: Command| {
        tracing::info!(player = %command.target, action = command.action.name(), ?command, "command received");
        match command.action {
            CommandAction::Disconnect { .. } => {
                let _ = gone_tx.send((command.target, true));
            }
            CommandAction::TeleportLimbo { .. } => {
                let _ = gone_tx.send((command.target, false));
            }
            CommandAction::ClearState { return_to: Some(node) } => {
                tracing::info!(player = %command.target, %node, "would send player back");
                let _ = gone_tx.send((command.target, false));
            }
            CommandAction::Warn { .. } | CommandAction::ClearState { return_to: None } => {}
        }
    });

    let client = match NodeClient::spawn(
        args.proxy.clone(),
        NodeId::new(args.node.clone()),
        role,
        TransportConfig::default(),
        sink,
    ) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "node client not started");
            return;
        }
    };

    let mut liveness = client.liveness();
    if liveness.wait_for(|l| *l == Liveness::Connected).await.is_err() {
        tracing::error!(proxy = %args.proxy, "node client stopped before connecting");
        return;
    }

    let mut busy = BTreeSet::new();
    for i in 0..args.players {
        let player = PlayerId::new_v4();
        if let Err(e) = client.report_join(player, now_millis()) {
            tracing::warn!(%player, error = %e, "join not sent");
            continue;
        }
        tracing::info!(%player, busy = i % 2 == 0, "player joined");
        if i % 2 == 0 {
            busy.insert(player);
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(args.active_every_ms.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for &player in &busy {
                    match client.report_activity(player, now_millis(), ActivityKind::Movement) {
                        Ok(()) => {}
                        Err(TransportError::NotConnected) => {
                            tracing::debug!(%player, "proxy unreachable, activity dropped");
                        }
                        Err(e) => tracing::warn!(%player, error = %e, "activity not sent"),
                    }
                }
            }
            Some((player, left_network)) = gone_rx.recv() => {
                busy.remove(&player);
                // The client forgot the player when the command came in.
                if left_network {
                    if let Err(e) = client.report_leave(player, now_millis()) {
                        tracing::warn!(%player, error = %e, "leave not sent");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    client.shutdown().await;
}
