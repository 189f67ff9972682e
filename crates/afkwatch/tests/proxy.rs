//! Full proxy over real TCP: node clients, the proxy loop and the sweep.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use afkwatch::ConfigError;
use afkwatch::prelude::*;
use afkwatch::protocol::{Event, EventKind, Message};
use afkwatch::transport::{BackoffConfig, FrameWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> AfkConfig {
    AfkConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        idle_threshold_ms: 300,
        afk_threshold_ms: 600,
        sweep_interval_ms: 20,
        heartbeat_interval_ms: 50,
        handshake_timeout_ms: 1_000,
        backoff_floor_ms: 20,
        backoff_ceiling_ms: 200,
        action: AfkAction::TeleportLimbo {
            limbo: NodeId::new("limbo"),
        },
        ..AfkConfig::default()
    }
}

fn node_transport() -> TransportConfig {
    TransportConfig {
        heartbeat_interval: Duration::from_millis(50),
        handshake_timeout: Duration::from_secs(1),
        outbound_queue: 16,
        backoff: BackoffConfig {
            floor: Duration::from_millis(20),
            ceiling: Duration::from_millis(200),
            jitter: 0.0,
            ..BackoffConfig::default()
        },
    }
}

async fn start_proxy(config: AfkConfig) -> (SocketAddr, ProxyHandle) {
    let proxy = AfkProxy::builder().config(config).build().await.unwrap();
    let addr = proxy.local_addr().unwrap();
    let handle = proxy.handle();
    tokio::spawn(proxy.run());
    (addr, handle)
}

/// Builds a proxy on a fixed address, retrying while the previous
/// listener on that port is still being torn down.
async fn restart_proxy(config: AfkConfig) -> ProxyHandle {
    let deadline = Instant::now() + WAIT;
    loop {
        match AfkProxy::builder().config(config.clone()).build().await {
            Ok(proxy) => {
                let handle = proxy.handle();
                tokio::spawn(proxy.run());
                return handle;
            }
            Err(e) => {
                assert!(Instant::now() < deadline, "rebind failed: {e}");
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
}

fn channel_sink() -> (Arc<dyn CommandSink>, mpsc::UnboundedReceiver<Command>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink: Arc<dyn CommandSink> = Arc::new(move |command: Command| {
        let _ = tx.send(command);
    });
    (sink, rx)
}

async fn connect_node(addr: SocketAddr, name: &str) -> (NodeClient, mpsc::UnboundedReceiver<Command>) {
    let (sink, rx) = channel_sink();
    let client = NodeClient::spawn(
        addr.to_string(),
        NodeId::new(name),
        NodeRole::Game,
        node_transport(),
        sink,
    )
    .unwrap();
    let mut liveness = client.liveness();
    tokio::time::timeout(WAIT, liveness.wait_for(|l| *l == Liveness::Connected))
        .await
        .expect("node never connected")
        .unwrap();
    (client, rx)
}

/// Polls the proxy until `check` holds for the player's status.
async fn wait_status(
    handle: &ProxyHandle,
    player: PlayerId,
    check: impl Fn(&PlayerStatus) -> bool,
) -> PlayerStatus {
    let deadline = Instant::now() + WAIT;
    loop {
        if let Some(status) = handle.status(player).await.unwrap() {
            if check(&status) {
                return status;
            }
        }
        assert!(Instant::now() < deadline, "status condition never held");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn next_command(rx: &mut mpsc::UnboundedReceiver<Command>) -> Command {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no command delivered")
        .unwrap()
}

#[tokio::test]
async fn test_proxy_switch_routes_commands_to_new_host() {
    let (addr, handle) = start_proxy(test_config()).await;
    let (x, mut x_commands) = connect_node(addr, "x").await;
    let (y, mut y_commands) = connect_node(addr, "y").await;
    let player = PlayerId::from_u128(0xabc);

    x.report_join(player, now_millis()).unwrap();
    wait_status(&handle, player, |s| s.host == Host::Known(NodeId::new("x"))).await;

    y.report_switch(player, now_millis()).unwrap();
    let status = wait_status(&handle, player, |s| s.host.node() == &NodeId::new("y")).await;
    assert_eq!(status.host, Host::Known(NodeId::new("y")));

    // The idle warning is the next command; it must arrive on y.
    let command = next_command(&mut y_commands).await;
    assert_eq!(command.target, player);
    assert!(matches!(command.action, CommandAction::Warn { .. }));
    assert!(x_commands.try_recv().is_err());

    x.shutdown().await;
    y.shutdown().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn test_proxy_silent_node_suspends_players_within_heartbeat_timeout() {
    let config = test_config();
    let heartbeat_timeout = Duration::from_millis(config.heartbeat_interval_ms * 3);
    let (addr, handle) = start_proxy(config).await;
    let player = PlayerId::from_u128(0xdef);

    // A node that handshakes, reports a join and then goes silent
    // without closing the socket.
    let stream = TcpStream::connect(addr).await.unwrap();
    let (_read, write) = stream.into_split();
    let mut writer = FrameWriter::new(write);
    writer
        .write_message(&Message::hello(NodeId::new("x"), NodeRole::Game))
        .await
        .unwrap();
    writer
        .write_message(&Message::Event(Event {
            seq: 1,
            timestamp: now_millis(),
            player,
            kind: EventKind::Join,
        }))
        .await
        .unwrap();

    wait_status(&handle, player, |s| s.state == AfkState::Active).await;
    let silent_since = Instant::now();

    let status = wait_status(&handle, player, |s| s.state == AfkState::Suspended).await;
    assert!(silent_since.elapsed() < heartbeat_timeout + Duration::from_millis(500));
    assert_eq!(status.host, Host::Unknown(NodeId::new("x")));

    // Well past the AFK threshold the player is still frozen.
    tokio::time::sleep(Duration::from_millis(700)).await;
    let status = handle.status(player).await.unwrap().unwrap();
    assert_eq!(status.state, AfkState::Suspended);
    assert_eq!(status.afk_in, None);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_proxy_reconnected_node_resumes_player_on_activity() {
    let (addr, handle) = start_proxy(test_config()).await;
    let (x, _commands) = connect_node(addr, "x").await;
    let player = PlayerId::from_u128(0x77);

    x.report_join(player, now_millis()).unwrap();
    wait_status(&handle, player, |s| s.host.is_known()).await;
    x.shutdown().await;
    wait_status(&handle, player, |s| s.state == AfkState::Suspended).await;

    // Same node name comes back. A fresh client has nothing to resync, so
    // it announces the player itself.
    let (x, _commands) = connect_node(addr, "x").await;
    x.report_join(player, now_millis()).unwrap();
    wait_status(&handle, player, |s| s.host.is_known()).await;
    x.report_activity(player, now_millis(), ActivityKind::Movement).unwrap();

    wait_status(&handle, player, |s| s.state == AfkState::Active).await;
    x.shutdown().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn test_proxy_afk_player_is_teleported_to_live_limbo() {
    let (addr, handle) = start_proxy(test_config()).await;
    let (game, mut game_commands) = connect_node(addr, "game").await;
    let (limbo, _limbo_commands) = connect_node(addr, "limbo").await;
    let player = PlayerId::from_u128(0x1);

    game.report_join(player, now_millis()).unwrap();

    let warn = next_command(&mut game_commands).await;
    assert!(matches!(warn.action, CommandAction::Warn { .. }));
    let action = next_command(&mut game_commands).await;
    assert_eq!(action, Command::teleport_limbo(player, NodeId::new("limbo")));

    game.shutdown().await;
    limbo.shutdown().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn test_proxy_local_node_reports_reach_local_sink() {
    let (sink, mut commands) = channel_sink();
    let proxy = AfkProxy::builder()
        .config(test_config())
        .local_node(NodeId::new("proxy"), NodeRole::Game, sink)
        .build()
        .await
        .unwrap();
    let handle = proxy.handle();
    tokio::spawn(proxy.run());
    let player = PlayerId::from_u128(0x2);

    handle
        .report_join(player, NodeId::new("proxy"), now_millis())
        .unwrap();

    let warn = next_command(&mut commands).await;
    assert_eq!(warn.target, player);
    assert!(matches!(warn.action, CommandAction::Warn { .. }));
    // Limbo is not connected, so the AFK action falls back to a kick.
    let action = next_command(&mut commands).await;
    assert!(matches!(action.action, CommandAction::Disconnect { .. }));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_reload_policy_invalid_is_config_error() {
    let (_addr, handle) = start_proxy(test_config()).await;

    let err = handle
        .reload_policy(AfkPolicy {
            idle_threshold: Duration::from_secs(10),
            afk_threshold: Duration::from_secs(5),
            ..AfkPolicy::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AfkError::Config(_)));

    handle.reload_policy(AfkPolicy::default()).await.unwrap();
    handle.shutdown().await;
}

#[tokio::test]
async fn test_build_invalid_config_fails() {
    let result = AfkProxy::builder()
        .config(AfkConfig {
            input_queue: 0,
            ..test_config()
        })
        .build()
        .await;
    assert!(matches!(result, Err(AfkError::Config(_))));
}

#[tokio::test]
async fn test_status_after_shutdown_is_error() {
    let (_addr, handle) = start_proxy(test_config()).await;
    handle.shutdown().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(handle.status(PlayerId::from_u128(1)).await.is_err());
    assert!(
        handle
            .report_join(PlayerId::from_u128(1), NodeId::new("x"), now_millis())
            .is_err()
    );
}

#[tokio::test]
async fn test_proxy_restart_does_not_pull_back_player_moved_to_limbo() {
    let config = AfkConfig {
        idle_threshold_ms: 60_000,
        afk_threshold_ms: 120_000,
        ..test_config()
    };
    let (addr, handle) = start_proxy(config.clone()).await;
    let (x, mut x_commands) = connect_node(addr, "x").await;
    let (limbo, _limbo_commands) = connect_node(addr, "limbo").await;
    let player = PlayerId::from_u128(0x5e7);

    x.report_join(player, now_millis()).unwrap();
    wait_status(&handle, player, |s| s.host == Host::Known(NodeId::new("x"))).await;

    assert!(handle.set_afk(player).await.unwrap());
    let command = next_command(&mut x_commands).await;
    assert_eq!(command, Command::teleport_limbo(player, NodeId::new("limbo")));
    assert!(x.hosted_players().is_empty(), "x dropped the teleported player");

    limbo.report_switch(player, now_millis()).unwrap();
    wait_status(&handle, player, |s| s.host == Host::Known(NodeId::new("limbo"))).await;
    limbo.shutdown().await;

    // Restart the proxy on the same port; x reconnects on its own.
    let mut x_liveness = x.liveness();
    handle.shutdown().await;
    tokio::time::timeout(WAIT, x_liveness.wait_for(|l| *l != Liveness::Connected))
        .await
        .expect("x never noticed the proxy going away")
        .unwrap();
    let handle = restart_proxy(AfkConfig {
        bind_addr: addr.to_string(),
        ..config
    })
    .await;
    tokio::time::timeout(WAIT, x_liveness.wait_for(|l| *l == Liveness::Connected))
        .await
        .expect("x never reconnected")
        .unwrap();

    // Anything x re-announced is processed by now.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.status(player).await.unwrap(), None);

    x.shutdown().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn test_set_afk_unknown_player_is_routing_error() {
    let (_addr, handle) = start_proxy(test_config()).await;
    let err = handle.set_afk(PlayerId::from_u128(0x404)).await.unwrap_err();
    assert!(matches!(err, AfkError::Routing(RoutingError::UnknownPlayer(_))));
    handle.shutdown().await;
}

#[tokio::test]
async fn test_reload_policy_idle_not_above_sweep_interval_rejected() {
    // test_config sweeps every 20ms.
    let (_addr, handle) = start_proxy(test_config()).await;

    let err = handle
        .reload_policy(AfkPolicy {
            idle_threshold: Duration::from_millis(20),
            afk_threshold: Duration::from_secs(1),
            ..AfkPolicy::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AfkError::Config(ConfigError::Invalid(_))));

    handle
        .reload_policy(AfkPolicy {
            idle_threshold: Duration::from_millis(21),
            afk_threshold: Duration::from_secs(1),
            ..AfkPolicy::default()
        })
        .await
        .unwrap();
    handle.shutdown().await;
}
