//! The afkwatch proxy process.
//!
//! ```text
//! afkwatch-proxy --config afkwatch.json --bind 0.0.0.0:9000
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use afkwatch::prelude::*;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tracks player activity reported by backend nodes and acts on AFK players.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// JSON config file. Defaults apply when omitted.
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Address node connections are accepted on (overrides the config).
    #[clap(short, long)]
    bind: Option<String>,
    /// Name of the in-process node whose commands are only logged.
    #[clap(long, default_value = "proxy")]
    local_node: String,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn load_config(args: &Args) -> Result<AfkConfig, AfkError> {
    let mut config = match &args.config {
        Some(path) => AfkConfig::load(path)?,
        None => AfkConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.bind_addr = bind.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    let local = NodeId::new(args.local_node);
    let log_sink: Arc<dyn CommandSink> = Arc::new(|command: Command| {
        tracing::info!(
            player = %command.target,
            action = command.action.name(),
            ?command,
            "local command"
        );
    });

    let proxy = match AfkProxy::builder()
        .config(config)
        .local_node(local, NodeRole::Game, log_sink)
        .build()
        .await
    {
        Ok(proxy) => proxy,
        Err(e @ AfkError::Config(_)) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start proxy");
            return ExitCode::FAILURE;
        }
    };

    let handle = proxy.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, shutting down");
            handle.shutdown().await;
        }
    });

    match proxy.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "proxy stopped with an error");
            ExitCode::FAILURE
        }
    }
}
