use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use ssc_session::logger::init_logging;
use ssc_session::peer::{IceServerConfig, WebRtcFactory};
use ssc_session::signaling::WebSocketChannel;
use ssc_session::{Reporter, Session, SessionConfig, SessionNotice};

/// Negotiate one peer-to-peer media session over a WebSocket relay
#[derive(Parser, Debug)]
#[command(name = "ssc-session", version, about)]
struct CliArgs {
    /// Path to a TOML configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Signaling relay URL (overrides config)
    #[arg(short = 's', long, value_name = "URL")]
    signaling_url: Option<String>,

    /// Send the first offer once the peer joins
    #[arg(short = 'i', long)]
    initiator: bool,

    /// TURN credential endpoint (overrides config)
    #[arg(long, value_name = "URL")]
    turn_url: Option<String>,

    /// Extra STUN server URL, repeatable (use --turn-server for relays)
    #[arg(long = "ice-server", value_name = "URL")]
    ice_servers: Vec<String>,

    /// Static TURN server URL
    #[arg(long, value_name = "URL", requires_all = ["turn_username", "turn_credential"])]
    turn_server: Option<String>,

    #[arg(long, value_name = "NAME", requires = "turn_server")]
    turn_username: Option<String>,

    #[arg(long, value_name = "SECRET", requires = "turn_server")]
    turn_credential: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL")]
    log_level: Option<String>,
}

/// Config file (or defaults) with command-line overrides applied
fn build_config(args: CliArgs) -> anyhow::Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(url) = args.signaling_url {
        config.signaling_url = url;
    }
    if args.initiator {
        config.initiator = true;
    }
    if let Some(url) = args.turn_url {
        config.turn_discovery_url = Some(url);
    }
    config
        .ice_servers
        .extend(args.ice_servers.into_iter().map(IceServerConfig::stun));
    if let Some(url) = args.turn_server {
        config.ice_servers.push(IceServerConfig {
            url,
            username: args.turn_username,
            credential: args.turn_credential,
        });
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let config_path = args.config.clone();
    let config = build_config(args)?;

    init_logging(&config.log_level);
    if let Some(path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
    let channel = Box::new(WebSocketChannel::new(config.signaling_url.clone()));
    let factory = Arc::new(WebRtcFactory::new(config.media_lines()));
    let (session, handle) = Session::start(channel, factory, &config, Reporter::new(notice_tx))
        .await
        .context("failed to start session")?;

    tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            match notice {
                SessionNotice::PhaseChanged(phase) => info!("phase: {}", phase),
                SessionNotice::RemoteStreamAdded { track_id, kind } => {
                    info!("remote {} stream {} attached", kind, track_id)
                }
                SessionNotice::RemoteStreamRemoved { track_id } => {
                    info!("remote stream {} removed", track_id)
                }
                SessionNotice::Failure { severity, message } => {
                    warn!("{:?}: {}", severity, message)
                }
            }
        }
    });

    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, leaving session");
            ctrl_c.leave();
        }
    });

    let outcome = session.run().await;
    info!("Session ended: {:?}", outcome);
    Ok(())
}
