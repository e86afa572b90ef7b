//! Callmesh CLI binary.
//!
//! # Commands
//!
//! - `relay` - Run the WebSocket broadcast relay
//! - `join` - Join a room as a participant (simulated media)
//! - `decode` - Validate a wire message and print its normalized form

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use callmesh::{
    config::Config,
    protocol::{self, Payload},
    relay::RelayServer,
    Peer, SimulatedCapability, WsConnector, VERSION,
};
use serde_json::json;

#[derive(Parser)]
#[command(name = "callmesh")]
#[command(version = VERSION)]
#[command(about = "Callmesh - mesh call signaling over a broadcast relay", long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WebSocket broadcast relay
    Relay {
        /// Listen host
        #[arg(long)]
        host: Option<String>,

        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Config file (default: <config dir>/callmesh/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Join a room as a participant with simulated media
    Join {
        /// Relay endpoint (e.g., ws://127.0.0.1:8080/ws/standup)
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Config file (default: <config dir>/callmesh/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Broadcast a join offer once connected
        #[arg(short, long)]
        join: bool,

        /// Leave after this many seconds (default: until Ctrl-C)
        #[arg(short, long)]
        duration: Option<u64>,

        /// Do not capture audio
        #[arg(long)]
        no_audio: bool,

        /// Do not capture video
        #[arg(long)]
        no_video: bool,
    },

    /// Validate a wire message and print its normalized form
    Decode {
        /// Message JSON (or - for stdin)
        input: Option<String>,

        /// Input file path
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Relay { host, port, config } => {
            init_logging(cli.verbose, cli.json_logs);
            cmd_relay(host, port, config)
        },
        Commands::Join {
            endpoint,
            config,
            join,
            duration,
            no_audio,
            no_video,
        } => {
            init_logging(cli.verbose, cli.json_logs);
            cmd_join(endpoint, config, join, duration, no_audio, no_video)
        },
        Commands::Decode { input, file } => cmd_decode(input, file),
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// File (explicit or default location) merged with environment overrides
fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let file = match path {
        Some(path) => Config::from_file(path)?,
        None => match Config::default_path().filter(|p| p.exists()) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "using default config file");
                Config::from_file(path)?
            },
            None => Config::default(),
        },
    };
    Ok(file.merge(Config::from_env()))
}

fn cmd_relay(host: Option<String>, port: Option<u16>, config: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = load_config(config)?;
    if let Some(host) = host {
        config.relay.host = host;
    }
    if let Some(port) = port {
        config.relay.port = port;
    }
    config.validate()?;

    let server = RelayServer::new(config.relay);
    tracing::info!("Starting callmesh relay on {}", server.listen_addr());

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        tokio::select! {
            result = server.run() => result?,
            _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
        }
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_join(
    endpoint: Option<String>,
    config: Option<PathBuf>,
    join: bool,
    duration: Option<u64>,
    no_audio: bool,
    no_video: bool,
) -> anyhow::Result<()> {
    let mut config = load_config(config)?;
    if let Some(endpoint) = endpoint {
        config.signaling.endpoint = endpoint;
    }
    config.signaling.auto_join |= join;
    config.media.audio &= !no_audio;
    config.media.video &= !no_video;
    config.validate()?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let capability = Arc::new(SimulatedCapability::new());
        let (peer, handle, mut events) = Peer::connect(&config, &WsConnector::new(), capability).await?;
        tracing::info!(identity = %handle.identity(), "participant ready");
        let task = peer.spawn();

        let deadline = async {
            match duration {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => println!("{}", serde_json::to_string(&event)?),
                    None => break,
                },
                _ = &mut deadline => break,
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        // the loop may already be gone if the relay hung up
        if handle.leave().await.is_err() {
            tracing::warn!("signaling loop already stopped");
        }
        let stats = task.await?;
        tracing::info!(
            frames = stats.frames,
            decode_errors = stats.decode_errors,
            "left the room"
        );
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_decode(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<()> {
    let content = read_input(input, file)?;
    let envelope = protocol::decode(content.trim().as_bytes())?;

    let summary = match &envelope.payload {
        Payload::Description { description, call } => json!({
            "kind": description.kind.as_str(),
            "call": call,
            "sdp_lines": description.sdp.lines().count(),
        }),
        Payload::Candidate(candidate) => json!({
            "kind": "ice",
            "candidate": candidate.candidate,
            "sdp_mid": candidate.sdp_mid,
            "sdp_m_line_index": candidate.sdp_m_line_index,
        }),
        Payload::Bye => json!({ "kind": "bye" }),
    };

    let normalized: serde_json::Value = serde_json::from_slice(&protocol::encode(&envelope)?)?;
    let output = json!({
        "sender": envelope.sender.as_str(),
        "recipient": envelope.recipient.as_ref().map(|r| r.as_str()),
        "payload": summary,
        "wire": normalized,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

// Helper functions

fn read_input(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    if let Some(path) = file {
        Ok(std::fs::read_to_string(path)?)
    } else if let Some(s) = input {
        if s == "-" {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        } else {
            Ok(s)
        }
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    }
}
