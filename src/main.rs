//! janus-stream - command-line client for the Janus streaming plugin.
//!
//! Gateway commands open a fresh session, run one operation, print the
//! result to stdout and tear the session down again. `save-config` only
//! writes the resolved settings to disk.

use std::path::PathBuf;

use clap::{Parser as ClapParser, Subcommand};
use janus_stream::config::{default_config_path, ConfigError};
use janus_stream::{JanusConfig, JanusError, MountpointSpec, Session};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// janus-stream - manage and watch Janus streaming mountpoints
#[derive(ClapParser, Debug)]
#[command(name = "janus-stream", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Gateway address as host[:port]; overrides the config file
    #[arg(long, env = "JANUS_HOST")]
    host: Option<String>,

    /// Gateway API secret; overrides the config file
    #[arg(long, env = "JANUS_SECRET", hide_env_values = true)]
    secret: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the effective host and secret to the config file
    SaveConfig,

    #[command(flatten)]
    Gateway(GatewayCommand),
}

#[derive(Subcommand, Debug)]
enum GatewayCommand {
    /// Create an RTP mountpoint
    Mount {
        /// Human-readable description of the mountpoint
        #[arg(long)]
        metadata: Option<String>,

        /// Enable the audio stream
        #[arg(long)]
        audio: bool,

        #[arg(long)]
        audio_pt: Option<u8>,

        #[arg(long)]
        audio_rtpmap: Option<String>,

        #[arg(long)]
        audio_port: Option<u16>,

        #[arg(long)]
        audio_rtcp_port: Option<u16>,

        /// Enable the video stream
        #[arg(long)]
        video: bool,

        #[arg(long)]
        video_pt: Option<u8>,

        #[arg(long)]
        video_rtpmap: Option<String>,

        #[arg(long)]
        video_port: Option<u16>,

        #[arg(long)]
        video_rtcp_port: Option<u16>,
    },

    /// List mountpoints
    List,

    /// Destroy a mountpoint
    Destroy {
        /// Mountpoint id
        id: u64,
    },

    /// Watch a mountpoint and print the gateway's SDP offer
    Watch {
        /// Mountpoint id
        id: u64,
    },
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("no gateway host given (use --host, JANUS_HOST or a config file)")]
    MissingHost,

    #[error("no API secret given (use --secret, JANUS_SECRET or a config file)")]
    MissingSecret,

    #[error("no config path given and no user config directory found")]
    NoConfigPath,

    #[error("janus error: {0}")]
    Janus(#[from] JanusError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayCommand {
    fn mountpoint_spec(&self) -> Option<MountpointSpec> {
        let GatewayCommand::Mount {
            metadata,
            audio,
            audio_pt,
            audio_rtpmap,
            audio_port,
            audio_rtcp_port,
            video,
            video_pt,
            video_rtpmap,
            video_port,
            video_rtcp_port,
        } = self
        else {
            return None;
        };
        Some(MountpointSpec {
            metadata: metadata.clone(),
            audio: Some(*audio),
            audiopt: *audio_pt,
            audiortpmap: audio_rtpmap.clone(),
            audioport: *audio_port,
            audiortcpport: *audio_rtcp_port,
            video: Some(*video),
            videopt: *video_pt,
            videortpmap: video_rtpmap.clone(),
            videoport: *video_port,
            videortcpport: *video_rtcp_port,
            ..Default::default()
        })
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "janus_stream=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn config_path(cli: &Cli) -> Option<PathBuf> {
    cli.config.clone().or_else(default_config_path)
}

/// Config file first, then flags and environment on top.
fn resolve_config(cli: &Cli) -> Result<JanusConfig, CliError> {
    let from_file = match config_path(cli) {
        Some(path) => JanusConfig::load(&path)?,
        None => None,
    };

    let mut config = match (from_file, cli.host.as_ref()) {
        (Some(config), _) => config,
        (None, Some(host)) => JanusConfig::new(host.clone(), String::new()),
        (None, None) => return Err(CliError::MissingHost),
    };
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(secret) = &cli.secret {
        config.secret = secret.clone();
    }
    if config.secret.is_empty() {
        return Err(CliError::MissingSecret);
    }
    Ok(config)
}

/// Persist the resolved config so later runs need no flags.
fn save_config(cli: &Cli) -> Result<String, CliError> {
    let config = resolve_config(cli)?;
    let path = config_path(cli).ok_or(CliError::NoConfigPath)?;
    config.save(&path)?;
    Ok(path.display().to_string())
}

async fn run_command(session: &Session, command: &GatewayCommand) -> Result<String, CliError> {
    match command {
        GatewayCommand::Mount { .. } => {
            let spec = command.mountpoint_spec().unwrap_or_default();
            let created = session.mount(&spec).await?;
            Ok(serde_json::to_string_pretty(&created)?)
        }
        GatewayCommand::List => {
            let list = session.list().await?;
            Ok(serde_json::to_string_pretty(&list)?)
        }
        GatewayCommand::Destroy { id } => {
            let destroyed = session.destroy_mountpoint(*id).await?;
            Ok(serde_json::to_string_pretty(&destroyed)?)
        }
        GatewayCommand::Watch { id } => {
            let watching = session.watch(*id).await?;
            Ok(watching.sdp)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_tracing();

    let output = match &cli.command {
        Commands::SaveConfig => save_config(&cli)?,
        Commands::Gateway(command) => run_gateway(&cli, command).await?,
    };
    println!("{output}");
    Ok(())
}

/// One session per invocation: init, run, then tear the session down.
async fn run_gateway(cli: &Cli, command: &GatewayCommand) -> Result<String, CliError> {
    let config = resolve_config(cli)?;
    let session = Session::new(config)?;
    session.init().await;

    let result = match session.primary_handle() {
        Some(_) => run_command(&session, command).await,
        None => Err(JanusError::NoHandle.into()),
    };

    session.kill();
    if let Err(e) = session.delete().await {
        tracing::warn!(error = %e, "failed to delete janus session");
    }
    session.join().await;
    result
}
