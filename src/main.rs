//! storyrun - component test-run coordination daemon
//!
//! `serve` runs the daemon that owns the test runner and listens on the
//! channel socket; the other subcommands are thin channel clients for
//! driving a running daemon from scripts or a terminal.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use storyrun::channel::protocol::{
    Inbound, Request, RunRequestPayload, StatusEvent, WatchModePayload,
};
use storyrun::channel::{server, ChannelClient};
use storyrun::common::config::Config;
use storyrun::common::{logging, paths};
use storyrun::{Error, Result, RunStatus};

#[derive(Parser)]
#[command(name = "storyrun", about = "Component test-run coordination daemon")]
#[command(version, long_about = None)]
struct Cli {
    /// Provider id this instance serves on the shared channel
    #[arg(long, global = true, default_value = "storyrun")]
    provider_id: String,

    /// Configuration file override
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordination daemon
    Serve,
    /// Request a test run and stream its status
    Run {
        /// URL of the component index document
        #[arg(long)]
        index_url: String,
        /// Story ids to run; the full suite when omitted
        #[arg(long = "story-id")]
        story_ids: Vec<String>,
    },
    /// Toggle watch mode on the running daemon
    Watch {
        /// Desired watch state
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Cancel the in-flight run
    Cancel,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Serve) {
        logging::init_daemon();
    } else {
        logging::init_cli();
    }

    if let Err(e) = run_command(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run_command(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let socket = config
        .channel
        .socket
        .clone()
        .unwrap_or_else(paths::socket_name);

    match cli.command {
        Commands::Serve => server::run(config, cli.provider_id).await,

        Commands::Run {
            index_url,
            story_ids,
        } => {
            let story_ids = if story_ids.is_empty() {
                None
            } else {
                Some(story_ids)
            };

            let mut client = ChannelClient::connect(&socket).await?;
            client
                .send(&Inbound {
                    provider_id: cli.provider_id.clone(),
                    request: Request::RunRequest(RunRequestPayload {
                        index_url,
                        story_ids,
                    }),
                })
                .await?;
            stream_until_finished(&mut client, &cli.provider_id).await
        }

        Commands::Watch { enabled } => {
            let mut client = ChannelClient::connect(&socket).await?;
            client
                .send(&Inbound {
                    provider_id: cli.provider_id.clone(),
                    request: Request::WatchModeRequest(WatchModePayload {
                        watch_mode: enabled,
                    }),
                })
                .await?;

            loop {
                let event = client.next_event().await?;
                if event.provider_id != cli.provider_id {
                    continue;
                }
                match event.event {
                    StatusEvent::ConfigUpdated(config) => {
                        println!("{}", serde_json::to_string(&config)?);
                        return Ok(());
                    }
                    StatusEvent::Error(payload) => {
                        return Err(Error::Internal(format!(
                            "{}: {}",
                            payload.message, payload.error.message
                        )));
                    }
                    _ => {}
                }
            }
        }

        Commands::Cancel => {
            let mut client = ChannelClient::connect(&socket).await?;
            client
                .send(&Inbound {
                    provider_id: cli.provider_id,
                    request: Request::Cancel,
                })
                .await
        }
    }
}

/// Print status events for our provider until the run ends
async fn stream_until_finished(client: &mut ChannelClient, provider_id: &str) -> Result<()> {
    loop {
        let event = client.next_event().await?;
        if event.provider_id != provider_id {
            continue;
        }
        println!("{}", serde_json::to_string(&event.event)?);

        match event.event {
            StatusEvent::RunFinished(outcome) => {
                if outcome.status == RunStatus::Failed {
                    std::process::exit(1);
                }
                return Ok(());
            }
            StatusEvent::Error(_) => std::process::exit(1),
            _ => {}
        }
    }
}
