//! Channel adapter - the daemon's message loop
//!
//! Accepts add-on connections, dispatches provider-scoped commands into
//! the coordinator's command queue (one task, so engine operations are
//! serialized), and republishes coordinator and engine status as
//! outbound events. `cancel` bypasses the queue through the cancel
//! token so it can reach an in-flight run.

use std::sync::Arc;

use interprocess::local_socket::traits::tokio::Listener as ListenerTrait;
use tokio::io::BufReader;
use tokio::sync::{broadcast, mpsc};

use crate::common::config::Config;
use crate::common::error::ChannelError;
use crate::common::{paths, Error, Result};
use crate::engine::{CancelToken, ConfigPatch, ProcessEngineFactory, RunConfig};
use crate::index::IndexResolver;
use crate::manager::{CoordinatorOptions, RunCoordinator, RunObserver, RunRequest};

use super::protocol::{ErrorPayload, Inbound, Outbound, Request, StatusEvent};
use super::transport;

/// Commands queued for the coordinator task
enum Command {
    Run(RunRequest),
    ConfigChange(ConfigPatch),
    WatchMode(bool),
}

/// Observer republishing coordinator transitions as outbound events
struct ChannelObserver {
    provider_id: String,
    outbound: broadcast::Sender<Outbound>,
}

impl ChannelObserver {
    fn publish(&self, event: StatusEvent) {
        // No connected client is fine; these are status events
        let _ = self
            .outbound
            .send(Outbound::new(&self.provider_id, event));
    }
}

impl RunObserver for ChannelObserver {
    fn on_ready(&self) {
        self.publish(StatusEvent::Ready);
    }

    fn on_error(&self, message: &str, error: &Error) {
        self.publish(StatusEvent::Error(ErrorPayload {
            message: message.to_string(),
            error: ChannelError::from(error),
        }));
    }

    fn on_config_changed(&self, config: &RunConfig) {
        self.publish(StatusEvent::ConfigUpdated(*config));
    }
}

/// Run the daemon until a shutdown signal
pub async fn run(config: Config, provider_id: String) -> Result<()> {
    let runner = config.resolve_runner()?;
    let factory = Arc::new(ProcessEngineFactory::new(runner, config.timeouts));

    let initial = RunConfig {
        watch_mode: config.defaults.watch_mode,
        coverage: config.defaults.coverage,
        a11y: config.defaults.a11y,
    };

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (outbound_tx, _) = broadcast::channel(256);

    let observer = Arc::new(ChannelObserver {
        provider_id: provider_id.clone(),
        outbound: outbound_tx.clone(),
    });

    let coordinator = RunCoordinator::start(
        CoordinatorOptions {
            provider_id: provider_id.clone(),
            config: initial,
        },
        factory,
        IndexResolver::new(),
        observer.clone(),
        events_tx,
    )
    .await?;
    let cancel = coordinator.cancel_token();

    // Engine events become outbound status events
    let event_publisher = observer.clone();
    let event_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            event_publisher.publish(StatusEvent::from(event));
        }
    });

    // One task drives the coordinator; requests queue behind each other
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let command_task = tokio::spawn(command_loop(coordinator, commands_rx));

    let socket = config
        .channel
        .socket
        .clone()
        .unwrap_or_else(paths::socket_name);
    let listener = transport::create_listener(&socket).await?;
    tracing::info!(socket = %socket, provider_id = %provider_id, "Channel listening");

    serve(&listener, &provider_id, &commands_tx, &cancel, &outbound_tx).await?;

    // Dropping the sender ends the command loop, which closes the runner
    drop(commands_tx);
    let _ = command_task.await;
    event_task.abort();

    #[cfg(unix)]
    {
        let _ = std::fs::remove_file(&socket);
    }
    tracing::info!("Daemon shutdown complete");
    Ok(())
}

async fn command_loop(mut coordinator: RunCoordinator, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        // Failures are already surfaced through the observer; the loop
        // keeps going so the next request can proceed
        let result = match command {
            Command::Run(request) => coordinator.handle_run_request(request).await,
            Command::ConfigChange(patch) => coordinator.handle_config_change(patch).await,
            Command::WatchMode(watch) => coordinator.handle_watch_mode_request(watch).await,
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "Command failed");
        }
    }

    if let Err(e) = coordinator.shutdown().await {
        tracing::warn!(error = %e, "Runner did not close cleanly");
    }
}

#[cfg(unix)]
async fn serve(
    listener: &transport::platform::Listener,
    provider_id: &str,
    commands: &mpsc::UnboundedSender<Command>,
    cancel: &CancelToken,
    outbound: &broadcast::Sender<Outbound>,
) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
                return Ok(());
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok(stream) => {
                        if let Err(e) =
                            handle_client(stream, provider_id, commands, cancel, outbound).await
                        {
                            tracing::error!(error = %e, "Client connection failed");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Accept failed"),
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn serve(
    listener: &transport::platform::Listener,
    provider_id: &str,
    commands: &mpsc::UnboundedSender<Command>,
    cancel: &CancelToken,
    outbound: &broadcast::Sender<Outbound>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok(stream) => {
                        if let Err(e) =
                            handle_client(stream, provider_id, commands, cancel, outbound).await
                        {
                            tracing::error!(error = %e, "Client connection failed");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Accept failed"),
                }
            }
        }
    }
}

/// Handle one client connection until it disconnects
async fn handle_client(
    stream: transport::Stream,
    provider_id: &str,
    commands: &mpsc::UnboundedSender<Command>,
    cancel: &CancelToken,
    outbound: &broadcast::Sender<Outbound>,
) -> Result<()> {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    // Writer task: republish status events to this client
    let mut events = outbound.subscribe();
    let writer_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(message) => {
                    let json = match serde_json::to_vec(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to encode status event");
                            continue;
                        }
                    };
                    if transport::send_message(&mut writer, &json).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Slow client, dropped status events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    loop {
        let data = match transport::recv_message(&mut reader).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!("Client disconnected");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error reading channel message");
                break;
            }
        };

        let message: Inbound = match serde_json::from_slice(&data) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed channel message");
                continue;
            }
        };

        // Multi-provider channels: messages for other providers are not ours
        if message.provider_id != provider_id {
            tracing::trace!(
                provider_id = %message.provider_id,
                "Ignoring message for another provider"
            );
            continue;
        }

        tracing::debug!(request = ?message.request, "Channel request");
        match message.request {
            // Must reach an in-flight run, so it does not queue
            Request::Cancel => cancel.cancel(),
            Request::WatchModeRequest(payload) => {
                let _ = commands.send(Command::WatchMode(payload.watch_mode));
            }
            Request::RunRequest(payload) => {
                let _ = commands.send(Command::Run(RunRequest {
                    index_url: payload.index_url,
                    story_ids: payload.story_ids,
                }));
            }
            Request::ConfigChange(payload) => {
                let _ = commands.send(Command::ConfigChange(payload.config));
            }
        }
    }

    writer_task.abort();
    Ok(())
}
