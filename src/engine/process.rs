//! Wire client for the external test runner process
//!
//! Spawns the runner binary and drives it over framed JSON on
//! stdin/stdout: seq-numbered requests, responses matched by
//! `requestSeq`, events forwarded to the coordinator's event channel
//! while a request is pending.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::{BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

use crate::common::config::{ResolvedRunner, Timeouts};
use crate::common::{Error, Result};

use super::codec;
use super::runner::{EngineFactory, TestEngine};
use super::types::{
    CancelToken, EngineEvent, ModuleSpec, RunConfig, RunOutcome, WireEvent, WireResponse,
};

/// Engine client backed by a runner subprocess
pub struct ProcessEngine {
    runner: Child,
    reader: BufReader<ChildStdout>,
    writer: BufWriter<ChildStdin>,
    seq: u64,
    events: mpsc::UnboundedSender<EngineEvent>,
    request_timeout: Duration,
}

impl ProcessEngine {
    /// Spawn the runner and configure it for `config`
    ///
    /// Coverage instrumentation and accessibility checks are fixed by the
    /// `configure` request sent here; watch mode starts as given and may
    /// be toggled later.
    pub async fn spawn(
        runner: &ResolvedRunner,
        config: RunConfig,
        events: mpsc::UnboundedSender<EngineEvent>,
        timeouts: Timeouts,
    ) -> Result<Self> {
        let mut cmd = Command::new(&runner.path);
        cmd.args(&runner.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| {
            Error::EngineStartFailed(format!("Failed to start {}: {}", runner.path.display(), e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::EngineStartFailed("Failed to get runner stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::EngineStartFailed("Failed to get runner stdout".to_string()))?;

        let mut engine = Self {
            runner: child,
            reader: BufReader::new(stdout),
            writer: BufWriter::new(stdin),
            seq: 0,
            events,
            request_timeout: Duration::from_secs(timeouts.engine_request_secs),
        };

        let arguments = json!({
            "project": runner.project,
            "watchMode": config.watch_mode,
            "coverage": config.coverage,
            "a11y": config.a11y,
        });

        tracing::debug!(?config, runner = %runner.path.display(), "Configuring test runner");
        tokio::time::timeout(
            Duration::from_secs(timeouts.engine_start_secs),
            engine.request::<Value>("configure", Some(arguments)),
        )
        .await
        .map_err(|_| Error::StartupTimeout(timeouts.engine_start_secs))??;

        Ok(engine)
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Send a request frame and return its sequence number
    async fn send_request(&mut self, command: &str, arguments: Option<Value>) -> Result<u64> {
        let seq = self.next_seq();
        let request = match arguments {
            Some(args) => json!({
                "seq": seq,
                "type": "request",
                "command": command,
                "arguments": args,
            }),
            None => json!({
                "seq": seq,
                "type": "request",
                "command": command,
            }),
        };

        let json = serde_json::to_string(&request)?;
        tracing::trace!(command, seq, "Engine request");
        codec::write_message(&mut self.writer, &json).await?;
        Ok(seq)
    }

    fn parse_frame(json: &str) -> Result<Value> {
        serde_json::from_str(json)
            .map_err(|e| Error::EngineProtocol(format!("Invalid JSON frame: {}", e)))
    }

    /// Forward an event frame to the coordinator's event channel
    fn dispatch_event(&self, msg: Value) {
        match serde_json::from_value::<WireEvent>(msg) {
            Ok(wire) => {
                if let Some(event) = EngineEvent::from_wire(&wire.event, wire.body) {
                    let _ = self.events.send(event);
                } else {
                    tracing::debug!(event = %wire.event, "Ignoring unknown engine event");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Malformed engine event"),
        }
    }

    fn parse_response<T: DeserializeOwned>(command: &str, response: WireResponse) -> Result<T> {
        if response.success {
            let body = response.body.unwrap_or(Value::Null);
            serde_json::from_value(body).map_err(|e| {
                Error::EngineProtocol(format!("Failed to parse {} response: {}", command, e))
            })
        } else {
            Err(Error::engine_request_failed(
                command,
                response
                    .message
                    .as_deref()
                    .unwrap_or("Unknown engine error"),
            ))
        }
    }

    /// Send a request and wait for its response, forwarding events that
    /// arrive in between
    async fn request<T: DeserializeOwned>(
        &mut self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<T> {
        let seq = self.send_request(command, arguments).await?;

        loop {
            let frame = codec::read_message(&mut self.reader).await?;
            let msg = Self::parse_frame(&frame)?;

            match msg.get("type").and_then(|v| v.as_str()).unwrap_or("unknown") {
                "response" => {
                    let response: WireResponse = serde_json::from_value(msg)?;
                    if response.request_seq == seq {
                        return Self::parse_response(command, response);
                    }
                    tracing::debug!(
                        request_seq = response.request_seq,
                        "Dropping stale engine response"
                    );
                }
                "event" => self.dispatch_event(msg),
                other => tracing::warn!(msg_type = %other, "Unknown engine message type"),
            }
        }
    }

    /// A small control request bounded by the request timeout
    async fn control<T: DeserializeOwned>(
        &mut self,
        command: &'static str,
        arguments: Option<Value>,
    ) -> Result<T> {
        let timeout = self.request_timeout;
        tokio::time::timeout(timeout, self.request(command, arguments))
            .await
            .map_err(|_| Error::engine_request_failed(command, "request timed out"))?
    }
}

#[async_trait]
impl TestEngine for ProcessEngine {
    async fn glob_test_specs(&mut self) -> Result<Vec<ModuleSpec>> {
        #[derive(serde::Deserialize)]
        struct Body {
            specs: Vec<ModuleSpec>,
        }

        let body: Body = self.control("globTestSpecs", None).await?;
        Ok(body.specs)
    }

    async fn run_files(
        &mut self,
        specs: &[ModuleSpec],
        update_snapshots: bool,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        let arguments = json!({
            "specs": specs,
            "updateSnapshots": update_snapshots,
        });
        let seq = self.send_request("runFiles", Some(arguments)).await?;
        let mut cancel_sent = false;

        // Runs are unbounded; we stay in this loop until the runFiles
        // response arrives. A cancellation request goes out once and the
        // (cancelled) response still serves as the acknowledgment.
        loop {
            if cancel.is_cancelled() && !cancel_sent {
                cancel_sent = true;
                let cancel_seq = self.send_request("cancel", None).await?;
                tracing::debug!(cancel_seq, "Requested run cancellation");
            }

            tokio::select! {
                frame = codec::read_message(&mut self.reader) => {
                    let msg = Self::parse_frame(&frame?)?;
                    match msg.get("type").and_then(|v| v.as_str()).unwrap_or("unknown") {
                        "response" => {
                            let response: WireResponse = serde_json::from_value(msg)?;
                            if response.request_seq == seq {
                                return Self::parse_response("runFiles", response);
                            }
                            // cancel acknowledgments and stale responses
                            tracing::trace!(
                                request_seq = response.request_seq,
                                "Ignoring non-run response during run"
                            );
                        }
                        "event" => self.dispatch_event(msg),
                        other => tracing::warn!(msg_type = %other, "Unknown engine message type"),
                    }
                }
                _ = cancel.cancelled(), if !cancel_sent => {
                    // Loop around to send the cancel request
                }
            }
        }
    }

    async fn set_name_pattern(&mut self, pattern: Option<&str>) -> Result<()> {
        self.control::<Value>("setNamePattern", Some(json!({ "pattern": pattern })))
            .await?;
        Ok(())
    }

    async fn set_watch_mode(&mut self, enabled: bool) -> Result<()> {
        self.control::<Value>("setWatchMode", Some(json!({ "enabled": enabled })))
            .await?;
        Ok(())
    }

    async fn invalidate(&mut self) -> Result<()> {
        self.control::<Value>("invalidate", None).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        // Graceful shutdown; a runner that already died fails the request
        // and falls through to reaping below
        if let Err(e) = self.control::<Value>("shutdown", None).await {
            tracing::debug!(error = %e, "Runner did not acknowledge shutdown");
        }

        match tokio::time::timeout(Duration::from_secs(5), self.runner.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(?status, "Test runner exited");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::EngineCloseFailed(e.to_string())),
            Err(_) => {
                tracing::warn!("Test runner did not exit, killing");
                self.runner
                    .kill()
                    .await
                    .map_err(|e| Error::EngineCloseFailed(e.to_string()))
            }
        }
    }
}

impl Drop for ProcessEngine {
    fn drop(&mut self) {
        // Best effort - we cannot await in drop
        let _ = self.runner.start_kill();
    }
}

/// Factory spawning one runner subprocess per engine instance
pub struct ProcessEngineFactory {
    runner: ResolvedRunner,
    timeouts: Timeouts,
}

impl ProcessEngineFactory {
    pub fn new(runner: ResolvedRunner, timeouts: Timeouts) -> Self {
        Self { runner, timeouts }
    }
}

#[async_trait]
impl EngineFactory for ProcessEngineFactory {
    async fn create(
        &self,
        config: RunConfig,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Box<dyn TestEngine>> {
        let engine = ProcessEngine::spawn(&self.runner, config, events, self.timeouts).await?;
        Ok(Box::new(engine))
    }
}
