//! Channel message types
//!
//! Inbound commands and outbound status events share one envelope shape:
//! `{providerId, type, payload}`. Several providers may share a channel;
//! each coordinator only acts on messages carrying its own provider id.

use serde::{Deserialize, Serialize};

use crate::common::error::ChannelError;
use crate::engine::{ConfigPatch, EngineEvent, RunConfig, RunOutcome, TestProgress};

/// Inbound command envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbound {
    pub provider_id: String,
    #[serde(flatten)]
    pub request: Request,
}

/// Provider-scoped commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Request {
    WatchModeRequest(WatchModePayload),
    RunRequest(RunRequestPayload),
    ConfigChange(ConfigChangePayload),
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchModePayload {
    pub watch_mode: bool,
}

/// Run request payload
///
/// `story_ids` absent means "run everything"; present but empty means
/// "run exactly this (empty) set".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequestPayload {
    pub index_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigChangePayload {
    pub config: ConfigPatch,
}

/// Outbound status envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outbound {
    pub provider_id: String,
    #[serde(flatten)]
    pub event: StatusEvent,
}

impl Outbound {
    pub fn new(provider_id: &str, event: StatusEvent) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            event,
        }
    }
}

/// Status republished to channel clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum StatusEvent {
    /// Coordinator created its runner and accepts requests
    Ready,
    RunStarted { total: usize },
    TestProgress(TestProgress),
    RunFinished(RunOutcome),
    ConfigUpdated(RunConfig),
    Error(ErrorPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    pub error: ChannelError,
}

impl From<EngineEvent> for StatusEvent {
    fn from(event: EngineEvent) -> Self {
        match event {
            EngineEvent::RunStarted { total } => Self::RunStarted { total },
            EngineEvent::TestProgress(progress) => Self::TestProgress(progress),
            EngineEvent::RunFinished(outcome) => Self::RunFinished(outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_request_with_story_ids_parses() {
        let message: Inbound = serde_json::from_str(
            r#"{
                "providerId": "addon-test",
                "type": "runRequest",
                "payload": {
                    "indexUrl": "http://localhost:6006/index.json",
                    "storyIds": ["button--one"]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(message.provider_id, "addon-test");
        match message.request {
            Request::RunRequest(payload) => {
                assert_eq!(payload.index_url, "http://localhost:6006/index.json");
                assert_eq!(payload.story_ids.as_deref(), Some(&["button--one".to_string()][..]));
            }
            other => panic!("Expected runRequest, got {:?}", other),
        }
    }

    #[test]
    fn run_request_without_story_ids_means_run_all() {
        let message: Inbound = serde_json::from_str(
            r#"{
                "providerId": "addon-test",
                "type": "runRequest",
                "payload": { "indexUrl": "http://localhost:6006/index.json" }
            }"#,
        )
        .unwrap();

        match message.request {
            Request::RunRequest(payload) => assert!(payload.story_ids.is_none()),
            other => panic!("Expected runRequest, got {:?}", other),
        }
    }

    #[test]
    fn cancel_has_no_payload() {
        let message: Inbound =
            serde_json::from_str(r#"{"providerId": "addon-test", "type": "cancel"}"#).unwrap();
        assert!(matches!(message.request, Request::Cancel));
    }

    #[test]
    fn config_change_is_partial() {
        let message: Inbound = serde_json::from_str(
            r#"{
                "providerId": "addon-test",
                "type": "configChange",
                "payload": { "config": { "coverage": true } }
            }"#,
        )
        .unwrap();

        match message.request {
            Request::ConfigChange(payload) => {
                assert_eq!(payload.config.coverage, Some(true));
                assert_eq!(payload.config.a11y, None);
            }
            other => panic!("Expected configChange, got {:?}", other),
        }
    }

    #[test]
    fn outbound_envelope_carries_provider_and_type() {
        let message = Outbound::new(
            "addon-test",
            StatusEvent::ConfigUpdated(RunConfig {
                watch_mode: true,
                coverage: false,
                a11y: false,
            }),
        );
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["providerId"], "addon-test");
        assert_eq!(json["type"], "configUpdated");
        assert_eq!(json["payload"]["watchMode"], true);
    }
}
