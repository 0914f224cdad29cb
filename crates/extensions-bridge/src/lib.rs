//! Message channel contract between the coordinator and its collaborators.
//!
//! The host channel is fire-and-maybe-respond: no ordering, no delivery guarantee, no retry.
//! Everything here that awaits the other side goes through [`with_deadline`] so a silent
//! peer resolves to [`BridgeError::Timeout`] instead of hanging.

pub mod config;
pub mod links;
pub mod scripted;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use pagesync_core_types::{SyncError, TabId};

pub use config::BridgeTimeouts;
pub use links::{check_links, LinkState, LinkStatus, LinkStatusChecker};
pub use scripted::{ScriptedExtractor, ScriptedResult};

/// Errors surfaced by the bridge.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("{op} timed out after {after_ms}ms")]
    Timeout { op: String, after_ms: u64 },
    #[error("channel closed")]
    ChannelClosed,
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<BridgeError> for SyncError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Timeout { op, after_ms } => SyncError::Timeout { op, after_ms },
            BridgeError::ChannelClosed => SyncError::Transport("channel closed".into()),
            BridgeError::Extraction(message) => SyncError::new(message),
            BridgeError::Internal(message) => SyncError::new(message),
        }
    }
}

/// Actions carried over the host channel, tagged by `action`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Message {
    ContentUpdate {
        data: Value,
        source: String,
        timestamp: u64,
        #[serde(default, rename = "isSpaNavigation")]
        spa_navigation: bool,
    },
    ContentExtractionError {
        #[serde(default)]
        url: Option<String>,
        error: String,
        source: String,
        timestamp: u64,
    },
    SpaNavigationProcessed {
        url: String,
        #[serde(default)]
        source: Option<String>,
    },
    SpaNavigationSkipped {
        url: String,
        #[serde(default)]
        source: Option<String>,
    },
    ExtractSeoData {
        #[serde(default, rename = "forceRefresh")]
        force_refresh: bool,
    },
    GetSeoData {
        #[serde(default)]
        url: Option<String>,
    },
}

impl Message {
    pub fn action(&self) -> &'static str {
        match self {
            Message::ContentUpdate { .. } => "content_update",
            Message::ContentExtractionError { .. } => "content_extraction_error",
            Message::SpaNavigationProcessed { .. } => "spa_navigation_processed",
            Message::SpaNavigationSkipped { .. } => "spa_navigation_skipped",
            Message::ExtractSeoData { .. } => "extract_seo_data",
            Message::GetSeoData { .. } => "get_seo_data",
        }
    }
}

/// A message plus the tab its sender lives in. Popup messages carry no tab.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub tab: Option<TabId>,
    pub message: Message,
}

impl Envelope {
    pub fn new(tab: Option<TabId>, message: Message) -> Self {
        Self { tab, message }
    }
}

/// Content returned by an extractor for one page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentPayload {
    pub data: Value,
    pub source: String,
    pub timestamp: u64,
}

/// The content-side collaborator that turns a live page into a payload.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        tab: TabId,
        url: &str,
        force_refresh: bool,
    ) -> Result<ContentPayload, BridgeError>;
}

/// Resolves `fut`, or [`BridgeError::Timeout`] once `limit` elapses.
pub async fn with_deadline<T, F>(op: &str, limit: Duration, fut: F) -> Result<T, BridgeError>
where
    F: Future<Output = Result<T, BridgeError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(outcome) => outcome,
        Err(_) => Err(BridgeError::Timeout {
            op: op.to_string(),
            after_ms: limit.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_parse_from_host_shape() {
        let raw = json!({
            "tab": 12,
            "message": {
                "action": "content_update",
                "data": {"url": "https://a.test/", "title": "A"},
                "source": "content",
                "timestamp": 150,
                "isSpaNavigation": true
            }
        });
        let envelope: Envelope = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.tab, Some(TabId(12)));
        match envelope.message {
            Message::ContentUpdate {
                spa_navigation,
                timestamp,
                ..
            } => {
                assert!(spa_navigation);
                assert_eq!(timestamp, 150);
            }
            other => panic!("unexpected {other:?}"),
        }

        let popup: Envelope =
            serde_json::from_value(json!({"message": {"action": "get_seo_data"}})).unwrap();
        assert_eq!(popup.tab, None);
        assert_eq!(popup.message.action(), "get_seo_data");

        let force: Message =
            serde_json::from_value(json!({"action": "extract_seo_data", "forceRefresh": true}))
                .unwrap();
        assert_eq!(force, Message::ExtractSeoData { force_refresh: true });
    }

    #[test]
    fn unknown_action_is_rejected() {
        let parsed = serde_json::from_value::<Message>(json!({"action": "launch_rockets"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn timeouts_map_onto_shared_error() {
        let err: SyncError = BridgeError::Timeout {
            op: "extract".into(),
            after_ms: 10_000,
        }
        .into();
        assert_eq!(
            err,
            SyncError::Timeout {
                op: "extract".into(),
                after_ms: 10_000
            }
        );
        assert!(matches!(
            SyncError::from(BridgeError::ChannelClosed),
            SyncError::Transport(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_resolves_a_silent_peer() {
        let outcome: Result<(), BridgeError> = with_deadline(
            "extract",
            Duration::from_secs(10),
            std::future::pending(),
        )
        .await;
        assert_eq!(
            outcome,
            Err(BridgeError::Timeout {
                op: "extract".into(),
                after_ms: 10_000
            })
        );
    }
}
