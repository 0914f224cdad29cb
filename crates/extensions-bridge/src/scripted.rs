//! Extractor driven by a prepared script, used for scenario replay.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use pagesync_core_types::{strip_fragment, TabId};

use crate::{BridgeError, ContentPayload, Extractor};

/// One prepared answer for an extraction request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ScriptedResult {
    Content {
        #[serde(default)]
        data: Value,
        timestamp: u64,
        #[serde(default)]
        delay_ms: u64,
    },
    Fail {
        error: String,
        #[serde(default)]
        delay_ms: u64,
    },
    /// Never answers.
    Hang,
}

/// Answers are consumed per URL in the order they were queued. A URL with nothing queued
/// fails with [`BridgeError::Extraction`].
#[derive(Default)]
pub struct ScriptedExtractor {
    queued: DashMap<String, VecDeque<ScriptedResult>>,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, url: &str, result: ScriptedResult) {
        self.queued
            .entry(strip_fragment(url).to_string())
            .or_default()
            .push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_for(&self, url: &str) -> Option<ScriptedResult> {
        self.queued
            .get_mut(strip_fragment(url))
            .and_then(|mut queue| queue.pop_front())
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(
        &self,
        tab: TabId,
        url: &str,
        force_refresh: bool,
    ) -> Result<ContentPayload, BridgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        debug!(target: "pagesync.bridge", %tab, url, force_refresh, "scripted extraction");
        match self.next_for(url) {
            Some(ScriptedResult::Content {
                data,
                timestamp,
                delay_ms,
            }) => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                let mut data = if data.is_object() { data } else { json!({}) };
                if let Some(fields) = data.as_object_mut() {
                    fields
                        .entry("url")
                        .or_insert_with(|| Value::String(url.to_string()));
                }
                Ok(ContentPayload {
                    data,
                    source: "scripted".into(),
                    timestamp,
                })
            }
            Some(ScriptedResult::Fail { error, delay_ms }) => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Err(BridgeError::Extraction(error))
            }
            Some(ScriptedResult::Hang) => std::future::pending().await,
            None => Err(BridgeError::Extraction(format!("no scripted result for {url}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_are_consumed_in_order() {
        let extractor = ScriptedExtractor::new();
        extractor.push(
            "https://a.test/#x",
            ScriptedResult::Content {
                data: json!({"title": "A"}),
                timestamp: 5,
                delay_ms: 0,
            },
        );
        extractor.push(
            "https://a.test/",
            ScriptedResult::Fail {
                error: "tab discarded".into(),
                delay_ms: 0,
            },
        );

        let payload = extractor
            .extract(TabId(1), "https://a.test/", false)
            .await
            .unwrap();
        assert_eq!(payload.data["url"], "https://a.test/");
        assert_eq!(payload.data["title"], "A");
        assert_eq!(payload.timestamp, 5);

        let failed = extractor.extract(TabId(1), "https://a.test/", true).await;
        assert_eq!(failed, Err(BridgeError::Extraction("tab discarded".into())));
        assert!(extractor
            .extract(TabId(1), "https://a.test/", false)
            .await
            .is_err());
        assert_eq!(extractor.calls(), 3);
    }
}
