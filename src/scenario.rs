//! Scripted replays of host traffic against a [`SyncEngine`].
//!
//! A scenario is a YAML or JSON list of steps: navigation events, network events, channel
//! messages, prepared extractor answers and janitor passes. Extractions started by a step run
//! concurrently with the steps after it until a `settle` step (or the end of the run) awaits
//! them.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pagesync_change_detector::{NavigationEvent, NavigationSource};
use pagesync_core_types::TabId;
use pagesync_extensions_bridge::{Envelope, ScriptedExtractor, ScriptedResult};
use pagesync_redirect_tracker::{NetworkEvent, RedirectFinalized};
use pagesync_state_center::PageRecordView;

use crate::config::AppConfig;
use crate::engine::{ExtractionResolution, SyncEngine};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    /// Tab used by steps that do not name one.
    #[serde(default = "default_tab")]
    pub tab: TabId,
    pub steps: Vec<Step>,
}

fn default_tab() -> TabId {
    TabId(1)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Queue an extractor answer for `url`.
    Script { url: String, answer: ScriptedResult },
    Navigation {
        #[serde(default)]
        tab: Option<TabId>,
        url: String,
        source: NavigationSource,
        at: u64,
        #[serde(default)]
        forced: bool,
    },
    Network {
        #[serde(default)]
        tab: Option<TabId>,
        event: NetworkEvent,
        at: u64,
    },
    WebVitals {
        #[serde(default)]
        tab: Option<TabId>,
        url: String,
        metrics: BTreeMap<String, f64>,
        at: u64,
    },
    Message { envelope: Envelope },
    /// Wait for every extraction started so far.
    Settle,
    Sweep { now: u64 },
    CloseTab {
        #[serde(default)]
        tab: Option<TabId>,
    },
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::Script { .. } => "script",
            Step::Navigation { .. } => "navigation",
            Step::Network { .. } => "network",
            Step::WebVitals { .. } => "web_vitals",
            Step::Message { .. } => "message",
            Step::Settle => "settle",
            Step::Sweep { .. } => "sweep",
            Step::CloseTab { .. } => "close_tab",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub step: &'static str,
    pub result: Value,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReplayReport {
    pub steps: Vec<StepOutcome>,
    pub extractions: Vec<String>,
    pub records: Vec<PageRecordView>,
    /// Every redirect chain the tracker finalized during the run, in order.
    pub redirects: Vec<RedirectFinalized>,
    pub extractor_calls: usize,
}

impl Scenario {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let scenario = if is_json {
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing scenario {}", path.display()))?
        } else {
            serde_yaml::from_str(&raw)
                .with_context(|| format!("parsing scenario {}", path.display()))?
        };
        Ok(scenario)
    }
}

pub async fn replay(scenario: Scenario, config: AppConfig) -> Result<ReplayReport> {
    let extractor = Arc::new(ScriptedExtractor::new());
    let engine = SyncEngine::new(config, extractor.clone())?;
    let mut finalized = engine.tracker().subscribe();
    let mut pending: Vec<JoinHandle<ExtractionResolution>> = Vec::new();
    let mut extractions = Vec::new();
    let mut steps = Vec::with_capacity(scenario.steps.len());
    let default = scenario.tab;

    for (index, step) in scenario.steps.into_iter().enumerate() {
        let name = step.name();
        debug!(index, step = name, "replaying step");
        let result = match step {
            Step::Script { url, answer } => {
                extractor.push(&url, answer);
                Value::Null
            }
            Step::Navigation {
                tab,
                url,
                source,
                at,
                forced,
            } => {
                let mut event = NavigationEvent::new(url, source, at);
                event.forced = forced;
                let (outcome, handle) = engine.handle_navigation(tab.unwrap_or(default), &event);
                let started = handle.is_some();
                pending.extend(handle);
                json!({ "key": outcome.key().to_string(), "extractionStarted": started })
            }
            Step::Network { tab, event, at } => {
                match engine.handle_network(tab.unwrap_or(default), event, at) {
                    Some(view) => serde_json::to_value(view)?,
                    None => Value::Null,
                }
            }
            Step::WebVitals {
                tab,
                url,
                metrics,
                at,
            } => serde_json::to_value(engine.handle_web_vitals(
                tab.unwrap_or(default),
                &url,
                &metrics,
                at,
            ))?,
            Step::Message { envelope } => match engine.handle_message(envelope) {
                Ok(Some(response)) => serde_json::to_value(response)?,
                Ok(None) => Value::Null,
                Err(err) => {
                    warn!(index, %err, "message rejected");
                    json!({ "error": err.to_string() })
                }
            },
            Step::Settle => {
                let settled = settle(&mut pending).await;
                let count = settled.len();
                extractions.extend(settled);
                json!({ "settled": count })
            }
            Step::Sweep { now } => {
                let report = engine.sweep(now);
                json!({
                    "timedOut": report.timed_out,
                    "expired": report.expired,
                    "evicted": report.evicted,
                })
            }
            Step::CloseTab { tab } => {
                json!({ "removed": engine.close_tab(tab.unwrap_or(default)) })
            }
        };
        steps.push(StepOutcome {
            index,
            step: name,
            result,
        });
    }
    extractions.extend(settle(&mut pending).await);
    let redirects = drain_redirects(&mut finalized);
    let failed = engine.flush_records_async().await;
    if failed > 0 {
        warn!(failed, "some record sinks were not flushed");
    }

    let mut records: Vec<PageRecordView> = engine
        .reconciler()
        .store()
        .snapshot()
        .into_iter()
        .map(|(_, record)| record.view())
        .collect();
    records.sort_by(|a, b| a.url.cmp(&b.url));
    info!(
        steps = steps.len(),
        records = records.len(),
        redirects = redirects.len(),
        "scenario replay finished"
    );

    Ok(ReplayReport {
        steps,
        extractions,
        records,
        redirects,
        extractor_calls: extractor.calls(),
    })
}

async fn settle(pending: &mut Vec<JoinHandle<ExtractionResolution>>) -> Vec<String> {
    let mut resolved = Vec::with_capacity(pending.len());
    for handle in pending.drain(..) {
        match handle.await {
            Ok(resolution) => resolved.push(format!("{resolution:?}")),
            Err(err) => {
                warn!(%err, "extraction task failed");
                resolved.push("Panicked".to_string());
            }
        }
    }
    resolved
}

fn drain_redirects(rx: &mut broadcast::Receiver<RedirectFinalized>) -> Vec<RedirectFinalized> {
    let mut redirects = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(chain) => redirects.push(chain),
            Err(TryRecvError::Lagged(missed)) => {
                warn!(missed, "redirect notifications dropped during replay");
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    redirects
}
