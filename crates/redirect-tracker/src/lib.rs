//! Redirect chain tracking for top-level navigations.
//!
//! Redirects happen before any page script runs, so the chain is rebuilt from request
//! lifecycle events. Each tab moves through `Empty → Accumulating → Finalized`; the terminal
//! event reduces the hops to a [`RedirectSummary`] that is published to subscribers.

pub mod config;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use pagesync_core_types::{RedirectHop, RedirectSummary, ServerInfo, TabId};

use crate::config::RedirectConfig;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    #[default]
    MainFrame,
    SubFrame,
    Other,
}

/// Request lifecycle events as reported by the host's network layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NetworkEvent {
    RequestSent {
        url: String,
        #[serde(default)]
        resource: ResourceKind,
    },
    HeadersReceived {
        url: String,
        status: u16,
        #[serde(default)]
        server: Option<String>,
        #[serde(default)]
        content_type: Option<String>,
        #[serde(default)]
        resource: ResourceKind,
    },
    BeforeRedirect {
        from_url: String,
        to_url: String,
        status: u16,
        #[serde(default)]
        resource: ResourceKind,
    },
    Completed {
        url: String,
        status: u16,
        #[serde(default)]
        resource: ResourceKind,
    },
    ErrorOccurred {
        url: String,
        error: String,
        #[serde(default)]
        resource: ResourceKind,
    },
}

impl NetworkEvent {
    pub fn resource(&self) -> ResourceKind {
        match self {
            NetworkEvent::RequestSent { resource, .. }
            | NetworkEvent::HeadersReceived { resource, .. }
            | NetworkEvent::BeforeRedirect { resource, .. }
            | NetworkEvent::Completed { resource, .. }
            | NetworkEvent::ErrorOccurred { resource, .. } => *resource,
        }
    }
}

/// Terminal outcome of one top-level navigation's chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectFinalized {
    pub tab: TabId,
    pub final_url: String,
    /// `0` when the request errored.
    pub status_code: u16,
    pub summary: RedirectSummary,
    pub error: Option<String>,
    /// Response headers captured for this chain only.
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
    /// When the last hop of the chain was observed; the recency window counts from here.
    pub last_hop_at: u64,
    pub finalized_at: u64,
}

#[derive(Debug)]
struct Accumulator {
    origin_url: String,
    hops: Vec<RedirectHop>,
    last_activity: u64,
}

impl Accumulator {
    fn new(origin_url: &str, at: u64) -> Self {
        Self {
            origin_url: origin_url.to_string(),
            hops: Vec::new(),
            last_activity: at,
        }
    }

    fn push_hop(&mut self, from_url: String, to_url: String, status_code: u16, at: u64) {
        self.last_activity = at;
        let duplicate = self.hops.last().map_or(false, |last| {
            last.from_url == from_url && last.to_url == to_url && last.status_code == status_code
        });
        if duplicate {
            trace!(target: "pagesync.redirects", %from_url, %to_url, "duplicate hop ignored");
            return;
        }
        self.hops.push(RedirectHop {
            from_url,
            to_url,
            status_code,
            occurred_at: at,
        });
    }

    fn last_target(&self) -> &str {
        self.hops
            .last()
            .map(|hop| hop.to_url.as_str())
            .unwrap_or(&self.origin_url)
    }
}

#[derive(Debug, Default)]
enum ChainState {
    #[default]
    Empty,
    Accumulating(Accumulator),
    Finalized,
}

#[derive(Debug, Default)]
struct TabChain {
    state: ChainState,
    last_finalized: Option<RedirectFinalized>,
    server_info: Option<ServerInfo>,
}

/// Per-tab chain state; all mutation goes through [`RedirectTracker::ingest`].
pub struct RedirectTracker {
    bus: broadcast::Sender<RedirectFinalized>,
    tabs: DashMap<TabId, TabChain>,
    config: RedirectConfig,
}

impl RedirectTracker {
    pub fn new(config: RedirectConfig) -> Self {
        let (bus, _) = broadcast::channel(config.buffer.max(1));
        Self {
            bus,
            tabs: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &RedirectConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RedirectFinalized> {
        self.bus.subscribe()
    }

    /// Feeds one lifecycle event. Returns the finalized chain when `event` was terminal for
    /// an open chain; repeated terminal events return `None`.
    pub fn ingest(&self, tab: TabId, event: NetworkEvent, at: u64) -> Option<RedirectFinalized> {
        if event.resource() != ResourceKind::MainFrame {
            trace!(target: "pagesync.redirects", %tab, "ignoring non top-level request event");
            return None;
        }
        let mut entry = self.tabs.entry(tab).or_default();
        let chain = entry.value_mut();
        match event {
            NetworkEvent::RequestSent { url, .. } => {
                match &mut chain.state {
                    ChainState::Accumulating(acc) => {
                        debug!(target: "pagesync.redirects", %tab, %url, "request continues open chain");
                        acc.last_activity = at;
                    }
                    _ => {
                        debug!(target: "pagesync.redirects", %tab, %url, "new top-level navigation");
                        chain.state = ChainState::Accumulating(Accumulator::new(&url, at));
                        chain.server_info = None;
                    }
                }
                None
            }
            NetworkEvent::HeadersReceived {
                status,
                server,
                content_type,
                ..
            } => {
                chain.server_info = Some(ServerInfo {
                    server,
                    content_type,
                    status_code: Some(status),
                });
                if let ChainState::Accumulating(acc) = &mut chain.state {
                    acc.last_activity = at;
                }
                None
            }
            NetworkEvent::BeforeRedirect {
                from_url,
                to_url,
                status,
                ..
            } => {
                if !matches!(chain.state, ChainState::Accumulating(_)) {
                    chain.state = ChainState::Accumulating(Accumulator::new(&from_url, at));
                    chain.server_info = None;
                }
                if let ChainState::Accumulating(acc) = &mut chain.state {
                    acc.push_hop(from_url, to_url, status, at);
                }
                None
            }
            NetworkEvent::Completed { url, status, .. } => {
                let finalized = Self::finalize(tab, chain, &url, status, None, at)?;
                Some(self.publish(finalized))
            }
            NetworkEvent::ErrorOccurred { url, error, .. } => {
                let finalized = Self::finalize(tab, chain, &url, 0, Some(error), at)?;
                Some(self.publish(finalized))
            }
        }
    }

    fn finalize(
        tab: TabId,
        chain: &mut TabChain,
        final_url: &str,
        status_code: u16,
        error: Option<String>,
        at: u64,
    ) -> Option<RedirectFinalized> {
        let mut acc = match std::mem::take(&mut chain.state) {
            ChainState::Accumulating(acc) => acc,
            ChainState::Empty => Accumulator::new(final_url, at),
            ChainState::Finalized => {
                chain.state = ChainState::Finalized;
                debug!(target: "pagesync.redirects", %tab, final_url, "chain already finalized");
                return None;
            }
        };
        if acc.last_target() != final_url {
            let from = acc.last_target().to_string();
            acc.push_hop(from, final_url.to_string(), status_code, at);
        }
        let summary = RedirectSummary::from_hops(&acc.origin_url, final_url, &acc.hops, status_code);
        let last_hop_at = acc.hops.last().map_or(at, |hop| hop.occurred_at);
        let finalized = RedirectFinalized {
            tab,
            final_url: final_url.to_string(),
            status_code,
            summary,
            error,
            server_info: chain.server_info.clone(),
            last_hop_at,
            finalized_at: at,
        };
        debug!(
            target: "pagesync.redirects",
            %tab,
            final_url,
            status_code,
            redirects = finalized.summary.redirect_count,
            hops = finalized.summary.total_hops,
            "redirect chain finalized"
        );
        chain.state = ChainState::Finalized;
        chain.last_finalized = Some(finalized.clone());
        Some(finalized)
    }

    fn publish(&self, finalized: RedirectFinalized) -> RedirectFinalized {
        let _ = self.bus.send(finalized.clone());
        finalized
    }

    /// The last finalized chain for `tab`, if its last hop is inside the recency window.
    /// Stale chains are discarded so they cannot be attributed to a newer navigation.
    pub fn recent_summary(&self, tab: TabId, now: u64) -> Option<RedirectFinalized> {
        let mut entry = self.tabs.get_mut(&tab)?;
        let chain = entry.value_mut();
        let finalized = chain.last_finalized.as_ref()?;
        if now.saturating_sub(last_hop_at(finalized)) <= self.config.recency_window_ms {
            return Some(finalized.clone());
        }
        debug!(target: "pagesync.redirects", %tab, "discarding stale redirect chain");
        chain.last_finalized = None;
        None
    }

    pub fn server_info(&self, tab: TabId) -> Option<ServerInfo> {
        self.tabs.get(&tab)?.server_info.clone()
    }

    /// Number of hops accumulated for the open chain of `tab`.
    pub fn pending_hops(&self, tab: TabId) -> Option<usize> {
        match &self.tabs.get(&tab)?.state {
            ChainState::Accumulating(acc) => Some(acc.hops.len()),
            _ => None,
        }
    }

    /// Drops abandoned open chains and expired finalized chains. Returns how many tabs were
    /// touched.
    pub fn sweep(&self, now: u64) -> usize {
        let mut touched = 0;
        for mut entry in self.tabs.iter_mut() {
            let chain = entry.value_mut();
            let abandoned = matches!(
                &chain.state,
                ChainState::Accumulating(acc)
                    if now.saturating_sub(acc.last_activity) > self.config.stale_chain_ms
            );
            if abandoned {
                chain.state = ChainState::Empty;
                touched += 1;
            }
            let expired = chain.last_finalized.as_ref().map_or(false, |finalized| {
                now.saturating_sub(last_hop_at(finalized)) > self.config.recency_window_ms
            });
            if expired {
                chain.last_finalized = None;
                touched += 1;
            }
        }
        touched
    }

    pub fn close_tab(&self, tab: TabId) -> bool {
        self.tabs.remove(&tab).is_some()
    }
}

fn last_hop_at(finalized: &RedirectFinalized) -> u64 {
    finalized.last_hop_at
}
