//! Shared primitives for the navigation coordinator crates.
//!
//! Identity types (`TabId`, `PageKey`), the common error type, and the network-derived facts
//! (`RedirectSummary`, `ServerInfo`) that flow from the redirect tracker into page records.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::form_urlencoded;

/// Shared error type for the coordinator crates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("{message}")]
    Message { message: String },
    #[error("missing identity field: {0}")]
    MissingIdentity(&'static str),
    #[error("{op} timed out after {after_ms}ms")]
    Timeout { op: String, after_ms: u64 },
    #[error("transport unavailable: {0}")]
    Transport(String),
    #[error("merge failed: {0}")]
    Merge(String),
}

impl SyncError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    pub fn merge(detail: impl Into<String>) -> Self {
        Self::Merge(detail.into())
    }
}

/// Browser tab identifier as reported by the host.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite `(tab, url)` identity of a page record.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PageKey {
    pub tab: TabId,
    pub url: String,
}

impl PageKey {
    pub fn new(tab: TabId, url: impl Into<String>) -> Self {
        Self {
            tab,
            url: url.into(),
        }
    }

    /// Key used by persistence sinks: `<tab>_<url-encoded url>`.
    pub fn storage_key(&self) -> String {
        let encoded: String = form_urlencoded::byte_serialize(self.url.as_bytes()).collect();
        format!("{}_{}", self.tab.0, encoded)
    }

    pub fn from_storage_key(raw: &str) -> Option<Self> {
        let (tab, encoded) = raw.split_once('_')?;
        let tab = tab.parse::<u32>().ok()?;
        if encoded.is_empty() {
            return None;
        }
        let url = form_urlencoded::parse(encoded.as_bytes())
            .next()
            .map(|(decoded, _)| decoded.into_owned())?;
        Some(Self::new(TabId(tab), url))
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab={} url={}", self.tab, self.url)
    }
}

/// Drops the `#fragment` part of a URL without otherwise normalising it.
pub fn strip_fragment(url: &str) -> &str {
    match url.find('#') {
        Some(idx) => &url[..idx],
        None => url,
    }
}

/// One leg of a server-side redirect chain.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectHop {
    pub from_url: String,
    pub to_url: String,
    pub status_code: u16,
    pub occurred_at: u64,
}

impl RedirectHop {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status_code)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HopPair {
    pub from: String,
    pub to: String,
}

/// Reduced form of a finalized redirect chain attached to page records.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectSummary {
    pub redirect_count: usize,
    pub total_hops: usize,
    pub origin_url: String,
    pub final_url: String,
    pub status_codes: Vec<u16>,
    pub hop_pairs: Vec<HopPair>,
}

impl RedirectSummary {
    pub fn from_hops(origin_url: &str, final_url: &str, hops: &[RedirectHop], final_status: u16) -> Self {
        let mut status_codes: Vec<u16> = hops.iter().map(|hop| hop.status_code).collect();
        let terminal_recorded = hops
            .last()
            .map(|hop| hop.to_url == final_url && !hop.is_redirect())
            .unwrap_or(false);
        if !terminal_recorded {
            status_codes.push(final_status);
        }
        Self {
            redirect_count: hops.iter().filter(|hop| hop.is_redirect()).count(),
            total_hops: hops.len(),
            origin_url: origin_url.to_string(),
            final_url: final_url.to_string(),
            status_codes,
            hop_pairs: hops
                .iter()
                .map(|hop| HopPair {
                    from: hop.from_url.clone(),
                    to: hop.to_url.clone(),
                })
                .collect(),
        }
    }
}

/// Response metadata captured from the main-frame response headers.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub server: Option<String>,
    pub content_type: Option<String>,
    pub status_code: Option<u16>,
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}
