//! Batched link status checks with per-request and whole-batch deadlines.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BridgeTimeouts;
use crate::{with_deadline, BridgeError};

#[async_trait]
pub trait LinkStatusChecker: Send + Sync {
    /// HTTP status of `url`.
    async fn check_status(&self, url: &str) -> Result<u16, BridgeError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LinkState {
    Ok,
    Broken,
    Timeout,
    Error { message: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStatus {
    pub url: String,
    pub status: LinkState,
    pub code: Option<u16>,
}

impl LinkStatus {
    fn from_outcome(url: &str, outcome: Result<u16, BridgeError>) -> Self {
        let (status, code) = match outcome {
            Ok(code) if (200..400).contains(&code) => (LinkState::Ok, Some(code)),
            Ok(code) => (LinkState::Broken, Some(code)),
            Err(BridgeError::Timeout { .. }) => (LinkState::Timeout, None),
            Err(err) => (
                LinkState::Error {
                    message: err.to_string(),
                },
                None,
            ),
        };
        Self {
            url: url.to_string(),
            status,
            code,
        }
    }

    fn timed_out(url: &str) -> Self {
        Self {
            url: url.to_string(),
            status: LinkState::Timeout,
            code: None,
        }
    }
}

/// Checks every URL concurrently. Results keep the input order; anything unresolved when
/// the batch deadline passes is reported as [`LinkState::Timeout`].
pub async fn check_links(
    checker: &dyn LinkStatusChecker,
    urls: &[String],
    timeouts: &BridgeTimeouts,
) -> Vec<LinkStatus> {
    let per_request = timeouts.status_check();
    let mut pending: FuturesUnordered<_> = urls
        .iter()
        .enumerate()
        .map(|(idx, url)| async move {
            let outcome = with_deadline("check_status", per_request, checker.check_status(url)).await;
            (idx, outcome)
        })
        .collect();

    let mut results: Vec<Option<LinkStatus>> = vec![None; urls.len()];
    let batch = tokio::time::sleep(timeouts.batch());
    tokio::pin!(batch);
    loop {
        tokio::select! {
            next = pending.next() => match next {
                Some((idx, outcome)) => results[idx] = Some(LinkStatus::from_outcome(&urls[idx], outcome)),
                None => break,
            },
            _ = &mut batch => {
                warn!(
                    target: "pagesync.bridge",
                    unresolved = results.iter().filter(|status| status.is_none()).count(),
                    batch_ms = timeouts.batch_ms,
                    "link batch deadline reached"
                );
                break;
            }
        }
    }
    debug!(target: "pagesync.bridge", checked = urls.len(), "link batch finished");

    results
        .into_iter()
        .zip(urls)
        .map(|(status, url)| status.unwrap_or_else(|| LinkStatus::timed_out(url)))
        .collect()
}
