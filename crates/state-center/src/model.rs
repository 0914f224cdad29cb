use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

use pagesync_change_detector::NavigationSource;
use pagesync_core_types::{RedirectSummary, ServerInfo, SyncError, TabId};

/// Explicit lifecycle of a page record. The legacy UI flags are derived from it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PagePhase {
    AwaitingExtraction,
    /// Network-derived facts arrived; `extraction_pending` tells whether content is still
    /// expected.
    PartiallyPopulated { extraction_pending: bool },
    Ready,
    Failed { message: String },
}

impl PagePhase {
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            PagePhase::AwaitingExtraction
                | PagePhase::PartiallyPopulated {
                    extraction_pending: true
                }
        )
    }

    pub fn waiting_for_extraction(&self) -> bool {
        self.is_loading()
    }

    pub fn partial_data(&self) -> bool {
        matches!(
            self,
            PagePhase::PartiallyPopulated { .. } | PagePhase::Failed { .. }
        )
    }

    pub fn extraction_failed(&self) -> bool {
        matches!(self, PagePhase::Failed { .. })
    }

    /// Network data never touches the loading flags; it only marks the record partial.
    pub(crate) fn with_network_data(&self) -> Self {
        match self {
            PagePhase::AwaitingExtraction => PagePhase::PartiallyPopulated {
                extraction_pending: true,
            },
            other => other.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaState {
    pub is_spa_navigation: bool,
    pub navigation_source: Option<NavigationSource>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastUpdate {
    pub source: String,
    pub timestamp: u64,
}

/// Fields owned by the network/performance side. Content updates may fill them when unset
/// but never overwrite them.
const AUTHORITATIVE_KEYS: &[&str] = &[
    "statusCode",
    "detailStatusCode",
    "redirect",
    "webVitals",
    "serverInfo",
];

/// Bookkeeping owned by the reconciler itself; ignored when present in payloads.
const STATE_KEYS: &[&str] = &[
    "url",
    "isLoading",
    "waitingForExtraction",
    "partialData",
    "extractionFailed",
    "isSpaNavigation",
    "navigationSource",
    "lastUpdate",
    "error",
];

/// Authoritative merged state for one `(tab, url)` pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub url: String,
    pub status_code: Option<u16>,
    pub detail_status_code: Option<u16>,
    pub redirect: Option<RedirectSummary>,
    pub web_vitals: BTreeMap<String, f64>,
    pub server_info: Option<ServerInfo>,
    pub content: Option<Map<String, Value>>,
    pub phase: PagePhase,
    pub spa: SpaState,
    pub error: Option<String>,
    pub last_update: LastUpdate,
    pub created_at: u64,
}

impl PageRecord {
    pub fn new(url: impl Into<String>, phase: PagePhase, source: &str, at: u64) -> Self {
        Self {
            url: url.into(),
            status_code: None,
            detail_status_code: None,
            redirect: None,
            web_vitals: BTreeMap::new(),
            server_info: None,
            content: None,
            phase,
            spa: SpaState::default(),
            error: None,
            last_update: LastUpdate {
                source: source.to_string(),
                timestamp: at,
            },
            created_at: at,
        }
    }

    pub fn touch(&mut self, source: &str, at: u64) {
        self.last_update = LastUpdate {
            source: source.to_string(),
            timestamp: at,
        };
    }

    /// Merges an extractor payload. Authoritative fields already present win over the
    /// payload; everything else lands in `content`.
    pub fn merge_content(&mut self, data: &Value) -> Result<(), SyncError> {
        let payload = data
            .as_object()
            .ok_or_else(|| SyncError::merge("content payload is not an object"))?;

        if self.status_code.is_none() {
            self.status_code = payload.get("statusCode").and_then(status_from);
        }
        if self.detail_status_code.is_none() {
            self.detail_status_code = payload.get("detailStatusCode").and_then(status_from);
        }
        if self.redirect.is_none() {
            if let Some(raw) = payload.get("redirect").filter(|v| !v.is_null()) {
                let summary = serde_json::from_value(raw.clone())
                    .map_err(|err| SyncError::merge(format!("redirect: {err}")))?;
                self.redirect = Some(summary);
            }
        }
        if self.server_info.is_none() {
            if let Some(raw) = payload.get("serverInfo").filter(|v| !v.is_null()) {
                let info = serde_json::from_value(raw.clone())
                    .map_err(|err| SyncError::merge(format!("serverInfo: {err}")))?;
                self.server_info = Some(info);
            }
        }
        match payload.get("webVitals") {
            None | Some(Value::Null) => {}
            Some(Value::Object(vitals)) => {
                for (metric, value) in vitals {
                    match value.as_f64() {
                        Some(number) => {
                            self.web_vitals.entry(metric.clone()).or_insert(number);
                        }
                        None => trace!(target: "pagesync.reconciler", %metric, "non-numeric vital skipped"),
                    }
                }
            }
            Some(_) => return Err(SyncError::merge("webVitals is not an object")),
        }

        let mut content = self.content.take().unwrap_or_default();
        for (field, value) in payload {
            if AUTHORITATIVE_KEYS.contains(&field.as_str()) || STATE_KEYS.contains(&field.as_str())
            {
                continue;
            }
            content.insert(field.clone(), value.clone());
        }
        self.content = Some(content);
        Ok(())
    }

    /// Whether any network-side fact has been attached.
    pub fn has_network_data(&self) -> bool {
        self.status_code.is_some() || self.redirect.is_some() || self.server_info.is_some()
    }

    pub fn view(&self) -> PageRecordView {
        PageRecordView::from(self)
    }
}

/// Zero and non-numeric statuses are placeholders.
fn status_from(value: &Value) -> Option<u16> {
    value
        .as_u64()
        .filter(|code| (1..1000).contains(code))
        .map(|code| code as u16)
}

/// Shape rendered by the popup UI.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecordView {
    pub url: String,
    pub status_code: Option<u16>,
    pub detail_status_code: Option<u16>,
    pub redirect: Option<RedirectSummary>,
    pub web_vitals: BTreeMap<String, f64>,
    pub server_info: Option<ServerInfo>,
    pub content: Option<Map<String, Value>>,
    pub is_loading: bool,
    pub waiting_for_extraction: bool,
    pub partial_data: bool,
    pub extraction_failed: bool,
    pub is_spa_navigation: bool,
    pub navigation_source: Option<String>,
    pub error: Option<String>,
    pub last_update: LastUpdate,
}

impl From<&PageRecord> for PageRecordView {
    fn from(record: &PageRecord) -> Self {
        Self {
            url: record.url.clone(),
            status_code: record.status_code,
            detail_status_code: record.detail_status_code,
            redirect: record.redirect.clone(),
            web_vitals: record.web_vitals.clone(),
            server_info: record.server_info.clone(),
            content: record.content.clone(),
            is_loading: record.phase.is_loading(),
            waiting_for_extraction: record.phase.waiting_for_extraction(),
            partial_data: record.phase.partial_data(),
            extraction_failed: record.phase.extraction_failed(),
            is_spa_navigation: record.spa.is_spa_navigation,
            navigation_source: record
                .spa
                .navigation_source
                .map(|source| source.as_str().to_string()),
            error: record.error.clone(),
            last_update: record.last_update.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    Navigation,
    Content,
    ExtractionError,
    TimedOut,
    Redirect,
    WebVitals,
    ServerInfo,
    SpaBookkeeping,
}

/// Broadcast to popup listeners whenever a tab's current record changes.
#[derive(Clone, Debug)]
pub struct RecordNotification {
    pub tab: TabId,
    pub reason: ChangeReason,
    pub record: PageRecordView,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> PageRecord {
        PageRecord::new("https://a.test/", PagePhase::AwaitingExtraction, "test", 1)
    }

    #[test]
    fn flags_follow_phase() {
        let partial = PagePhase::AwaitingExtraction.with_network_data();
        assert!(partial.is_loading());
        assert!(partial.partial_data());
        assert!(!PagePhase::Ready.is_loading());
        let failed = PagePhase::Failed {
            message: "boom".into(),
        };
        assert!(failed.extraction_failed() && failed.partial_data() && !failed.is_loading());
        assert_eq!(PagePhase::Ready.with_network_data(), PagePhase::Ready);
    }

    #[test]
    fn existing_authoritative_fields_win() {
        let mut rec = record();
        rec.status_code = Some(301);
        rec.web_vitals.insert("LCP".into(), 1200.0);
        rec.merge_content(&json!({
            "url": "https://a.test/",
            "statusCode": 200,
            "webVitals": {"LCP": 0, "CLS": 0.02},
            "title": "Hello",
            "isLoading": true
        }))
        .unwrap();
        assert_eq!(rec.status_code, Some(301));
        assert_eq!(rec.web_vitals["LCP"], 1200.0);
        assert_eq!(rec.web_vitals["CLS"], 0.02);
        let content = rec.content.unwrap();
        assert_eq!(content["title"], "Hello");
        assert!(!content.contains_key("isLoading"));
        assert!(!content.contains_key("statusCode"));
    }

    #[test]
    fn placeholder_status_does_not_fill() {
        let mut rec = record();
        rec.merge_content(&json!({"statusCode": 0, "detailStatusCode": null}))
            .unwrap();
        assert_eq!(rec.status_code, None);
        assert_eq!(rec.detail_status_code, None);
    }

    #[test]
    fn malformed_payloads_are_merge_errors() {
        let mut rec = record();
        assert!(matches!(
            rec.merge_content(&json!(["not", "an", "object"])),
            Err(SyncError::Merge(_))
        ));
        assert!(rec.merge_content(&json!({"webVitals": 3})).is_err());
        assert!(rec.merge_content(&json!({"redirect": {"bogus": true}})).is_err());
    }

    #[test]
    fn view_uses_wire_names() {
        let rec = record();
        let value = serde_json::to_value(rec.view()).unwrap();
        assert_eq!(value["isLoading"], true);
        assert_eq!(value["waitingForExtraction"], true);
        assert_eq!(value["extractionFailed"], false);
        assert_eq!(value["lastUpdate"]["source"], "test");
    }
}
