//! The single writer of page records.
//!
//! Inputs arrive from four independent producers (navigation detection, the extractor, the
//! redirect tracker and the performance reporter) in any order. Ordering between content
//! updates of one tab is decided by a per-tab watermark, never by arrival order, and every
//! path that resolves an extraction goes through [`LoadingReset`] so that a record cannot
//! stay loading once its extraction has resolved.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use pagesync_change_detector::{NavigationEvent, NavigationSource};
use pagesync_core_types::{strip_fragment, PageKey, ServerInfo, SyncError, TabId};
use pagesync_event_bus::{EventBus, InMemoryBus};
use pagesync_redirect_tracker::RedirectFinalized;

use crate::config::ReconcilerConfig;
use crate::guard::LoadingReset;
use crate::metrics::{
    record_evictions, record_extraction_failure, record_redirect_finalized,
    record_update_accepted, record_update_stale,
};
use crate::model::{ChangeReason, PagePhase, PageRecord, PageRecordView, RecordNotification, SpaState};
use crate::persist::PersistenceSink;
use crate::store::{InMemoryPageStore, PageStore};

const TARGET: &str = "pagesync.reconciler";

/// Extractor payload for one page.
#[derive(Clone, Debug)]
pub struct ContentUpdate {
    pub tab: Option<TabId>,
    /// Must carry a non-empty `url` field.
    pub data: Value,
    pub source: String,
    pub timestamp: u64,
    /// SPA updates are already serialized per tab by their producer and skip the watermark.
    pub spa_navigation: bool,
}

impl ContentUpdate {
    pub fn new(tab: TabId, data: Value, source: impl Into<String>, timestamp: u64) -> Self {
        Self {
            tab: Some(tab),
            data,
            source: source.into(),
            timestamp,
            spa_navigation: false,
        }
    }

    pub fn spa(mut self) -> Self {
        self.spa_navigation = true;
        self
    }

    pub fn url(&self) -> Option<&str> {
        self.data
            .get("url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
    }
}

#[derive(Clone, Debug)]
pub struct ContentError {
    pub tab: Option<TabId>,
    pub url: Option<String>,
    pub error: String,
    pub source: String,
    pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum UpdateOutcome {
    Accepted(PageRecordView),
    /// Older than the tab's watermark; dropped without touching the record.
    Stale,
}

impl UpdateOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UpdateOutcome::Accepted(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// The record now awaits content; the caller should trigger the extractor.
    ExtractionRequired(PageKey),
    /// An extraction for this record is already outstanding.
    AlreadyPending(PageKey),
}

impl NavigationOutcome {
    pub fn key(&self) -> &PageKey {
        match self {
            NavigationOutcome::ExtractionRequired(key) | NavigationOutcome::AlreadyPending(key) => {
                key
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PageLookup {
    Record(PageRecordView),
    NeedsRefresh,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub timed_out: usize,
    pub expired: usize,
    pub evicted: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.expired + self.evicted
    }
}

#[derive(Clone, Debug, Default)]
struct TabNavState {
    current_url: Option<String>,
    watermark: u64,
}

pub struct Reconciler {
    config: ReconcilerConfig,
    store: Arc<dyn PageStore>,
    tabs: DashMap<TabId, TabNavState>,
    bus: Arc<dyn EventBus<RecordNotification>>,
    sinks: RwLock<Vec<Arc<dyn PersistenceSink>>>,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        let bus = InMemoryBus::new(config.notification_buffer);
        Self::with_store(config, Arc::new(InMemoryPageStore::new()), bus)
    }

    pub fn with_store(
        config: ReconcilerConfig,
        store: Arc<dyn PageStore>,
        bus: Arc<dyn EventBus<RecordNotification>>,
    ) -> Self {
        Self {
            config,
            store,
            tabs: DashMap::new(),
            bus,
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    pub fn add_sink(&self, sink: Arc<dyn PersistenceSink>) {
        self.sinks.write().push(sink);
    }

    /// Flushes every sink's buffered writes; returns how many sinks failed.
    pub fn flush_sinks(&self) -> usize {
        let mut failed = 0;
        for sink in self.sinks.read().iter() {
            if let Err(err) = sink.flush() {
                warn!(target: TARGET, sink = sink.name(), %err, "record flush failed");
                failed += 1;
            }
        }
        failed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordNotification> {
        self.bus.subscribe()
    }

    pub fn on_navigation(&self, tab: TabId, event: &NavigationEvent) -> NavigationOutcome {
        self.begin_extraction(tab, &event.url, event.source, event.detected_at)
    }

    /// A true top-level load always invalidates inferred single-page state, even when the
    /// record needs no other transition.
    pub fn observe_real_page_load(&self, tab: TabId, url: &str) -> Option<PageRecordView> {
        let key = page_key(tab, url);
        let record = self.store.update(&key, &mut |record| {
            record.spa = SpaState::default();
        })?;
        self.persist(&key, &record);
        self.notify_if_current(tab, ChangeReason::SpaBookkeeping, &record);
        Some(record.view())
    }

    /// Moves the record for `(tab, url)` into the awaiting state unless it is already
    /// waiting for content.
    pub fn begin_extraction(
        &self,
        tab: TabId,
        url: &str,
        source: NavigationSource,
        at: u64,
    ) -> NavigationOutcome {
        let key = page_key(tab, url);
        self.set_current(tab, &key.url);

        let created = Cell::new(false);
        let pending = Cell::new(false);
        let record = self.store.upsert(
            &key,
            &mut || {
                created.set(true);
                PageRecord::new(&key.url, PagePhase::AwaitingExtraction, source.as_str(), at)
            },
            &mut |record| {
                if !created.get() {
                    if record.phase.is_loading() {
                        pending.set(true);
                    } else {
                        record.phase = if record.has_network_data() {
                            PagePhase::PartiallyPopulated {
                                extraction_pending: true,
                            }
                        } else {
                            PagePhase::AwaitingExtraction
                        };
                        record.error = None;
                        record.touch(source.as_str(), at);
                    }
                }
                apply_spa_bookkeeping(record, source);
            },
        );
        self.persist(&key, &record);

        if pending.get() {
            debug!(target: TARGET, %key, source = source.as_str(), "extraction already pending");
            return NavigationOutcome::AlreadyPending(key);
        }
        debug!(target: TARGET, %key, source = source.as_str(), "record awaiting extraction");
        self.notify(tab, ChangeReason::Navigation, &record);
        NavigationOutcome::ExtractionRequired(key)
    }

    pub fn apply_content_update(&self, update: &ContentUpdate) -> Result<UpdateOutcome, SyncError> {
        let tab = update.tab.ok_or(SyncError::MissingIdentity("tab"))?;
        let url = update.url().ok_or(SyncError::MissingIdentity("url"))?;
        let key = page_key(tab, url);

        if !self.advance_watermark(tab, update.timestamp, update.spa_navigation) {
            record_update_stale();
            debug!(
                target: TARGET,
                %key,
                timestamp = update.timestamp,
                source = %update.source,
                "stale content update dropped"
            );
            return Ok(UpdateOutcome::Stale);
        }
        self.set_current(tab, &key.url);

        let mut merge_error = None;
        let record = self.store.upsert(
            &key,
            &mut || {
                PageRecord::new(
                    &key.url,
                    PagePhase::AwaitingExtraction,
                    &update.source,
                    update.timestamp,
                )
            },
            &mut |record| {
                let mut reset = LoadingReset::new(record);
                reset.touch(&update.source, update.timestamp);
                if update.spa_navigation {
                    reset.spa.is_spa_navigation = true;
                }
                match reset.merge_content(&update.data) {
                    Ok(()) => {
                        reset.error = None;
                        reset.phase = PagePhase::Ready;
                    }
                    Err(err) => {
                        reset.error = Some(err.to_string());
                        merge_error = Some(err);
                    }
                }
            },
        );

        if let Some(err) = merge_error {
            warn!(target: TARGET, %key, %err, "content merge failed; loading cleared");
        }
        record_update_accepted();
        self.persist(&key, &record);
        self.notify(tab, ChangeReason::Content, &record);
        Ok(UpdateOutcome::Accepted(record.view()))
    }

    pub fn apply_content_error(&self, error: &ContentError) -> Result<UpdateOutcome, SyncError> {
        let tab = error.tab.ok_or(SyncError::MissingIdentity("tab"))?;
        let url = error
            .url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or(SyncError::MissingIdentity("url"))?;
        let key = page_key(tab, url);

        if let Some(existing) = self.store.get(&key) {
            if !existing.phase.is_loading() && existing.last_update.timestamp > error.timestamp {
                record_update_stale();
                debug!(target: TARGET, %key, timestamp = error.timestamp, "stale extraction error dropped");
                return Ok(UpdateOutcome::Stale);
            }
        }

        let record = self.store.upsert(
            &key,
            &mut || {
                PageRecord::new(
                    &key.url,
                    PagePhase::AwaitingExtraction,
                    &error.source,
                    error.timestamp,
                )
            },
            &mut |record| {
                let mut reset = LoadingReset::new(record);
                reset.touch(&error.source, error.timestamp);
                reset.error = Some(error.error.clone());
                reset.fail_with(error.error.clone());
            },
        );
        record_extraction_failure("extractor");
        warn!(target: TARGET, %key, error = %error.error, "extraction failed");
        self.persist(&key, &record);
        self.notify_if_current(tab, ChangeReason::ExtractionError, &record);
        Ok(UpdateOutcome::Accepted(record.view()))
    }

    /// Resolves a record whose extraction request hit its deadline.
    pub fn extraction_timed_out(&self, key: &PageKey, after_ms: u64) -> Option<PageRecordView> {
        self.fail_loading(
            key,
            format!("extraction timed out after {after_ms}ms"),
            "timeout",
            ChangeReason::TimedOut,
        )
    }

    /// Called once an extraction round trip is over. A record still loading at that point
    /// (its result was dropped as stale, or never arrived) is failed. Returns whether it was.
    pub fn release_loading(&self, key: &PageKey) -> bool {
        self.fail_loading(
            key,
            "extraction finished without a usable result".to_string(),
            "discarded",
            ChangeReason::ExtractionError,
        )
        .is_some()
    }

    /// Attaches a finalized redirect chain to the record for its final URL. Loading state is
    /// left alone; replaying the same finalization leaves the record unchanged.
    pub fn apply_redirect(&self, finalized: &RedirectFinalized) -> PageRecordView {
        let tab = finalized.tab;
        let key = page_key(tab, &finalized.final_url);
        self.set_current(tab, &key.url);

        let record = self.store.upsert(
            &key,
            &mut || {
                PageRecord::new(
                    &key.url,
                    PagePhase::PartiallyPopulated {
                        extraction_pending: false,
                    },
                    "network",
                    finalized.finalized_at,
                )
            },
            &mut |record| {
                record.redirect = Some(finalized.summary.clone());
                if finalized.status_code > 0 {
                    record.status_code = Some(finalized.status_code);
                }
                if let Some(first) = finalized.summary.status_codes.first().filter(|c| **c > 0) {
                    record.detail_status_code = Some(*first);
                }
                if let Some(err) = &finalized.error {
                    if record.error.is_none() {
                        record.error = Some(format!("network error: {err}"));
                    }
                }
                record.phase = record.phase.with_network_data();
            },
        );
        record_redirect_finalized();
        info!(
            target: TARGET,
            %key,
            redirects = finalized.summary.redirect_count,
            status = finalized.status_code,
            "redirect chain attached"
        );
        self.persist(&key, &record);
        self.notify(tab, ChangeReason::Redirect, &record);
        record.view()
    }

    /// Performance reporter values are authoritative and replace earlier readings.
    pub fn apply_web_vitals(
        &self,
        key: &PageKey,
        metrics: &BTreeMap<String, f64>,
        at: u64,
    ) -> PageRecordView {
        let key = page_key(key.tab, &key.url);
        let record = self.store.upsert(
            &key,
            &mut || {
                PageRecord::new(
                    &key.url,
                    PagePhase::PartiallyPopulated {
                        extraction_pending: false,
                    },
                    "performance",
                    at,
                )
            },
            &mut |record| {
                for (metric, value) in metrics {
                    if value.is_finite() {
                        record.web_vitals.insert(metric.clone(), *value);
                    } else {
                        trace!(target: TARGET, %metric, "non-finite vital skipped");
                    }
                }
            },
        );
        self.persist(&key, &record);
        self.notify_if_current(key.tab, ChangeReason::WebVitals, &record);
        record.view()
    }

    pub fn apply_server_info(&self, key: &PageKey, info: &ServerInfo, at: u64) -> PageRecordView {
        let key = page_key(key.tab, &key.url);
        let record = self.store.upsert(
            &key,
            &mut || {
                PageRecord::new(
                    &key.url,
                    PagePhase::PartiallyPopulated {
                        extraction_pending: false,
                    },
                    "network",
                    at,
                )
            },
            &mut |record| {
                if record.status_code.is_none() {
                    record.status_code = info.status_code.filter(|code| *code > 0);
                }
                record.server_info = Some(info.clone());
                record.phase = record.phase.with_network_data();
            },
        );
        self.persist(&key, &record);
        self.notify_if_current(key.tab, ChangeReason::ServerInfo, &record);
        record.view()
    }

    pub fn spa_navigation_processed(
        &self,
        tab: TabId,
        url: &str,
        source: Option<NavigationSource>,
    ) -> Option<PageRecordView> {
        let key = page_key(tab, url);
        let record = self.store.update(&key, &mut |record| {
            record.spa.is_spa_navigation = true;
            if source.is_some() {
                record.spa.navigation_source = source;
            }
        })?;
        self.persist(&key, &record);
        self.notify_if_current(tab, ChangeReason::SpaBookkeeping, &record);
        Some(record.view())
    }

    /// Informational only.
    pub fn spa_navigation_skipped(&self, tab: TabId, url: &str, source: Option<NavigationSource>) {
        trace!(
            target: TARGET,
            %tab,
            url,
            source = source.map(|s| s.as_str()).unwrap_or("unknown"),
            "spa navigation skipped by content side"
        );
    }

    /// Record for `url`, or for the tab's current page when no URL is given.
    pub fn get_page_data(&self, tab: TabId, url: Option<&str>) -> PageLookup {
        let url = match url {
            Some(url) => strip_fragment(url).to_string(),
            None => match self.current_url(tab) {
                Some(url) => url,
                None => return PageLookup::NeedsRefresh,
            },
        };
        match self.store.get(&PageKey::new(tab, url)) {
            Some(record) => PageLookup::Record(record.view()),
            None => PageLookup::NeedsRefresh,
        }
    }

    pub fn current_url(&self, tab: TabId) -> Option<String> {
        self.tabs
            .get(&tab)
            .and_then(|state| state.current_url.clone())
    }

    pub fn current_record(&self, tab: TabId) -> Option<PageRecordView> {
        let url = self.current_url(tab)?;
        self.store
            .get(&PageKey::new(tab, url))
            .map(|record| record.view())
    }

    pub fn record(&self, key: &PageKey) -> Option<PageRecordView> {
        self.store.get(key).map(|record| record.view())
    }

    /// Drops every record and all bookkeeping for the tab.
    pub fn close_tab(&self, tab: TabId) -> usize {
        let keys = self.store.remove_tab(tab);
        self.tabs.remove(&tab);
        for key in &keys {
            self.forget(key);
        }
        info!(target: TARGET, %tab, removed = keys.len(), "tab closed");
        keys.len()
    }

    /// Fails records stuck loading past the deadline, then evicts expired records and, per
    /// tab, the oldest beyond `max_urls_per_tab`. A tab's current record is never evicted.
    pub fn sweep(&self, now: u64) -> SweepReport {
        let mut report = SweepReport::default();
        let deadline = self.config.loading_deadline_ms;

        let mut by_tab: BTreeMap<TabId, Vec<(PageKey, u64)>> = BTreeMap::new();
        for (key, record) in self.store.snapshot() {
            if record.phase.is_loading()
                && now.saturating_sub(record.last_update.timestamp) > deadline
            {
                let message = format!("no extraction result within {deadline}ms");
                if self
                    .fail_loading(&key, message, "deadline", ChangeReason::TimedOut)
                    .is_some()
                {
                    report.timed_out += 1;
                }
            }
            by_tab
                .entry(key.tab)
                .or_default()
                .push((key, record.last_update.timestamp));
        }

        for (tab, mut entries) in by_tab {
            let mut remaining = entries.len();
            let current = self.current_url(tab);
            entries.retain(|(key, _)| current.as_deref() != Some(key.url.as_str()));
            entries.sort_by_key(|(_, updated)| *updated);
            for (key, updated) in entries {
                let expired = now.saturating_sub(updated) > self.config.record_ttl_ms;
                let over_limit = remaining > self.config.max_urls_per_tab;
                if !expired && !over_limit {
                    continue;
                }
                if self.store.delete(&key).is_none() {
                    continue;
                }
                self.forget(&key);
                remaining -= 1;
                if expired {
                    report.expired += 1;
                } else {
                    report.evicted += 1;
                }
            }
        }

        if report.removed() > 0 || report.timed_out > 0 {
            record_evictions(report.removed());
            debug!(
                target: TARGET,
                timed_out = report.timed_out,
                expired = report.expired,
                evicted = report.evicted,
                "sweep finished"
            );
        }
        report
    }

    fn fail_loading(
        &self,
        key: &PageKey,
        message: String,
        reason: &'static str,
        change: ChangeReason,
    ) -> Option<PageRecordView> {
        let mut resolved = false;
        let record = self.store.update(key, &mut |record| {
            if record.phase.is_loading() {
                let mut reset = LoadingReset::new(record);
                reset.error = Some(message.clone());
                reset.fail_with(message.clone());
                resolved = true;
            }
        })?;
        if !resolved {
            return None;
        }
        record_extraction_failure(reason);
        warn!(target: TARGET, %key, reason, "loading record failed");
        self.persist(key, &record);
        self.notify_if_current(key.tab, change, &record);
        Some(record.view())
    }

    /// Returns false when the update is older than the tab's watermark.
    fn advance_watermark(&self, tab: TabId, timestamp: u64, spa_navigation: bool) -> bool {
        let mut state = self.tabs.entry(tab).or_default();
        if timestamp < state.watermark && !spa_navigation {
            return false;
        }
        state.watermark = state.watermark.max(timestamp);
        true
    }

    fn set_current(&self, tab: TabId, url: &str) {
        self.tabs.entry(tab).or_default().current_url = Some(url.to_string());
    }

    fn is_current(&self, tab: TabId, url: &str) -> bool {
        self.tabs
            .get(&tab)
            .map(|state| state.current_url.as_deref() == Some(url))
            .unwrap_or(false)
    }

    fn persist(&self, key: &PageKey, record: &PageRecord) {
        for sink in self.sinks.read().iter() {
            if let Err(err) = sink.put(key, record) {
                warn!(target: TARGET, sink = sink.name(), %key, %err, "persist failed");
            }
        }
    }

    fn forget(&self, key: &PageKey) {
        for sink in self.sinks.read().iter() {
            if let Err(err) = sink.remove(key) {
                warn!(target: TARGET, sink = sink.name(), %key, %err, "persisted record not removed");
            }
        }
    }

    fn notify_if_current(&self, tab: TabId, reason: ChangeReason, record: &PageRecord) {
        if self.is_current(tab, &record.url) {
            self.notify(tab, reason, record);
        }
    }

    fn notify(&self, tab: TabId, reason: ChangeReason, record: &PageRecord) {
        let delivery = self.bus.publish(RecordNotification {
            tab,
            reason,
            record: record.view(),
        });
        if !delivery.delivered() {
            debug!(target: TARGET, %tab, ?reason, "no popup listening");
        }
    }
}

fn page_key(tab: TabId, url: &str) -> PageKey {
    PageKey::new(tab, strip_fragment(url))
}

/// A real load resets SPA state; client-side sources record themselves; anything else
/// leaves the previous bookkeeping in place.
fn apply_spa_bookkeeping(record: &mut PageRecord, source: NavigationSource) {
    if source.is_real_load() {
        record.spa = SpaState::default();
    } else if source.is_spa() {
        record.spa = SpaState {
            is_spa_navigation: true,
            navigation_source: Some(source),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reconciler() -> Reconciler {
        Reconciler::new(ReconcilerConfig::default())
    }

    fn nav(url: &str, source: NavigationSource, at: u64) -> NavigationEvent {
        NavigationEvent::new(url, source, at)
    }

    #[test]
    fn navigation_on_loading_record_is_pending() {
        let rec = reconciler();
        let tab = TabId(1);
        let first = rec.on_navigation(tab, &nav("https://a.test/x", NavigationSource::HistoryPush, 10));
        assert!(matches!(first, NavigationOutcome::ExtractionRequired(_)));
        let second = rec.on_navigation(tab, &nav("https://a.test/x#frag", NavigationSource::UrlPoll, 20));
        assert_eq!(second, NavigationOutcome::AlreadyPending(first.key().clone()));
        let view = rec.current_record(tab).unwrap();
        assert_eq!(view.navigation_source.as_deref(), Some("url-poll"));
    }

    #[test]
    fn real_load_wipes_spa_state_even_while_pending() {
        let rec = reconciler();
        let tab = TabId(2);
        rec.on_navigation(tab, &nav("https://a.test/", NavigationSource::HistoryPush, 1));
        assert!(rec.current_record(tab).unwrap().is_spa_navigation);
        let view = rec.observe_real_page_load(tab, "https://a.test/").unwrap();
        assert!(!view.is_spa_navigation);
        assert_eq!(view.navigation_source, None);
        assert!(view.is_loading);
        assert!(rec.observe_real_page_load(tab, "https://a.test/missing").is_none());
    }

    #[test]
    fn idle_navigation_preserves_spa_bookkeeping() {
        let rec = reconciler();
        let tab = TabId(3);
        rec.on_navigation(tab, &nav("https://a.test/", NavigationSource::Pop, 1));
        rec.apply_content_update(&ContentUpdate::new(tab, json!({"url": "https://a.test/"}), "content", 2))
            .unwrap();
        rec.on_navigation(tab, &nav("https://a.test/", NavigationSource::InitialIdle, 3));
        let view = rec.current_record(tab).unwrap();
        assert!(view.is_spa_navigation);
        assert_eq!(view.navigation_source.as_deref(), Some("pop"));
        assert!(view.is_loading);
    }

    #[test]
    fn missing_identity_rejected_before_mutation() {
        let rec = reconciler();
        let mut update = ContentUpdate::new(TabId(1), json!({"title": "x"}), "content", 1);
        assert_eq!(
            rec.apply_content_update(&update),
            Err(SyncError::MissingIdentity("url"))
        );
        update.tab = None;
        update.data = json!({"url": "https://a.test/"});
        assert_eq!(
            rec.apply_content_update(&update),
            Err(SyncError::MissingIdentity("tab"))
        );
        assert!(rec.store().is_empty());
    }

    #[test]
    fn merge_failure_still_clears_loading() {
        let rec = reconciler();
        let tab = TabId(4);
        rec.on_navigation(tab, &nav("https://a.test/", NavigationSource::InitialLoad, 1));
        let outcome = rec
            .apply_content_update(&ContentUpdate::new(
                tab,
                json!({"url": "https://a.test/", "webVitals": "garbage"}),
                "content",
                2,
            ))
            .unwrap();
        let UpdateOutcome::Accepted(view) = outcome else {
            panic!("expected acceptance");
        };
        assert!(!view.is_loading);
        assert!(!view.waiting_for_extraction);
        assert!(view.error.unwrap().contains("webVitals"));
    }

    #[test]
    fn server_info_fills_missing_status_only() {
        let rec = reconciler();
        let key = PageKey::new(TabId(5), "https://a.test/");
        let info = ServerInfo {
            server: Some("nginx".into()),
            content_type: Some("text/html".into()),
            status_code: Some(200),
        };
        let view = rec.apply_server_info(&key, &info, 5);
        assert_eq!(view.status_code, Some(200));
        assert!(view.partial_data);
        assert!(!view.is_loading);
    }

    #[test]
    fn web_vitals_overwrite_earlier_readings() {
        let rec = reconciler();
        let key = PageKey::new(TabId(6), "https://a.test/");
        let mut metrics = BTreeMap::new();
        metrics.insert("LCP".to_string(), 2500.0);
        rec.apply_web_vitals(&key, &metrics, 1);
        metrics.insert("LCP".to_string(), 1800.0);
        metrics.insert("CLS".to_string(), f64::NAN);
        let view = rec.apply_web_vitals(&key, &metrics, 2);
        assert_eq!(view.web_vitals.get("LCP"), Some(&1800.0));
        assert!(!view.web_vitals.contains_key("CLS"));
    }

    #[test]
    fn spa_processed_marks_existing_record() {
        let rec = reconciler();
        let tab = TabId(7);
        assert!(rec
            .spa_navigation_processed(tab, "https://a.test/", Some(NavigationSource::HistoryPush))
            .is_none());
        rec.on_navigation(tab, &nav("https://a.test/", NavigationSource::InitialLoad, 1));
        let view = rec
            .spa_navigation_processed(tab, "https://a.test/", Some(NavigationSource::HistoryReplace))
            .unwrap();
        assert!(view.is_spa_navigation);
        assert_eq!(view.navigation_source.as_deref(), Some("history-replace"));
    }

    #[test]
    fn page_data_lookup_falls_back_to_current() {
        let rec = reconciler();
        let tab = TabId(8);
        assert_eq!(rec.get_page_data(tab, None), PageLookup::NeedsRefresh);
        rec.on_navigation(tab, &nav("https://a.test/p", NavigationSource::InitialLoad, 1));
        assert!(matches!(rec.get_page_data(tab, None), PageLookup::Record(_)));
        assert!(matches!(
            rec.get_page_data(tab, Some("https://a.test/p#top")),
            PageLookup::Record(_)
        ));
        assert_eq!(
            rec.get_page_data(tab, Some("https://a.test/other")),
            PageLookup::NeedsRefresh
        );
    }
}
