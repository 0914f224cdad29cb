//! Coordinator wiring detection, redirect tracking and the reconciler to the extractor.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pagesync_change_detector::{
    ChangeDetector, DetectorHandle, NavigationEvent, NavigationSignal, NavigationSource,
};
use pagesync_core_types::{now_ms, strip_fragment, PageKey, SyncError, TabId};
use pagesync_extensions_bridge::{
    with_deadline, BridgeError, ContentPayload, Envelope, Extractor, Message,
};
use pagesync_redirect_tracker::{NetworkEvent, RedirectTracker};
use pagesync_state_center::{
    ContentError, ContentUpdate, JsonFileSink, MemorySink, NavigationOutcome, PageLookup,
    PageRecordView, Reconciler, SweepReport, UpdateOutcome,
};

use crate::config::AppConfig;

const TARGET: &str = "pagesync.engine";

/// Reply to a channel message that expects one.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EngineResponse {
    Ack {
        accepted: bool,
    },
    PageData {
        data: PageRecordView,
    },
    /// No record yet; an extraction was started when the URL was known.
    NeedsRefresh {
        #[serde(rename = "needsRefresh")]
        needs_refresh: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    ExtractionStarted {
        started: bool,
    },
}

/// How one extraction round trip ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtractionResolution {
    Applied,
    Stale,
    ExtractorFailed,
    TimedOut,
    /// The tab closed while the extractor was still working; nothing was applied.
    Cancelled,
    Rejected(SyncError),
}

/// One running extraction. `close_tab` cancels it through `cancel`.
struct InFlight {
    id: u64,
    started_at: u64,
    cancel: CancellationToken,
}

pub struct SyncEngine {
    config: AppConfig,
    reconciler: Arc<Reconciler>,
    tracker: Arc<RedirectTracker>,
    extractor: Arc<dyn Extractor>,
    in_flight: DashMap<PageKey, InFlight>,
    next_extraction: AtomicU64,
    local_mirror: Arc<MemorySink>,
}

impl SyncEngine {
    pub fn new(config: AppConfig, extractor: Arc<dyn Extractor>) -> Result<Arc<Self>, SyncError> {
        let reconciler = Arc::new(Reconciler::new(config.reconciler.clone()));
        let local_mirror = Arc::new(MemorySink::new());
        reconciler.add_sink(local_mirror.clone());
        if let Some(path) = &config.engine.records_path {
            reconciler.add_sink(Arc::new(JsonFileSink::open(path)?));
            info!(target: TARGET, path = %path.display(), "durable record sink enabled");
        }
        let tracker = Arc::new(RedirectTracker::new(config.redirect.clone()));
        Ok(Arc::new(Self {
            config,
            reconciler,
            tracker,
            extractor,
            in_flight: DashMap::new(),
            next_extraction: AtomicU64::new(1),
            local_mirror,
        }))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn tracker(&self) -> &Arc<RedirectTracker> {
        &self.tracker
    }

    pub fn local_mirror(&self) -> &Arc<MemorySink> {
        &self.local_mirror
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Applies a detected navigation and starts an extraction when the record needs one.
    pub fn handle_navigation(
        self: &Arc<Self>,
        tab: TabId,
        event: &NavigationEvent,
    ) -> (NavigationOutcome, Option<JoinHandle<ExtractionResolution>>) {
        let outcome = self.reconciler.on_navigation(tab, event);
        self.reuse_recent_redirect(tab, &outcome.key().url, event.detected_at);
        let extraction = match &outcome {
            NavigationOutcome::ExtractionRequired(key) => self.trigger_extraction(key.clone(), false),
            NavigationOutcome::AlreadyPending(key) if event.forced => {
                self.trigger_extraction(key.clone(), false)
            }
            NavigationOutcome::AlreadyPending(_) => None,
        };
        (outcome, extraction)
    }

    /// Feeds one main-frame network event to the tracker and applies a finalized chain.
    pub fn handle_network(&self, tab: TabId, event: NetworkEvent, at: u64) -> Option<PageRecordView> {
        let finalized = self.tracker.ingest(tab, event, at)?;
        let mut view = self.reconciler.apply_redirect(&finalized);
        let key = PageKey::new(tab, strip_fragment(&finalized.final_url));
        if let Some(info) = &finalized.server_info {
            view = self.reconciler.apply_server_info(&key, info, at);
        }
        if finalized.error.is_none() {
            if let Some(cleared) = self.reconciler.observe_real_page_load(tab, &key.url) {
                view = cleared;
            }
        }
        Some(view)
    }

    pub fn handle_web_vitals(
        &self,
        tab: TabId,
        url: &str,
        vitals: &BTreeMap<String, f64>,
        at: u64,
    ) -> PageRecordView {
        let key = PageKey::new(tab, strip_fragment(url));
        self.reconciler.apply_web_vitals(&key, vitals, at)
    }

    pub fn handle_message(
        self: &Arc<Self>,
        envelope: Envelope,
    ) -> Result<Option<EngineResponse>, SyncError> {
        let tab = envelope.tab;
        debug!(target: TARGET, action = envelope.message.action(), ?tab, "message received");
        match envelope.message {
            Message::ContentUpdate {
                data,
                source,
                timestamp,
                spa_navigation,
            } => {
                let outcome = self.reconciler.apply_content_update(&ContentUpdate {
                    tab,
                    data,
                    source,
                    timestamp,
                    spa_navigation,
                })?;
                Ok(Some(EngineResponse::Ack {
                    accepted: outcome.is_accepted(),
                }))
            }
            Message::ContentExtractionError {
                url,
                error,
                source,
                timestamp,
            } => {
                let outcome = self.reconciler.apply_content_error(&ContentError {
                    tab,
                    url,
                    error,
                    source,
                    timestamp,
                })?;
                Ok(Some(EngineResponse::Ack {
                    accepted: outcome.is_accepted(),
                }))
            }
            Message::SpaNavigationProcessed { url, source } => {
                let tab = tab.ok_or(SyncError::MissingIdentity("tab"))?;
                let source = source.as_deref().and_then(NavigationSource::parse);
                let updated = self.reconciler.spa_navigation_processed(tab, &url, source);
                Ok(Some(EngineResponse::Ack {
                    accepted: updated.is_some(),
                }))
            }
            Message::SpaNavigationSkipped { url, source } => {
                let tab = tab.ok_or(SyncError::MissingIdentity("tab"))?;
                let source = source.as_deref().and_then(NavigationSource::parse);
                self.reconciler.spa_navigation_skipped(tab, &url, source);
                Ok(None)
            }
            Message::ExtractSeoData { force_refresh } => {
                let tab = tab.ok_or(SyncError::MissingIdentity("tab"))?;
                let url = self
                    .reconciler
                    .current_url(tab)
                    .ok_or(SyncError::MissingIdentity("url"))?;
                let outcome =
                    self.reconciler
                        .begin_extraction(tab, &url, NavigationSource::InitialIdle, now_ms());
                let started = match outcome {
                    NavigationOutcome::ExtractionRequired(key) => {
                        self.trigger_extraction(key, force_refresh).is_some()
                    }
                    NavigationOutcome::AlreadyPending(key) if force_refresh => {
                        self.trigger_extraction(key, true).is_some()
                    }
                    NavigationOutcome::AlreadyPending(_) => false,
                };
                Ok(Some(EngineResponse::ExtractionStarted { started }))
            }
            Message::GetSeoData { url } => {
                let tab = tab.ok_or(SyncError::MissingIdentity("tab"))?;
                match self.reconciler.get_page_data(tab, url.as_deref()) {
                    PageLookup::Record(data) => Ok(Some(EngineResponse::PageData { data })),
                    PageLookup::NeedsRefresh => {
                        let url = url.or_else(|| self.reconciler.current_url(tab));
                        if let Some(url) = &url {
                            let outcome = self.reconciler.begin_extraction(
                                tab,
                                url,
                                NavigationSource::InitialIdle,
                                now_ms(),
                            );
                            if let NavigationOutcome::ExtractionRequired(key) = outcome {
                                self.trigger_extraction(key, false);
                            }
                        }
                        Ok(Some(EngineResponse::NeedsRefresh {
                            needs_refresh: true,
                            url,
                        }))
                    }
                }
            }
        }
    }

    /// Spawns an extraction unless one is already in flight for the same page; duplicates
    /// are dropped, not queued.
    pub fn trigger_extraction(
        self: &Arc<Self>,
        key: PageKey,
        force_refresh: bool,
    ) -> Option<JoinHandle<ExtractionResolution>> {
        let (id, cancel) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(running) => {
                debug!(
                    target: TARGET,
                    %key,
                    started_at = running.get().started_at,
                    "extraction already in flight; trigger dropped"
                );
                return None;
            }
            Entry::Vacant(slot) => {
                let id = self.next_extraction.fetch_add(1, Ordering::Relaxed);
                let cancel = CancellationToken::new();
                slot.insert(InFlight {
                    id,
                    started_at: now_ms(),
                    cancel: cancel.clone(),
                });
                (id, cancel)
            }
        };
        let engine = Arc::clone(self);
        Some(tokio::spawn(async move {
            engine.run_extraction(key, force_refresh, id, cancel).await
        }))
    }

    /// One extraction round trip under the request deadline. The in-flight entry is taken
    /// by the caller and released here on every path; a cancelled round trip applies nothing.
    async fn run_extraction(
        &self,
        key: PageKey,
        force_refresh: bool,
        id: u64,
        cancel: CancellationToken,
    ) -> ExtractionResolution {
        let _release = InFlightRelease {
            in_flight: &self.in_flight,
            key: key.clone(),
            id,
        };
        let limit = self.config.bridge.request();
        let request = with_deadline(
            "extract_seo_data",
            limit,
            self.extractor.extract(key.tab, &key.url, force_refresh),
        );
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(target: TARGET, %key, "extraction cancelled");
                return ExtractionResolution::Cancelled;
            }
            outcome = request => outcome,
        };
        if cancel.is_cancelled() {
            debug!(target: TARGET, %key, "extraction cancelled after the extractor answered");
            return ExtractionResolution::Cancelled;
        }

        let resolution = match outcome {
            Ok(payload) => self.apply_payload(&key, payload),
            Err(BridgeError::Timeout { after_ms, .. }) => {
                self.reconciler.extraction_timed_out(&key, after_ms);
                ExtractionResolution::TimedOut
            }
            Err(err) => {
                let reported = self.reconciler.apply_content_error(&ContentError {
                    tab: Some(key.tab),
                    url: Some(key.url.clone()),
                    error: err.to_string(),
                    source: "extractor".into(),
                    timestamp: now_ms(),
                });
                match reported {
                    Ok(_) => ExtractionResolution::ExtractorFailed,
                    Err(err) => ExtractionResolution::Rejected(err),
                }
            }
        };

        if self.reconciler.release_loading(&key) {
            warn!(target: TARGET, %key, ?resolution, "extraction left the record loading; failed it");
        }
        debug!(target: TARGET, %key, ?resolution, "extraction resolved");
        resolution
    }

    fn apply_payload(&self, key: &PageKey, payload: ContentPayload) -> ExtractionResolution {
        let ContentPayload {
            mut data,
            source,
            timestamp,
        } = payload;
        if let Some(fields) = data.as_object_mut() {
            fields
                .entry("url")
                .or_insert_with(|| serde_json::Value::String(key.url.clone()));
        }
        let update = ContentUpdate {
            tab: Some(key.tab),
            data,
            source,
            timestamp,
            spa_navigation: false,
        };
        match self.reconciler.apply_content_update(&update) {
            Ok(UpdateOutcome::Accepted(_)) => ExtractionResolution::Applied,
            Ok(UpdateOutcome::Stale) => ExtractionResolution::Stale,
            Err(err) => {
                warn!(target: TARGET, %key, %err, "extractor payload rejected");
                ExtractionResolution::Rejected(err)
            }
        }
    }

    /// A finalized chain still inside the recency window is re-attached to a navigation on
    /// its final URL; older chains are left alone.
    fn reuse_recent_redirect(&self, tab: TabId, url: &str, at: u64) {
        if let Some(finalized) = self.tracker.recent_summary(tab, at) {
            if finalized.final_url == url {
                self.reconciler.apply_redirect(&finalized);
            }
        }
    }

    /// Runs a detector for `tab`, feeding its events through [`SyncEngine::handle_navigation`]
    /// and releasing the detector's in-flight guard once each extraction resolves.
    pub fn attach_detector(
        self: &Arc<Self>,
        tab: TabId,
        detector: Arc<ChangeDetector>,
        signals: mpsc::UnboundedReceiver<NavigationSignal>,
    ) -> DetectorBinding {
        let (events_tx, mut events_rx) = mpsc::channel::<NavigationEvent>(32);
        let detector_handle = detector.spawn(signals, events_tx);
        let engine = Arc::clone(self);
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let (_, extraction) = engine.handle_navigation(tab, &event);
                let detector = Arc::clone(&detector);
                match extraction {
                    Some(handle) => {
                        tokio::spawn(async move {
                            if let Err(err) = handle.await {
                                warn!(target: TARGET, %err, "extraction task failed");
                            }
                            detector.finish(&event.url);
                        });
                    }
                    None => {
                        detector.finish(&event.url);
                    }
                }
            }
            debug!(target: TARGET, %tab, "detector stream ended");
        });
        DetectorBinding {
            detector: Some(detector_handle),
            forwarder: Some(forwarder),
        }
    }

    /// Cancels the tab's running extractions before dropping its chains and records, so a
    /// late extractor answer cannot bring the tab back.
    pub fn close_tab(&self, tab: TabId) -> usize {
        self.in_flight.retain(|key, running| {
            if key.tab == tab {
                running.cancel.cancel();
                false
            } else {
                true
            }
        });
        self.tracker.close_tab(tab);
        self.reconciler.close_tab(tab)
    }

    /// Writes buffered record changes to the durable sinks. Blocking; async callers go
    /// through [`SyncEngine::flush_records_async`].
    pub fn flush_records(&self) -> usize {
        self.reconciler.flush_sinks()
    }

    pub async fn flush_records_async(self: &Arc<Self>) -> usize {
        let engine = Arc::clone(self);
        match tokio::task::spawn_blocking(move || engine.flush_records()).await {
            Ok(failed) => failed,
            Err(err) => {
                warn!(target: TARGET, %err, "record flush task failed");
                1
            }
        }
    }

    /// One janitor pass over records and redirect chains.
    pub fn sweep(&self, now: u64) -> SweepReport {
        let report = self.reconciler.sweep(now);
        let chains = self.tracker.sweep(now);
        if chains > 0 {
            debug!(target: TARGET, chains, "stale redirect chains dropped");
        }
        report
    }

    pub fn spawn_janitor(self: &Arc<Self>) -> JanitorHandle {
        let engine = Arc::clone(self);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let every = Duration::from_millis(self.config.reconciler.sweep_interval_ms.max(1));
        let flush_every = self.config.engine.flush_interval();
        let task = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            let mut flusher = interval(flush_every);
            flusher.set_missed_tick_behavior(MissedTickBehavior::Skip);
            flusher.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        engine.flush_records_async().await;
                        break;
                    }
                    _ = flusher.tick() => {
                        engine.flush_records_async().await;
                    }
                    _ = ticker.tick() => {
                        let report = engine.sweep(now_ms());
                        if report.removed() > 0 || report.timed_out > 0 {
                            info!(
                                target: TARGET,
                                removed = report.removed(),
                                timed_out = report.timed_out,
                                "janitor pass"
                            );
                        }
                    }
                }
            }
        });
        JanitorHandle {
            cancel,
            task: Some(task),
        }
    }
}

struct InFlightRelease<'a> {
    in_flight: &'a DashMap<PageKey, InFlight>,
    key: PageKey,
    id: u64,
}

impl Drop for InFlightRelease<'_> {
    fn drop(&mut self) {
        // A newer extraction for the same page may already own the slot.
        self.in_flight
            .remove_if(&self.key, |_, running| running.id == self.id);
    }
}

/// Handle returned by [`SyncEngine::spawn_janitor`].
pub struct JanitorHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl JanitorHandle {
    pub async fn shutdown(mut self) -> Result<(), tokio::task::JoinError> {
        self.cancel.cancel();
        match self.task.take() {
            Some(task) => match task.await {
                Ok(()) => Ok(()),
                Err(err) if err.is_cancelled() => Ok(()),
                Err(err) => Err(err),
            },
            None => Ok(()),
        }
    }
}

impl Drop for JanitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Keeps a detector loop and its event forwarder alive for one tab.
pub struct DetectorBinding {
    detector: Option<DetectorHandle>,
    forwarder: Option<JoinHandle<()>>,
}

impl DetectorBinding {
    pub async fn shutdown(mut self) {
        if let Some(detector) = self.detector.take() {
            if let Err(err) = detector.shutdown().await {
                warn!(target: TARGET, %err, "detector loop did not stop cleanly");
            }
        }
        if let Some(forwarder) = self.forwarder.take() {
            let _ = forwarder.await;
        }
    }
}

impl Drop for DetectorBinding {
    fn drop(&mut self) {
        self.detector.take();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}
