use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pagesync_core_types::{now_ms, strip_fragment};

use crate::config::DetectorConfig;
use crate::model::{DocumentView, DomSnapshot, NavigationEvent, NavigationSource};
use crate::signals::{NavigationSignal, NavigationSignalSource, SignalSender};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetectionOutcome {
    Emitted(NavigationEvent),
    Unchanged,
    /// A navigation for this URL is still being processed downstream.
    InFlight,
}

/// Compares the live document against the last processed snapshot.
pub struct ChangeDetector {
    document: Arc<dyn DocumentView>,
    config: DetectorConfig,
    last_processed: Mutex<Option<DomSnapshot>>,
    last_seen_url: Mutex<Option<String>>,
    in_flight: DashMap<String, u64>,
}

impl ChangeDetector {
    pub fn new(document: Arc<dyn DocumentView>, config: DetectorConfig) -> Arc<Self> {
        Arc::new(Self {
            document,
            config,
            last_processed: Mutex::new(None),
            last_seen_url: Mutex::new(None),
            in_flight: DashMap::new(),
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Attaches every source it can. Failures are logged and skipped; polling keeps working
    /// even if nothing attaches.
    pub fn attach_sources(
        &self,
        sources: &[Arc<dyn NavigationSignalSource>],
        sender: &SignalSender,
    ) -> usize {
        let mut attached = 0;
        for source in sources {
            match source.attach(sender.clone()) {
                Ok(()) => {
                    attached += 1;
                    debug!(target: "pagesync.detector", source = source.name(), "signal source attached");
                }
                Err(err) => {
                    warn!(
                        target: "pagesync.detector",
                        source = source.name(),
                        %err,
                        "signal source failed to attach; continuing with remaining mechanisms"
                    );
                }
            }
        }
        attached
    }

    /// Runs one change check. `forced` bypasses the in-flight guard.
    pub fn check(&self, source: NavigationSource, forced: bool) -> DetectionOutcome {
        let href = self.document.href();
        let url = strip_fragment(&href).to_string();

        if !forced && self.in_flight.contains_key(&url) {
            debug!(target: "pagesync.detector", %url, source = source.as_str(), "navigation already in flight");
            return DetectionOutcome::InFlight;
        }

        let current = DomSnapshot::capture(self.document.as_ref(), &self.config);
        let url_changed = self.last_seen_url.lock().as_deref() != Some(url.as_str());

        let mut last = self.last_processed.lock();
        let significant = match last.as_ref() {
            None => true,
            Some(previous) => {
                (source == NavigationSource::UrlPoll && url_changed)
                    || self.config.policy.evaluate(previous, &current)
            }
        };
        if !significant {
            return DetectionOutcome::Unchanged;
        }
        *last = Some(current);
        drop(last);
        // Only an emitted check consumes a URL move; the poll still sees unprocessed moves.
        self.record_seen_url(&url);

        let detected_at = now_ms();
        self.in_flight.insert(url.clone(), detected_at);
        info!(target: "pagesync.detector", %url, source = source.as_str(), forced, "navigation detected");
        DetectionOutcome::Emitted(NavigationEvent {
            url,
            source,
            detected_at,
            forced,
        })
    }

    /// Polling fallback: only does work when the fragment-less URL moved since the last
    /// observation.
    pub fn poll(&self) -> Option<DetectionOutcome> {
        let href = self.document.href();
        let url = strip_fragment(&href);
        let moved = self.last_seen_url.lock().as_deref() != Some(url);
        if !moved {
            return None;
        }
        Some(self.check(NavigationSource::UrlPoll, true))
    }

    pub fn handle_signal(&self, signal: &NavigationSignal) -> DetectionOutcome {
        self.check(signal.source(), signal.forces_check())
    }

    /// Releases the in-flight guard once downstream processing for `url` resolved.
    pub fn finish(&self, url: &str) -> bool {
        self.in_flight.remove(strip_fragment(url)).is_some()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    fn record_seen_url(&self, url: &str) {
        *self.last_seen_url.lock() = Some(url.to_string());
    }

    /// Spawns the detection loop: an initial check, signal handling, the URL poll ticker and
    /// a one-shot idle re-check.
    pub fn spawn(
        self: &Arc<Self>,
        mut signals: mpsc::UnboundedReceiver<NavigationSignal>,
        events: mpsc::Sender<NavigationEvent>,
    ) -> DetectorHandle {
        let detector = Arc::clone(self);
        let cancel = CancellationToken::new();
        let loop_token = cancel.clone();
        let poll_every = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let idle_after = Duration::from_millis(self.config.idle_check_delay_ms);
        let task = tokio::spawn(async move {
            let initial = detector.check(NavigationSource::InitialLoad, true);
            detector.dispatch(initial, &events).await;

            let mut ticker = interval(poll_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            let idle = sleep(idle_after);
            tokio::pin!(idle);
            let mut idle_done = false;
            let mut signals_open = true;

            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = &mut idle, if !idle_done => {
                        idle_done = true;
                        let outcome = detector.check(NavigationSource::InitialIdle, false);
                        detector.dispatch(outcome, &events).await;
                    }
                    signal = signals.recv(), if signals_open => match signal {
                        Some(signal) => {
                            let outcome = detector.handle_signal(&signal);
                            detector.dispatch(outcome, &events).await;
                        }
                        None => {
                            debug!(target: "pagesync.detector", "signal channel closed; polling only");
                            signals_open = false;
                        }
                    },
                    _ = ticker.tick() => {
                        if let Some(outcome) = detector.poll() {
                            detector.dispatch(outcome, &events).await;
                        }
                    }
                }
            }
            debug!(target: "pagesync.detector", "detection loop exited");
        });
        DetectorHandle {
            cancel,
            task: Some(task),
        }
    }

    async fn dispatch(&self, outcome: DetectionOutcome, events: &mpsc::Sender<NavigationEvent>) {
        if let DetectionOutcome::Emitted(event) = outcome {
            let url = event.url.clone();
            if events.send(event).await.is_err() {
                warn!(target: "pagesync.detector", %url, "navigation consumer gone; dropping event");
                self.finish(&url);
            }
        }
    }
}

/// Handle returned by [`ChangeDetector::spawn`].
pub struct DetectorHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DetectorHandle {
    pub async fn shutdown(mut self) -> Result<(), tokio::task::JoinError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(_) => Ok(()),
                Err(err) if err.is_cancelled() => Ok(()),
                Err(err) => Err(err),
            }
        } else {
            Ok(())
        }
    }
}

impl Drop for DetectorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
