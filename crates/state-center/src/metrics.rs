use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounter, IntCounterVec, Registry};
use tracing::error;

lazy_static! {
    static ref UPDATES_ACCEPTED_TOTAL: IntCounter = IntCounter::new(
        "pagesync_updates_accepted_total",
        "Content updates merged into page records",
    )
    .unwrap();
    static ref UPDATES_STALE_TOTAL: IntCounter = IntCounter::new(
        "pagesync_updates_stale_total",
        "Content updates rejected by the per-tab watermark",
    )
    .unwrap();
    static ref EXTRACTION_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!(
            "pagesync_extraction_failures_total",
            "Extractions that resolved without content grouped by reason"
        ),
        &["reason"]
    )
    .unwrap();
    static ref REDIRECTS_FINALIZED_TOTAL: IntCounter = IntCounter::new(
        "pagesync_redirects_finalized_total",
        "Redirect summaries attached to page records",
    )
    .unwrap();
    static ref RECORDS_EVICTED_TOTAL: IntCounter = IntCounter::new(
        "pagesync_records_evicted_total",
        "Page records removed by the janitor",
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register reconciler metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, UPDATES_ACCEPTED_TOTAL.clone());
    register(registry, UPDATES_STALE_TOTAL.clone());
    register(registry, EXTRACTION_FAILURES_TOTAL.clone());
    register(registry, REDIRECTS_FINALIZED_TOTAL.clone());
    register(registry, RECORDS_EVICTED_TOTAL.clone());
}

pub fn record_update_accepted() {
    UPDATES_ACCEPTED_TOTAL.inc();
}

pub fn record_update_stale() {
    UPDATES_STALE_TOTAL.inc();
}

pub fn record_extraction_failure(reason: &str) {
    EXTRACTION_FAILURES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn record_redirect_finalized() {
    REDIRECTS_FINALIZED_TOTAL.inc();
}

pub fn record_evictions(count: usize) {
    RECORDS_EVICTED_TOTAL.inc_by(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_once_per_registry() {
        let registry = Registry::new();
        register_metrics(&registry);
        register_metrics(&registry);
        record_extraction_failure("timeout");
        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"pagesync_extraction_failures_total".to_string()));
        assert!(names.contains(&"pagesync_updates_stale_total".to_string()));
    }

    #[test]
    fn stale_updates_show_up_in_the_gathered_registry() {
        let registry = Registry::new();
        register_metrics(&registry);
        let stale = |registry: &Registry| {
            registry
                .gather()
                .iter()
                .find(|family| family.get_name() == "pagesync_updates_stale_total")
                .map(|family| family.get_metric()[0].get_counter().get_value())
                .unwrap_or_default()
        };
        let before = stale(&registry);
        record_update_stale();
        assert!(stale(&registry) >= before + 1.0);
    }
}
