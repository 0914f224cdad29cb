use pagesync_core_types::TabId;
use pagesync_redirect_tracker::config::RedirectConfig;
use pagesync_redirect_tracker::{NetworkEvent, RedirectTracker, ResourceKind};

fn sent(url: &str) -> NetworkEvent {
    NetworkEvent::RequestSent {
        url: url.into(),
        resource: ResourceKind::MainFrame,
    }
}

fn hop(from: &str, to: &str, status: u16) -> NetworkEvent {
    NetworkEvent::BeforeRedirect {
        from_url: from.into(),
        to_url: to.into(),
        status,
        resource: ResourceKind::MainFrame,
    }
}

fn completed(url: &str, status: u16) -> NetworkEvent {
    NetworkEvent::Completed {
        url: url.into(),
        status,
        resource: ResourceKind::MainFrame,
    }
}

#[test]
fn three_hop_chain_reports_two_redirects() {
    let tracker = RedirectTracker::new(RedirectConfig::default());
    let tab = TabId(4);
    tracker.ingest(tab, sent("https://a.test/"), 100);
    tracker.ingest(tab, hop("https://a.test/", "https://b.test/", 301), 110);
    tracker.ingest(tab, hop("https://b.test/", "https://c.test/", 302), 120);
    let finalized = tracker
        .ingest(tab, completed("https://d.test/", 200), 130)
        .expect("chain finalized");

    assert_eq!(finalized.final_url, "https://d.test/");
    assert_eq!(finalized.status_code, 200);
    let summary = &finalized.summary;
    assert_eq!(summary.redirect_count, 2);
    assert_eq!(summary.total_hops, 3);
    assert_eq!(summary.origin_url, "https://a.test/");
    assert_eq!(summary.final_url, "https://d.test/");
    assert_eq!(summary.status_codes, vec![301, 302, 200]);
    assert_eq!(tracker.pending_hops(tab), None);
}

#[test]
fn finalizing_twice_does_not_duplicate_hops() {
    let tracker = RedirectTracker::new(RedirectConfig::default());
    let tab = TabId(5);
    tracker.ingest(tab, sent("http://site.test/"), 0);
    tracker.ingest(tab, hop("http://site.test/", "https://site.test/", 308), 1);
    let first = tracker
        .ingest(tab, completed("https://site.test/", 200), 2)
        .expect("first finalize");
    assert!(tracker
        .ingest(tab, completed("https://site.test/", 200), 3)
        .is_none());

    let recent = tracker.recent_summary(tab, 4).expect("recent chain");
    assert_eq!(recent.summary, first.summary);
    assert_eq!(recent.summary.redirect_count, 1);
    assert_eq!(recent.summary.total_hops, 1);
}

#[test]
fn network_error_finalizes_with_status_zero() {
    let tracker = RedirectTracker::new(RedirectConfig::default());
    let tab = TabId(6);
    tracker.ingest(tab, sent("https://down.test/"), 0);
    tracker.ingest(tab, hop("https://down.test/", "https://down.test/login", 302), 1);
    let finalized = tracker
        .ingest(
            tab,
            NetworkEvent::ErrorOccurred {
                url: "https://down.test/login".into(),
                error: "net::ERR_CONNECTION_RESET".into(),
                resource: ResourceKind::MainFrame,
            },
            2,
        )
        .expect("error is terminal");
    assert_eq!(finalized.status_code, 0);
    assert_eq!(finalized.error.as_deref(), Some("net::ERR_CONNECTION_RESET"));
    assert_eq!(finalized.summary.total_hops, 1);
    assert_eq!(finalized.summary.status_codes, vec![302, 0]);
}

#[test]
fn stale_chains_are_discarded_outside_recency_window() {
    let config = RedirectConfig {
        recency_window_ms: 1_000,
        ..RedirectConfig::default()
    };
    let tracker = RedirectTracker::new(config);
    let tab = TabId(7);
    tracker.ingest(tab, hop("https://x.test/", "https://y.test/", 301), 10);
    tracker.ingest(tab, completed("https://y.test/", 200), 20);

    assert!(tracker.recent_summary(tab, 900).is_some());
    assert!(tracker.recent_summary(tab, 5_000).is_none());
    // Discarded, not merely hidden.
    assert!(tracker.recent_summary(tab, 900).is_none());
}

#[test]
fn recency_counts_from_the_last_hop_not_from_completion() {
    let config = RedirectConfig {
        recency_window_ms: 1_000,
        ..RedirectConfig::default()
    };
    let tracker = RedirectTracker::new(config);
    let tab = TabId(17);
    tracker.ingest(tab, sent("https://slow.test/"), 0);
    tracker.ingest(tab, hop("https://slow.test/", "https://slow.test/home", 302), 10);
    let finalized = tracker
        .ingest(tab, completed("https://slow.test/home", 200), 500)
        .expect("chain finalized");
    assert_eq!(finalized.last_hop_at, 10);
    assert_eq!(finalized.finalized_at, 500);

    // 1_190 ms after the hop, though only 700 ms after completion
    assert!(tracker.recent_summary(tab, 1_200).is_none());
}

#[test]
fn headers_stay_with_the_chain_that_received_them() {
    let tracker = RedirectTracker::new(RedirectConfig::default());
    let tab = TabId(18);
    tracker.ingest(tab, sent("https://a.test/"), 0);
    tracker.ingest(
        tab,
        NetworkEvent::HeadersReceived {
            url: "https://a.test/".into(),
            status: 200,
            server: Some("nginx".into()),
            content_type: Some("text/html".into()),
            resource: ResourceKind::MainFrame,
        },
        1,
    );
    let first = tracker
        .ingest(tab, completed("https://a.test/", 200), 2)
        .expect("first chain");
    assert_eq!(
        first.server_info.and_then(|info| info.server),
        Some("nginx".to_string())
    );

    tracker.ingest(tab, sent("https://b.test/"), 10);
    let errored = tracker
        .ingest(
            tab,
            NetworkEvent::ErrorOccurred {
                url: "https://b.test/".into(),
                error: "net::ERR_NAME_NOT_RESOLVED".into(),
                resource: ResourceKind::MainFrame,
            },
            11,
        )
        .expect("error is terminal");
    assert_eq!(errored.status_code, 0);
    assert!(errored.server_info.is_none());
    assert!(tracker.server_info(tab).is_none());
}

#[test]
fn new_navigation_after_finalize_starts_fresh_chain() {
    let tracker = RedirectTracker::new(RedirectConfig::default());
    let tab = TabId(8);
    tracker.ingest(tab, hop("https://one.test/", "https://two.test/", 301), 0);
    tracker.ingest(tab, completed("https://two.test/", 200), 1);

    tracker.ingest(tab, sent("https://three.test/"), 2);
    assert_eq!(tracker.pending_hops(tab), Some(0));
    let second = tracker
        .ingest(tab, completed("https://three.test/", 200), 3)
        .expect("second chain");
    assert_eq!(second.summary.redirect_count, 0);
    assert_eq!(second.summary.total_hops, 0);
    assert_eq!(second.summary.origin_url, "https://three.test/");
}

#[tokio::test]
async fn finalized_chains_are_published() {
    let tracker = RedirectTracker::new(RedirectConfig::default());
    let mut rx = tracker.subscribe();
    let tab = TabId(9);
    tracker.ingest(
        tab,
        NetworkEvent::HeadersReceived {
            url: "https://srv.test/".into(),
            status: 200,
            server: Some("nginx".into()),
            content_type: Some("text/html".into()),
            resource: ResourceKind::MainFrame,
        },
        0,
    );
    tracker.ingest(tab, completed("https://srv.test/", 200), 1);

    let published = rx.recv().await.expect("published chain");
    assert_eq!(published.tab, tab);
    assert_eq!(
        tracker.server_info(tab).and_then(|info| info.server),
        Some("nginx".to_string())
    );

    assert!(tracker.close_tab(tab));
    assert!(tracker.server_info(tab).is_none());
}

#[test]
fn network_events_parse_from_host_json() {
    let raw = r#"{"kind":"before_redirect","from_url":"http://a","to_url":"https://a","status":301}"#;
    let event: NetworkEvent = serde_json::from_str(raw).expect("parse event");
    assert_eq!(event, hop("http://a", "https://a", 301));
}
