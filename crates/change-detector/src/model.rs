use serde::{Deserialize, Serialize};
use url::Url;

use pagesync_core_types::now_ms;

use crate::config::DetectorConfig;

/// Read-only window onto the live document.
///
/// Hosts implement this over whatever DOM access they have; the detector only ever reads
/// through it, so snapshots can be taken from fakes in tests.
pub trait DocumentView: Send + Sync {
    fn href(&self) -> String;
    fn title(&self) -> String;
    fn meta_description(&self) -> Option<String>;
    /// Trimmed text of every heading at `level` (1 for `<h1>`, 2 for `<h2>`), in document order.
    fn headings(&self, level: u8) -> Vec<String>;
    /// Text of the main/article/content-like regions.
    fn content_text(&self) -> String;
    fn visible_element_count(&self) -> usize;
    fn link_count(&self) -> usize;
}

/// Cheap fingerprint of a page. Snapshots are compared, never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomSnapshot {
    pub path: String,
    pub search_params: String,
    pub hash_fragment: String,
    pub title: String,
    pub meta_description: String,
    pub h1_texts: Vec<String>,
    pub h1_count: usize,
    pub h2_texts: Vec<String>,
    pub content_sample: String,
    pub visible_element_count: usize,
    pub link_count: usize,
    pub taken_at: u64,
}

impl DomSnapshot {
    pub fn capture(document: &dyn DocumentView, config: &DetectorConfig) -> Self {
        let (path, search_params, hash_fragment) = split_location(&document.href());
        let h1_texts = document.headings(1);
        let mut h2_texts = document.headings(2);
        h2_texts.truncate(config.h2_limit);
        Self {
            path,
            search_params,
            hash_fragment,
            title: document.title().trim().to_string(),
            meta_description: document
                .meta_description()
                .map(|text| text.trim().to_string())
                .unwrap_or_default(),
            h1_count: h1_texts.len(),
            h1_texts,
            h2_texts,
            content_sample: sample_text(&document.content_text(), config.content_sample_len),
            visible_element_count: document.visible_element_count(),
            link_count: document.link_count(),
            taken_at: now_ms(),
        }
    }
}

fn split_location(href: &str) -> (String, String, String) {
    if let Ok(parsed) = Url::parse(href) {
        let search = parsed.query().map(|q| format!("?{q}")).unwrap_or_default();
        let hash = parsed.fragment().map(|f| format!("#{f}")).unwrap_or_default();
        return (parsed.path().to_string(), search, hash);
    }
    // Relative or malformed hrefs: split by hand.
    let (rest, hash) = match href.find('#') {
        Some(idx) => (&href[..idx], href[idx..].to_string()),
        None => (href, String::new()),
    };
    let (path, search) = match rest.find('?') {
        Some(idx) => (rest[..idx].to_string(), rest[idx..].to_string()),
        None => (rest.to_string(), String::new()),
    };
    (path, search, hash)
}

/// Collapses whitespace and truncates to `max_chars` characters.
fn sample_text(text: &str, max_chars: usize) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}

/// Which mechanism observed the change.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NavigationSource {
    HistoryPush,
    HistoryReplace,
    Pop,
    Visibility,
    UrlPoll,
    Mutation,
    InitialLoad,
    InitialIdle,
}

impl NavigationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            NavigationSource::HistoryPush => "history-push",
            NavigationSource::HistoryReplace => "history-replace",
            NavigationSource::Pop => "pop",
            NavigationSource::Visibility => "visibility",
            NavigationSource::UrlPoll => "url-poll",
            NavigationSource::Mutation => "mutation",
            NavigationSource::InitialLoad => "initial-load",
            NavigationSource::InitialIdle => "initial-idle",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let source = match raw {
            "history-push" => NavigationSource::HistoryPush,
            "history-replace" => NavigationSource::HistoryReplace,
            "pop" => NavigationSource::Pop,
            "visibility" => NavigationSource::Visibility,
            "url-poll" => NavigationSource::UrlPoll,
            "mutation" => NavigationSource::Mutation,
            "initial-load" => NavigationSource::InitialLoad,
            "initial-idle" => NavigationSource::InitialIdle,
            _ => return None,
        };
        Some(source)
    }

    /// Polling and visibility checks bypass the in-flight guard.
    pub fn is_authoritative(&self) -> bool {
        matches!(self, NavigationSource::UrlPoll | NavigationSource::Visibility)
    }

    /// A true top-level load rather than a client-side route change.
    pub fn is_real_load(&self) -> bool {
        matches!(self, NavigationSource::InitialLoad)
    }

    pub fn is_spa(&self) -> bool {
        !matches!(
            self,
            NavigationSource::InitialLoad | NavigationSource::InitialIdle
        )
    }
}

/// Emitted once per qualifying change and consumed once downstream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationEvent {
    pub url: String,
    pub source: NavigationSource,
    pub detected_at: u64,
    #[serde(default)]
    pub forced: bool,
}

impl NavigationEvent {
    pub fn new(url: impl Into<String>, source: NavigationSource, detected_at: u64) -> Self {
        Self {
            url: url.into(),
            source,
            detected_at,
            forced: false,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::DocumentView;

    /// Mutable fake document used across the crate's tests.
    #[derive(Default)]
    pub struct FakeDocument {
        pub state: Mutex<FakeState>,
    }

    #[derive(Clone, Default)]
    pub struct FakeState {
        pub href: String,
        pub title: String,
        pub meta: Option<String>,
        pub h1: Vec<String>,
        pub h2: Vec<String>,
        pub content: String,
        pub elements: usize,
        pub links: usize,
    }

    impl FakeDocument {
        pub fn at(href: &str, title: &str) -> Self {
            Self {
                state: Mutex::new(FakeState {
                    href: href.into(),
                    title: title.into(),
                    ..FakeState::default()
                }),
            }
        }

        pub fn navigate(&self, href: &str, title: &str) {
            let mut state = self.state.lock();
            state.href = href.into();
            state.title = title.into();
        }
    }

    impl DocumentView for FakeDocument {
        fn href(&self) -> String {
            self.state.lock().href.clone()
        }
        fn title(&self) -> String {
            self.state.lock().title.clone()
        }
        fn meta_description(&self) -> Option<String> {
            self.state.lock().meta.clone()
        }
        fn headings(&self, level: u8) -> Vec<String> {
            let state = self.state.lock();
            match level {
                1 => state.h1.clone(),
                2 => state.h2.clone(),
                _ => Vec::new(),
            }
        }
        fn content_text(&self) -> String {
            self.state.lock().content.clone()
        }
        fn visible_element_count(&self) -> usize {
            self.state.lock().elements
        }
        fn link_count(&self) -> usize {
            self.state.lock().links
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeDocument;
    use super::*;

    #[test]
    fn capture_splits_location_and_truncates() {
        let doc = FakeDocument::at("https://shop.dev/items/42?sort=asc#reviews", " Item 42 ");
        {
            let mut state = doc.state.lock();
            state.h2 = (0..8).map(|i| format!("section {i}")).collect();
            state.content = "word ".repeat(200);
            state.meta = Some("  cheap items ".into());
        }
        let snapshot = DomSnapshot::capture(&doc, &DetectorConfig::default());
        assert_eq!(snapshot.path, "/items/42");
        assert_eq!(snapshot.search_params, "?sort=asc");
        assert_eq!(snapshot.hash_fragment, "#reviews");
        assert_eq!(snapshot.title, "Item 42");
        assert_eq!(snapshot.meta_description, "cheap items");
        assert_eq!(snapshot.h2_texts.len(), 5);
        assert_eq!(snapshot.content_sample.chars().count(), 300);
    }

    #[test]
    fn relative_hrefs_are_split_by_hand() {
        assert_eq!(
            split_location("/a/b?x=1#frag"),
            ("/a/b".to_string(), "?x=1".to_string(), "#frag".to_string())
        );
    }

    #[test]
    fn source_round_trips_through_wire_names() {
        for source in [
            NavigationSource::HistoryPush,
            NavigationSource::UrlPoll,
            NavigationSource::InitialIdle,
        ] {
            assert_eq!(NavigationSource::parse(source.as_str()), Some(source));
        }
        assert!(NavigationSource::InitialLoad.is_real_load());
        assert!(!NavigationSource::InitialLoad.is_spa());
        assert!(NavigationSource::Visibility.is_authoritative());
    }
}
