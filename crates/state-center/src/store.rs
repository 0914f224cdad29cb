//! Page record storage keyed by `(tab, url)`.

use dashmap::DashMap;

use pagesync_core_types::{PageKey, TabId};

use crate::model::PageRecord;

/// Storage seam for page records. The reconciler is the only writer.
pub trait PageStore: Send + Sync {
    fn get(&self, key: &PageKey) -> Option<PageRecord>;
    fn set(&self, key: PageKey, record: PageRecord) -> Option<PageRecord>;
    fn delete(&self, key: &PageKey) -> Option<PageRecord>;
    fn keys_for_tab(&self, tab: TabId) -> Vec<PageKey>;
    fn remove_tab(&self, tab: TabId) -> Vec<PageKey>;
    fn len(&self) -> usize;
    fn snapshot(&self) -> Vec<(PageKey, PageRecord)>;

    /// Mutates the record in place, returning the result. `None` when no record exists.
    fn update(&self, key: &PageKey, apply: &mut dyn FnMut(&mut PageRecord))
        -> Option<PageRecord>;

    /// Like [`PageStore::update`] but creates the record first when missing.
    fn upsert(
        &self,
        key: &PageKey,
        create: &mut dyn FnMut() -> PageRecord,
        apply: &mut dyn FnMut(&mut PageRecord),
    ) -> PageRecord;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct InMemoryPageStore {
    records: DashMap<PageKey, PageRecord>,
}

impl InMemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageStore for InMemoryPageStore {
    fn get(&self, key: &PageKey) -> Option<PageRecord> {
        self.records.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: PageKey, record: PageRecord) -> Option<PageRecord> {
        self.records.insert(key, record)
    }

    fn delete(&self, key: &PageKey) -> Option<PageRecord> {
        self.records.remove(key).map(|(_, record)| record)
    }

    fn keys_for_tab(&self, tab: TabId) -> Vec<PageKey> {
        self.records
            .iter()
            .filter(|entry| entry.key().tab == tab)
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn remove_tab(&self, tab: TabId) -> Vec<PageKey> {
        let keys = self.keys_for_tab(tab);
        for key in &keys {
            self.records.remove(key);
        }
        keys
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn snapshot(&self) -> Vec<(PageKey, PageRecord)> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn update(
        &self,
        key: &PageKey,
        apply: &mut dyn FnMut(&mut PageRecord),
    ) -> Option<PageRecord> {
        let mut entry = self.records.get_mut(key)?;
        apply(entry.value_mut());
        Some(entry.value().clone())
    }

    fn upsert(
        &self,
        key: &PageKey,
        create: &mut dyn FnMut() -> PageRecord,
        apply: &mut dyn FnMut(&mut PageRecord),
    ) -> PageRecord {
        let mut entry = self.records.entry(key.clone()).or_insert_with(|| create());
        apply(entry.value_mut());
        entry.value().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PagePhase;

    fn record(url: &str) -> PageRecord {
        PageRecord::new(url, PagePhase::Ready, "test", 1)
    }

    #[test]
    fn tab_scoped_removal() {
        let store = InMemoryPageStore::new();
        store.set(PageKey::new(TabId(1), "https://a/"), record("https://a/"));
        store.set(PageKey::new(TabId(1), "https://b/"), record("https://b/"));
        store.set(PageKey::new(TabId(2), "https://a/"), record("https://a/"));

        let mut removed = store.remove_tab(TabId(1));
        removed.sort_by(|a, b| a.url.cmp(&b.url));
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].url, "https://a/");
        assert_eq!(store.len(), 1);
        assert!(store.keys_for_tab(TabId(1)).is_empty());
    }

    #[test]
    fn upsert_creates_once() {
        let store = InMemoryPageStore::new();
        let key = PageKey::new(TabId(4), "https://x/");
        let mut created = 0;
        for _ in 0..2 {
            store.upsert(
                &key,
                &mut || {
                    created += 1;
                    record("https://x/")
                },
                &mut |rec| rec.error = Some("seen".into()),
            );
        }
        assert_eq!(created, 1);
        assert_eq!(store.get(&key).and_then(|rec| rec.error), Some("seen".into()));
        assert!(store
            .update(&PageKey::new(TabId(4), "https://missing/"), &mut |_| {})
            .is_none());
    }
}
