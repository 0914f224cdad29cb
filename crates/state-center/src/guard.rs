use std::ops::{Deref, DerefMut};

use crate::model::{PagePhase, PageRecord};

/// Clears the loading state of a record when dropped, whatever path resolved it.
///
/// Without a failure message the record settles as [`PagePhase::Ready`]; with one it
/// settles as [`PagePhase::Failed`]. Resolution happens in `Drop`, so it also runs while
/// unwinding out of a panicking merge.
pub struct LoadingReset<'a> {
    record: &'a mut PageRecord,
    failure: Option<String>,
}

impl<'a> LoadingReset<'a> {
    pub fn new(record: &'a mut PageRecord) -> Self {
        Self {
            record,
            failure: None,
        }
    }

    pub fn fail_with(&mut self, message: impl Into<String>) {
        self.failure = Some(message.into());
    }
}

impl Deref for LoadingReset<'_> {
    type Target = PageRecord;

    fn deref(&self) -> &Self::Target {
        self.record
    }
}

impl DerefMut for LoadingReset<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.record
    }
}

impl Drop for LoadingReset<'_> {
    fn drop(&mut self) {
        if let Some(message) = self.failure.take() {
            if self.record.error.is_none() {
                self.record.error = Some(message.clone());
            }
            self.record.phase = PagePhase::Failed { message };
            return;
        }
        if self.record.phase.is_loading() {
            self.record.phase = PagePhase::Ready;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn loading() -> PageRecord {
        PageRecord::new("https://a/", PagePhase::AwaitingExtraction, "test", 0)
    }

    #[test]
    fn settles_ready_by_default() {
        let mut record = loading();
        {
            let _reset = LoadingReset::new(&mut record);
        }
        assert_eq!(record.phase, PagePhase::Ready);
    }

    #[test]
    fn failure_message_wins() {
        let mut record = loading();
        {
            let mut reset = LoadingReset::new(&mut record);
            reset.phase = PagePhase::Ready;
            reset.fail_with("extractor unreachable");
        }
        assert!(record.phase.extraction_failed());
        assert_eq!(record.error.as_deref(), Some("extractor unreachable"));
    }

    #[test]
    fn clears_loading_when_merge_panics() {
        let mut record = loading();
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut reset = LoadingReset::new(&mut record);
            reset.touch("content", 9);
            panic!("merge blew up");
        }));
        assert!(result.is_err());
        assert!(!record.phase.is_loading());
        assert_eq!(record.last_update.timestamp, 9);
    }
}
