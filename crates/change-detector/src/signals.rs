//! Navigation signal sources.
//!
//! History-API interception, popstate/hashchange listeners, the title/meta mutation
//! observer and the visibility listener all live in the host. Each one is wrapped in a
//! [`NavigationSignalSource`] that pushes [`NavigationSignal`]s into the detector.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::errors::DetectorError;
use crate::model::NavigationSource;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NavigationSignal {
    HistoryPush { url: String },
    HistoryReplace { url: String },
    PopState,
    HashChange,
    TitleMutated,
    MetaMutated,
    VisibilityRegained,
}

impl NavigationSignal {
    pub fn source(&self) -> NavigationSource {
        match self {
            NavigationSignal::HistoryPush { .. } => NavigationSource::HistoryPush,
            NavigationSignal::HistoryReplace { .. } => NavigationSource::HistoryReplace,
            NavigationSignal::PopState | NavigationSignal::HashChange => NavigationSource::Pop,
            NavigationSignal::TitleMutated | NavigationSignal::MetaMutated => {
                NavigationSource::Mutation
            }
            NavigationSignal::VisibilityRegained => NavigationSource::Visibility,
        }
    }

    /// Visibility recovery forces a check past the in-flight guard.
    pub fn forces_check(&self) -> bool {
        self.source().is_authoritative()
    }
}

pub type SignalSender = mpsc::UnboundedSender<NavigationSignal>;

pub trait NavigationSignalSource: Send + Sync {
    fn name(&self) -> &str;
    fn attach(&self, sender: SignalSender) -> Result<(), DetectorError>;
}

/// Source driven by explicit [`emit`](ManualSignalSource::emit) calls from a host adapter.
pub struct ManualSignalSource {
    name: String,
    sender: Mutex<Option<SignalSender>>,
}

impl ManualSignalSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sender: Mutex::new(None),
        }
    }

    /// Returns `false` when the source is detached or the detector is gone.
    pub fn emit(&self, signal: NavigationSignal) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(signal).is_ok(),
            None => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.sender.lock().is_some()
    }
}

impl NavigationSignalSource for ManualSignalSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach(&self, sender: SignalSender) -> Result<(), DetectorError> {
        let mut slot = self.sender.lock();
        if slot.is_some() {
            return Err(DetectorError::unavailable(&self.name, "already attached"));
        }
        *slot = Some(sender);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_map_to_sources() {
        assert_eq!(
            NavigationSignal::HistoryPush { url: "/x".into() }.source(),
            NavigationSource::HistoryPush
        );
        assert_eq!(NavigationSignal::HashChange.source(), NavigationSource::Pop);
        assert_eq!(NavigationSignal::MetaMutated.source(), NavigationSource::Mutation);
        assert!(NavigationSignal::VisibilityRegained.forces_check());
        assert!(!NavigationSignal::TitleMutated.forces_check());
    }

    #[test]
    fn manual_source_attaches_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let source = ManualSignalSource::new("history");
        assert!(!source.emit(NavigationSignal::PopState));
        source.attach(tx.clone()).unwrap();
        assert!(source.attach(tx).is_err());
        assert!(source.emit(NavigationSignal::PopState));
        assert_eq!(rx.try_recv().unwrap(), NavigationSignal::PopState);
    }
}
