//! Change detection for single-page navigations.
//!
//! The detector never sees server state. It fingerprints the live document
//! ([`DomSnapshot`]), listens to several redundant navigation signals, and emits one
//! [`NavigationEvent`] per qualifying change.

pub mod config;
pub mod detector;
pub mod errors;
pub mod model;
pub mod signals;
pub mod significance;

pub use config::DetectorConfig;
pub use detector::{ChangeDetector, DetectionOutcome, DetectorHandle};
pub use errors::DetectorError;
pub use model::{DocumentView, DomSnapshot, NavigationEvent, NavigationSource};
pub use signals::{ManualSignalSource, NavigationSignal, NavigationSignalSource, SignalSender};
pub use significance::{is_significant_change, score_change, ChangeScore, SignificancePolicy};
