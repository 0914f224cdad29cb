//! Authoritative page-record state for pagesync.
//!
//! [`Reconciler`] is the only writer of [`PageRecord`]s. It merges navigation, content,
//! redirect and performance inputs, rejects out-of-order content updates with a per-tab
//! watermark, and broadcasts each change of a tab's current record.

pub mod config;
mod guard;
pub mod metrics;
pub mod model;
pub mod persist;
pub mod reconciler;
pub mod store;

pub use config::ReconcilerConfig;
pub use guard::LoadingReset;
pub use metrics::register_metrics;
pub use model::{
    ChangeReason, LastUpdate, PagePhase, PageRecord, PageRecordView, RecordNotification,
    SpaState,
};
pub use persist::{read_all, JsonFileSink, MemorySink, PersistenceSink};
pub use reconciler::{
    ContentError, ContentUpdate, NavigationOutcome, PageLookup, Reconciler, SweepReport,
    UpdateOutcome,
};
pub use store::{InMemoryPageStore, PageStore};
