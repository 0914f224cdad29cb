use pagesync_core_types::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("signal source {name} unavailable: {reason}")]
    SourceUnavailable { name: String, reason: String },
    #[error("navigation event channel closed")]
    ChannelClosed,
}

impl DetectorError {
    pub fn unavailable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl From<DetectorError> for SyncError {
    fn from(value: DetectorError) -> Self {
        SyncError::new(value.to_string())
    }
}
