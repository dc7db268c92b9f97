use crate::dataflow::Atom;
use std::time::Duration;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("job failed: {0}")]
    JobFailure(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("bootstrap did not finish within {}ms", .0.as_millis())]
    BootstrapTimeout(Duration),
    #[error("local cache error: {0}")]
    Cache(String),
    #[error("invalid settings: {0}")]
    Settings(String),
}

impl SyncError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(error: std::io::Error) -> Self {
        SyncError::Cache(error.to_string())
    }
}

/// Which part of the engine raised a surfaced error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    Compute,
    Job,
    Save,
    Load,
    Bootstrap,
    Cache,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurfacedError {
    pub origin: ErrorOrigin,
    pub error: SyncError,
}

/// User-visible error slot shared by every component of a session.
///
/// Holds the most recent failure. Cancellations never reach it.
#[derive(Clone, Debug, Default)]
pub struct ErrorSlot {
    current: Atom<Option<SurfacedError>>,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn surface(&self, origin: ErrorOrigin, error: SyncError) {
        if error.is_cancellation() {
            log::debug!("ERRORS: Swallowing cancellation from {:?}", origin);
            return;
        }
        log::warn!("ERRORS: {:?} failed: {}", origin, error);
        self.current.set(Some(SurfacedError { origin, error }));
    }

    /// Clear the slot if it currently holds an error from `origin`.
    pub fn clear_from(&self, origin: ErrorOrigin) {
        self.current.update_if(|current| {
            if current.as_ref().is_some_and(|surfaced| surfaced.origin == origin) {
                *current = None;
                true
            } else {
                false
            }
        });
    }

    /// The user acknowledged whatever is shown, regardless of origin.
    pub fn dismiss(&self) {
        self.current.set_neq(None);
    }

    pub fn current(&self) -> Option<SurfacedError> {
        self.current.get_cloned()
    }

    pub fn signal(&self) -> tokio::sync::watch::Receiver<Option<SurfacedError>> {
        self.current.signal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_never_surfaced() {
        let errors = ErrorSlot::new();
        errors.surface(ErrorOrigin::Job, SyncError::Cancelled);
        assert_eq!(errors.current(), None);
    }

    #[test]
    fn test_clear_only_matching_origin() {
        let errors = ErrorSlot::new();
        errors.surface(ErrorOrigin::Save, SyncError::Network("503".into()));

        errors.clear_from(ErrorOrigin::Compute);
        assert!(errors.current().is_some());

        errors.clear_from(ErrorOrigin::Save);
        assert_eq!(errors.current(), None);
    }

    #[test]
    fn test_dismiss_clears_any_origin() {
        let errors = ErrorSlot::new();
        errors.surface(ErrorOrigin::Job, SyncError::JobFailure("No images loaded".into()));

        errors.dismiss();
        assert_eq!(errors.current(), None);
    }

    #[test]
    fn test_bootstrap_timeout_message() {
        let error = SyncError::BootstrapTimeout(Duration::from_secs(10));
        assert_eq!(error.to_string(), "bootstrap did not finish within 10000ms");
    }
}
