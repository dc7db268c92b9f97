//! Termination fallback persister
//!
//! Last-chance save when a session ends. Unsaved changes are offered to an
//! ordered list of transports until one takes them; the local cache is
//! written in every case. Runs at most once per session.

use crate::cache::{CURRENT_CONFIG, CURRENT_ITEM_ID, LAST_SAVED_AT, LocalCache};
use crate::services::TerminationTransport;
use shared::{Configuration, ItemId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationOutcome {
    /// Transport that accepted the final save, if any was needed and one accepted.
    pub transport: Option<String>,
    pub local_written: bool,
}

pub struct TerminationPersister {
    transports: Vec<Arc<dyn TerminationTransport>>,
    cache: Arc<dyn LocalCache>,
    fired: AtomicBool,
}

impl TerminationPersister {
    pub fn new(transports: Vec<Arc<dyn TerminationTransport>>, cache: Arc<dyn LocalCache>) -> Self {
        Self {
            transports,
            cache,
            fired: AtomicBool::new(false),
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Persist what can be persisted. Returns `None` if this already ran.
    pub fn fire(&self, item_id: Option<&ItemId>, config: &Configuration, dirty: bool) -> Option<TerminationOutcome> {
        if self.fired.swap(true, Ordering::SeqCst) {
            log::debug!("TERMINATION: Already fired, ignoring");
            return None;
        }

        let payload = match serde_json::to_string(config) {
            Ok(payload) => Some(payload),
            Err(error) => {
                log::error!("TERMINATION: Failed to serialize configuration: {}", error);
                None
            }
        };

        let mut transport = None;
        if dirty {
            match (item_id, payload.as_deref()) {
                (Some(item_id), Some(payload)) => {
                    transport = self.offer(item_id, payload);
                    if transport.is_none() {
                        log::warn!("TERMINATION: No transport accepted the final save of {}", item_id);
                    }
                }
                (None, _) => log::warn!("TERMINATION: Unsaved changes but no item bound"),
                (_, None) => {}
            }
        } else {
            log::debug!("TERMINATION: Nothing unsaved, skipping network");
        }

        let local_written = self.write_local(item_id, payload.as_deref());
        Some(TerminationOutcome {
            transport,
            local_written,
        })
    }

    fn offer(&self, item_id: &ItemId, payload: &str) -> Option<String> {
        for transport in &self.transports {
            if transport.offer(item_id, payload) {
                log::info!("TERMINATION: Final save of {} handed to {}", item_id, transport.name());
                return Some(transport.name().to_string());
            }
            log::debug!("TERMINATION: {} declined the final save", transport.name());
        }
        None
    }

    fn write_local(&self, item_id: Option<&ItemId>, payload: Option<&str>) -> bool {
        let mut writes = Vec::new();
        if let Some(payload) = payload {
            writes.push((CURRENT_CONFIG, payload.to_string()));
        }
        if let Some(item_id) = item_id {
            writes.push((CURRENT_ITEM_ID, item_id.clone()));
        }
        writes.push((LAST_SAVED_AT, chrono::Utc::now().to_rfc3339()));

        let mut all_written = payload.is_some();
        for (slot, value) in writes {
            if let Err(error) = self.cache.write(slot, &value) {
                log::error!("TERMINATION: Failed to write {}: {}", slot, error);
                all_written = false;
            }
        }
        all_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::testing::RecordingTransport;
    use serde_json::json;

    fn persister(
        transports: &[Arc<RecordingTransport>],
        cache: Arc<MemoryCache>,
    ) -> TerminationPersister {
        let transports = transports
            .iter()
            .map(|transport| transport.clone() as Arc<dyn TerminationTransport>)
            .collect();
        TerminationPersister::new(transports, cache)
    }

    #[test]
    fn test_dirty_session_sends_exactly_one_network_write() {
        let declining = Arc::new(RecordingTransport::new("beacon", false));
        let accepting = Arc::new(RecordingTransport::new("small_payload", true));
        let unused = Arc::new(RecordingTransport::new("spare", true));
        let cache = Arc::new(MemoryCache::new());
        let persister = persister(&[declining.clone(), accepting.clone(), unused.clone()], cache.clone());
        let config = Configuration::new(json!({"elements": 16}));

        let outcome = persister.fire(Some(&"ula".to_string()), &config, true).unwrap();

        assert_eq!(outcome.transport.as_deref(), Some("small_payload"));
        assert!(outcome.local_written);
        assert_eq!(declining.offers().len(), 1);
        assert_eq!(accepting.offers(), vec![("ula".to_string(), r#"{"elements":16}"#.to_string())]);
        assert!(unused.offers().is_empty());
        assert_eq!(cache.get(CURRENT_CONFIG).as_deref(), Some(r#"{"elements":16}"#));
        assert_eq!(cache.get(CURRENT_ITEM_ID).as_deref(), Some("ula"));
        assert!(cache.get(LAST_SAVED_AT).is_some());
    }

    #[test]
    fn test_clean_session_only_writes_locally() {
        let transport = Arc::new(RecordingTransport::new("beacon", true));
        let cache = Arc::new(MemoryCache::new());
        let persister = persister(&[transport.clone()], cache.clone());

        let outcome = persister
            .fire(Some(&"ula".to_string()), &Configuration::new(json!({})), false)
            .unwrap();

        assert_eq!(outcome.transport, None);
        assert!(outcome.local_written);
        assert!(transport.offers().is_empty());
        assert!(cache.get(LAST_SAVED_AT).is_some());
    }

    #[test]
    fn test_fires_at_most_once() {
        let transport = Arc::new(RecordingTransport::new("beacon", true));
        let persister = persister(&[transport.clone()], Arc::new(MemoryCache::new()));
        let config = Configuration::new(json!({"a": 1}));

        assert!(persister.fire(Some(&"ula".to_string()), &config, true).is_some());
        assert!(persister.fire(Some(&"ula".to_string()), &config, true).is_none());
        assert!(persister.has_fired());
        assert_eq!(transport.offers().len(), 1);
    }
}
