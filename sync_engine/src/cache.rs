//! Local key-value cache for the active configuration.
//!
//! Three string slots survive between sessions: the serialized configuration,
//! the id of the item it belongs to and the time of the last remote save.

use crate::dataflow::lock;
use crate::error::{SyncError, SyncResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const CURRENT_CONFIG: &str = "current_config";
pub const CURRENT_ITEM_ID: &str = "current_item_id";
pub const LAST_SAVED_AT: &str = "last_saved_at";

pub trait LocalCache: Send + Sync {
    fn read(&self, slot: &str) -> SyncResult<Option<String>>;

    fn write(&self, slot: &str, value: &str) -> SyncResult<()>;
}

/// One file per slot inside a cache directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache directory under the platform's local data dir.
    pub fn default_location() -> SyncResult<Self> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| SyncError::Cache("could not find local data directory".to_string()))?;
        Ok(Self::new(data_dir.join("beamsync")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn slot_path(&self, slot: &str) -> PathBuf {
        self.root.join(slot)
    }
}

impl LocalCache for FileCache {
    fn read(&self, slot: &str) -> SyncResult<Option<String>> {
        match std::fs::read_to_string(self.slot_path(slot)) {
            Ok(content) => Ok(Some(content)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(SyncError::Cache(format!("failed to read slot '{}': {}", slot, error))),
        }
    }

    fn write(&self, slot: &str, value: &str) -> SyncResult<()> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| SyncError::Cache(format!("failed to create cache directory: {}", e)))?;

        // Write next to the target and rename so a crash never leaves half a slot
        let target = self.slot_path(slot);
        let staging = self.root.join(format!(".{}.tmp", slot));
        std::fs::write(&staging, value)
            .map_err(|e| SyncError::Cache(format!("failed to write slot '{}': {}", slot, e)))?;
        std::fs::rename(&staging, &target)
            .map_err(|e| SyncError::Cache(format!("failed to commit slot '{}': {}", slot, e)))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slots<'a>(slots: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let cache = Self::new();
        {
            let mut map = lock(&cache.slots);
            for (slot, value) in slots {
                map.insert(slot.to_string(), value.to_string());
            }
        }
        cache
    }

    pub fn get(&self, slot: &str) -> Option<String> {
        lock(&self.slots).get(slot).cloned()
    }
}

impl LocalCache for MemoryCache {
    fn read(&self, slot: &str) -> SyncResult<Option<String>> {
        Ok(self.get(slot))
    }

    fn write(&self, slot: &str, value: &str) -> SyncResult<()> {
        lock(&self.slots).insert(slot.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_cache_missing_slot_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("beamsync"));
        assert_eq!(cache.read(CURRENT_CONFIG).unwrap(), None);
    }

    #[test]
    fn test_file_cache_overwrites_slot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("beamsync"));

        cache.write(CURRENT_ITEM_ID, "ula-8").unwrap();
        cache.write(CURRENT_ITEM_ID, "ula-16").unwrap();

        assert_eq!(cache.read(CURRENT_ITEM_ID).unwrap().as_deref(), Some("ula-16"));
        // No staging files are left behind
        let leftovers: Vec<_> = std::fs::read_dir(cache.root())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_memory_cache_preseeded_slots() {
        let cache = MemoryCache::with_slots([(CURRENT_ITEM_ID, "a"), (CURRENT_CONFIG, "{}")]);
        assert_eq!(cache.read(CURRENT_ITEM_ID).unwrap().as_deref(), Some("a"));
        assert_eq!(cache.read(LAST_SAVED_AT).unwrap(), None);
    }
}
