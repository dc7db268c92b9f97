use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type ItemId = String;
pub type JobId = String;

// ===== CONFIGURATION =====

/// Full editable state of one scenario.
///
/// The engine never looks inside it beyond JSON structure: arrays, weights,
/// media and the rest belong to the remote simulator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(transparent)]
pub struct Configuration(Value);

impl Configuration {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a top-level field. A non-object configuration is replaced by an object first.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        if !self.0.is_object() {
            self.0 = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.0 {
            map.insert(key.into(), value);
        }
    }

    /// Apply a JSON merge patch (RFC 7396): objects merge recursively,
    /// `null` removes a key, anything else replaces the target.
    pub fn merge_patch(&mut self, patch: &Value) {
        merge_values(&mut self.0, patch);
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for Configuration {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn merge_values(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }

    if let Value::Object(target_map) = target {
        for (key, patch_value) in patch_map {
            if patch_value.is_null() {
                target_map.remove(key);
            } else {
                let entry = target_map.entry(key.clone()).or_insert(Value::Null);
                merge_values(entry, patch_value);
            }
        }
    }
}

/// Opaque output of one fast-path computation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(transparent)]
pub struct ComputeResult(pub Value);

// ===== CATALOG & PERSISTENCE =====

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub id: ItemId,
    // The scenario service calls this field `name`
    #[serde(alias = "name")]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: String::new(),
            category: String::new(),
        }
    }
}

pub fn catalog_contains(catalog: &[CatalogEntry], item_id: &str) -> bool {
    catalog.iter().any(|entry| entry.id == item_id)
}

/// Last successful remote save of one item.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SaveRecord {
    pub item_id: ItemId,
    pub snapshot: String,
    pub timestamp: DateTime<Utc>,
}

impl SaveRecord {
    pub fn new(item_id: impl Into<String>, snapshot: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            snapshot: snapshot.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339()
    }
}

// ===== ASYNC JOBS =====

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Starting,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed | JobPhase::Cancelled)
    }
}

/// Status document of a server-side job as reported by the polling endpoint.
///
/// `progress` is a fraction in `[0, 1]`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobStatus {
    pub status: JobPhase,
    #[serde(default)]
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatus {
    pub fn running(progress: f64) -> Self {
        Self {
            status: JobPhase::Processing,
            progress,
            result: None,
            mask: None,
            error: None,
        }
    }

    pub fn completed(result: Value) -> Self {
        Self {
            status: JobPhase::Completed,
            progress: 1.0,
            result: Some(result),
            mask: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobPhase::Failed,
            progress: 0.0,
            result: None,
            mask: None,
            error: Some(error.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: JobPhase::Cancelled,
            progress: 0.0,
            result: None,
            mask: None,
            error: None,
        }
    }

    pub fn percent(&self) -> u8 {
        (self.progress.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobStarted {
    pub operation_id: JobId,
}

/// Client-facing view of a polled job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TaskStatus {
    pub running: bool,
    pub progress: u8,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl From<&JobStatus> for TaskStatus {
    fn from(status: &JobStatus) -> Self {
        Self {
            running: !status.status.is_terminal(),
            progress: status.percent(),
            result: status.result.clone(),
            error: status.error.clone(),
        }
    }
}

/// Error body returned by the remote service on non-2xx responses.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorBody {
    pub error: String,
}
