use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{OperationId, OperationKind, Readiness, RecordStatus};

pub const STATE_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub operation_id: OperationId,
    pub operation: OperationKind,
    pub at: i64,
    pub outcome: String,
}

/// What the store remembers about one container.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackedRecord {
    pub name: String,
    pub status: RecordStatus,
    #[serde(default)]
    pub readiness: Readiness,
    pub last_operation: OperationKind,
    /// Unix seconds.
    pub last_operation_time: i64,
    /// Source reference the descriptor can be reloaded from.
    pub source: String,
    #[serde(default)]
    pub descriptor_digest: Option<String>,
    #[serde(default)]
    pub has_health_check: bool,
    #[serde(default)]
    pub runtime_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl TrackedRecord {
    pub fn new(name: impl Into<String>, source: impl Into<String>, op: OperationKind, now: i64) -> Self {
        Self {
            name: name.into(),
            status: RecordStatus::Created,
            readiness: Readiness::Unknown,
            last_operation: op,
            last_operation_time: now,
            source: source.into(),
            descriptor_digest: None,
            has_health_check: false,
            runtime_id: None,
            history: vec![],
        }
    }

    /// Stamp an operation, keeping at most `limit` history entries.
    pub fn record_operation(&mut self, op: OperationKind, now: i64, outcome: impl Into<String>, limit: usize) {
        self.last_operation = op;
        self.last_operation_time = now;
        self.history.push(HistoryEntry {
            operation_id: OperationId::new(),
            operation: op,
            at: now,
            outcome: outcome.into(),
        });
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }

    pub fn describe(&self) -> String {
        match (self.status, self.readiness) {
            (RecordStatus::Created, Readiness::Unknown) => "created, readiness unknown".to_string(),
            (status, Readiness::Unknown) => status.to_string(),
            (status, readiness) => format!("{status}, {readiness}"),
        }
    }
}

/// Settings captured into the document on every save.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub runtime: String,
    #[serde(default)]
    pub default_readiness_timeout_secs: Option<u64>,
    #[serde(default)]
    pub history_limit: usize,
    #[serde(default)]
    pub recent_limit: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateLimits {
    /// Per-record operation history cap.
    pub history_limit: usize,
    /// Cap of the `container_history` recency list.
    pub recent_limit: usize,
}

impl Default for StateLimits {
    fn default() -> Self {
        Self { history_limit: 20, recent_limit: 10 }
    }
}

/// The whole persisted document.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlobalState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub config: ConfigSnapshot,
    #[serde(default)]
    pub last_container: Option<String>,
    /// Most recent first, no duplicates.
    #[serde(default)]
    pub container_history: Vec<String>,
    #[serde(default)]
    pub operations: BTreeMap<String, TrackedRecord>,
    /// Fields written by newer versions, kept so a save does not drop them.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_version() -> u32 {
    STATE_VERSION
}

impl Default for GlobalState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            config: ConfigSnapshot::default(),
            last_container: None,
            container_history: vec![],
            operations: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl GlobalState {
    pub fn get(&self, name: &str) -> Option<&TrackedRecord> {
        self.operations.get(name)
    }

    pub fn upsert(&mut self, record: TrackedRecord, limits: StateLimits) {
        self.touch_recent(&record.name, limits.recent_limit);
        self.operations.insert(record.name.clone(), record);
    }

    pub fn remove(&mut self, name: &str) -> Option<TrackedRecord> {
        let removed = self.operations.remove(name);
        self.container_history.retain(|n| n != name);
        if self.last_container.as_deref() == Some(name) {
            self.last_container = self.container_history.first().cloned();
        }
        removed
    }

    /// Move `name` to the front of the recency list and make it the default target.
    pub fn touch_recent(&mut self, name: &str, cap: usize) {
        self.container_history.retain(|n| n != name);
        self.container_history.insert(0, name.to_string());
        self.container_history.truncate(cap.max(1));
        self.last_container = Some(name.to_string());
    }

    pub fn names(&self) -> Vec<String> {
        self.operations.keys().cloned().collect()
    }
}
