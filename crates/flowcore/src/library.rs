use crate::flow::{FlowId, PartId};
use crate::{Schedule, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FileStatus {
    #[default]
    Unprocessed,
    Processing,
    Processed,
    ProcessingFailed,
    Duplicate,
    OutOfSchedule,
    Disabled,
    MappingIssue,
    MissingLibrary,
    FlowNotFound,
    ReprocessByFlow,
}

impl FileStatus {
    /// Statuses a node may report when it finishes with a file.
    pub fn is_processing_result(self) -> bool {
        matches!(
            self,
            FileStatus::Processed
                | FileStatus::ProcessingFailed
                | FileStatus::MappingIssue
                | FileStatus::FlowNotFound
        )
    }

    /// Side lanes recomputed from library state rather than set by a run.
    pub fn is_waiting_lane(self) -> bool {
        matches!(
            self,
            FileStatus::Unprocessed
                | FileStatus::OutOfSchedule
                | FileStatus::Disabled
                | FileStatus::MissingLibrary
                | FileStatus::FlowNotFound
                | FileStatus::ReprocessByFlow
        )
    }
}

/// A watched location whose files are queued for processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub uid: Uuid,
    pub name: String,
    pub path: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub flow_uid: Option<FlowId>,
    /// Minutes a newly discovered file waits before it may be claimed.
    #[serde(default)]
    pub hold_minutes: u32,
}

fn default_true() -> bool {
    true
}

impl Library {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            name: name.into(),
            path: path.into(),
            enabled: true,
            schedule: Schedule::always(),
            flow_uid: None,
            hold_minutes: 0,
        }
    }

    pub fn with_flow(mut self, flow: FlowId) -> Self {
        self.flow_uid = Some(flow);
        self
    }
}

/// A queued unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryFile {
    pub uid: Uuid,
    /// Full path as seen by the coordinator.
    pub name: String,
    pub library_uid: Uuid,
    pub status: FileStatus,
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub duplicate_of: Option<Uuid>,
    /// Flow chosen for this file; overrides the library flow when set before claim.
    #[serde(default)]
    pub flow_uid: Option<FlowId>,
    #[serde(default)]
    pub flow_name: Option<String>,
    #[serde(default)]
    pub node_uid: Option<Uuid>,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub worker_uid: Option<Uuid>,
    /// Lower sorts first; set by "move to top".
    #[serde(default)]
    pub order: Option<i64>,
    pub date_created: DateTime<Utc>,
    #[serde(default)]
    pub hold_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processing_started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processing_ended: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub executed_nodes: Vec<ExecutedNode>,
    #[serde(default)]
    pub custom_variables: HashMap<String, Value>,
}

impl LibraryFile {
    pub fn new(library_uid: Uuid, name: impl Into<String>, created: DateTime<Utc>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            name: name.into(),
            library_uid,
            status: FileStatus::Unprocessed,
            fingerprint: None,
            duplicate_of: None,
            flow_uid: None,
            flow_name: None,
            node_uid: None,
            node_name: None,
            worker_uid: None,
            order: None,
            date_created: created,
            hold_until: None,
            processing_started: None,
            processing_ended: None,
            failure_reason: None,
            executed_nodes: Vec::new(),
            custom_variables: HashMap::new(),
        }
    }

    /// Drops ownership and run results ahead of another pass.
    pub fn clear_processing(&mut self) {
        self.node_uid = None;
        self.node_name = None;
        self.worker_uid = None;
        self.processing_started = None;
        self.processing_ended = None;
        self.failure_reason = None;
        self.executed_nodes.clear();
    }
}

/// Audit record of one step invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutedNode {
    pub node_name: String,
    pub node_uid: String,
    pub part_uid: PartId,
    pub output: i32,
    pub depth: usize,
    pub position: usize,
    pub processing_time_ms: u64,
}
