//! Payloads exchanged between processing nodes and the coordinator.

use crate::flow::FlowId;
use crate::{DispatchError, ExecutedNode, FileStatus, LibraryFile, ProcessingNode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub operating_system: String,
    /// Runner count suggested on first registration.
    #[serde(default)]
    pub flow_runners: Option<u32>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextFileRequest {
    pub node_name: String,
    pub node_uid: Uuid,
    #[serde(default)]
    pub node_version: String,
    pub worker_uid: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CannotRunRequest {
    pub node_uid: Uuid,
    pub seconds: u64,
}

/// Release `Processing` files; `None` releases every node's files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub node_uid: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetResponse {
    pub reset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishRequest {
    pub file_uid: Uuid,
    pub worker_uid: Uuid,
    pub status: FileStatus,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub log: Vec<String>,
    #[serde(default)]
    pub executed_nodes: Vec<ExecutedNode>,
    #[serde(default)]
    pub flow_uid: Option<FlowId>,
    #[serde(default)]
    pub flow_name: Option<String>,
}

/// What a processing node needs from the coordinator
#[async_trait]
pub trait CoordinatorClient: Send + Sync {
    async fn register(&self, request: RegisterRequest) -> Result<ProcessingNode, DispatchError>;

    /// At most one file, already marked as owned by the caller.
    async fn next_file(&self, request: NextFileRequest)
        -> Result<Option<LibraryFile>, DispatchError>;

    async fn node_cannot_run(&self, request: CannotRunRequest) -> Result<(), DispatchError>;

    async fn finish_processing(&self, request: FinishRequest) -> Result<(), DispatchError>;

    /// Release files a previous run of this node left in `Processing`.
    async fn reset_processing(&self, node_uid: Uuid) -> Result<usize, DispatchError>;
}
