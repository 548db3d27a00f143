//! Durable records behind the coordinator.
//!
//! Every status transition goes through a [`Store`]. The one operation that
//! must be atomic is [`Store::claim_next`]: selecting an eligible file and
//! stamping ownership happen under a single lock, which is what keeps two
//! concurrent pollers from ever owning the same file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowcore::{DispatchError, ExecutedNode, FileStatus, FlowId, Library, LibraryFile, ProcessingNode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Record not found: {0}")]
    NotFound(Uuid),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for DispatchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(uid) => DispatchError::FileNotFound(uid),
            other => DispatchError::Store(other.to_string()),
        }
    }
}

/// Who is asking for work, and when
#[derive(Debug, Clone)]
pub struct Claim {
    pub node: ProcessingNode,
    pub worker_uid: Uuid,
    pub now: DateTime<Utc>,
    /// Files this node may own at once.
    pub max_owned: usize,
    /// Names stamped onto the claimed file's flow.
    pub flow_names: Arc<HashMap<FlowId, String>>,
}

/// A node's result, applied only while the reporting worker still owns the file
#[derive(Debug, Clone)]
pub struct Completion {
    pub file_uid: Uuid,
    pub worker_uid: Uuid,
    pub status: FileStatus,
    pub failure_reason: Option<String>,
    pub executed_nodes: Vec<ExecutedNode>,
    pub flow_uid: Option<FlowId>,
    pub flow_name: Option<String>,
    pub log: Vec<String>,
    pub ended: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum CompletionResult {
    Finished(LibraryFile),
    Missing,
    NotProcessing(FileStatus),
    NotOwner,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn libraries(&self) -> Result<Vec<Library>, StoreError>;
    async fn library(&self, uid: Uuid) -> Result<Option<Library>, StoreError>;
    async fn upsert_library(&self, library: Library) -> Result<(), StoreError>;

    async fn insert_file(&self, file: LibraryFile) -> Result<(), StoreError>;
    async fn file(&self, uid: Uuid) -> Result<Option<LibraryFile>, StoreError>;
    /// Replace an existing file record.
    async fn update_file(&self, file: LibraryFile) -> Result<(), StoreError>;
    async fn files(&self) -> Result<Vec<LibraryFile>, StoreError>;
    async fn find_by_path(&self, library: Uuid, path: &str) -> Result<Option<LibraryFile>, StoreError>;
    /// Another file in `library` with this fingerprint, originals before duplicates.
    async fn find_by_fingerprint(
        &self,
        library: Uuid,
        fingerprint: &str,
        exclude: Uuid,
    ) -> Result<Option<LibraryFile>, StoreError>;

    /// Atomically pick the next eligible `Unprocessed` file and mark it
    /// `Processing`, owned by the claiming node and worker.
    async fn claim_next(&self, claim: &Claim) -> Result<Option<LibraryFile>, StoreError>;
    /// Apply `completion` and its log in one step, provided the file is
    /// still `Processing` under the reporting worker.
    async fn complete(&self, completion: Completion) -> Result<CompletionResult, StoreError>;
    /// Return `Processing` files (optionally for one node) to `Unprocessed`.
    async fn reset_processing(&self, node: Option<Uuid>) -> Result<usize, StoreError>;

    async fn node(&self, uid: Uuid) -> Result<Option<ProcessingNode>, StoreError>;
    async fn node_by_address(&self, address: &str) -> Result<Option<ProcessingNode>, StoreError>;
    async fn upsert_node(&self, node: ProcessingNode) -> Result<(), StoreError>;
    async fn nodes(&self) -> Result<Vec<ProcessingNode>, StoreError>;

    async fn save_log(&self, file: Uuid, lines: Vec<String>) -> Result<(), StoreError>;
    async fn log(&self, file: Uuid) -> Result<Option<Vec<String>>, StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    #[serde(default)]
    libraries: HashMap<Uuid, Library>,
    #[serde(default)]
    files: HashMap<Uuid, LibraryFile>,
    #[serde(default)]
    nodes: HashMap<Uuid, ProcessingNode>,
    #[serde(default)]
    logs: HashMap<Uuid, Vec<String>>,
}

/// Priority order: explicit `order` first (lowest wins), then arrival.
pub fn queue_order(a: &LibraryFile, b: &LibraryFile) -> std::cmp::Ordering {
    match (a.order, b.order) {
        (Some(x), Some(y)) => x.cmp(&y).then(a.date_created.cmp(&b.date_created)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.date_created.cmp(&b.date_created),
    }
}

/// In-memory store with an optional JSON snapshot on disk
pub struct MemoryStore {
    state: Mutex<State>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            snapshot: None,
        }
    }

    /// Load `path` if it exists; every mutation is written back to it.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => State::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(path = %path.display(), "Opened store snapshot");
        Ok(Self {
            state: Mutex::new(state),
            snapshot: Some(path),
        })
    }

    async fn persist(&self, state: &State) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn eligible(file: &LibraryFile, library: Option<&Library>, claim: &Claim) -> bool {
    let Some(library) = library else {
        return false;
    };
    file.status == FileStatus::Unprocessed
        && file.hold_until.map_or(true, |until| until <= claim.now)
        && library.enabled
        && library.schedule.is_active_at(&claim.now)
        && claim.node.permits_library(library.uid)
        && (file.flow_uid.is_some() || library.flow_uid.is_some())
}

#[async_trait]
impl Store for MemoryStore {
    async fn libraries(&self) -> Result<Vec<Library>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.libraries.values().cloned().collect())
    }

    async fn library(&self, uid: Uuid) -> Result<Option<Library>, StoreError> {
        Ok(self.state.lock().await.libraries.get(&uid).cloned())
    }

    async fn upsert_library(&self, library: Library) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.libraries.insert(library.uid, library);
        self.persist(&state).await
    }

    async fn insert_file(&self, file: LibraryFile) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.files.insert(file.uid, file);
        self.persist(&state).await
    }

    async fn file(&self, uid: Uuid) -> Result<Option<LibraryFile>, StoreError> {
        Ok(self.state.lock().await.files.get(&uid).cloned())
    }

    async fn update_file(&self, file: LibraryFile) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let slot = state
            .files
            .get_mut(&file.uid)
            .ok_or(StoreError::NotFound(file.uid))?;
        *slot = file;
        self.persist(&state).await
    }

    async fn files(&self) -> Result<Vec<LibraryFile>, StoreError> {
        let state = self.state.lock().await;
        let mut files: Vec<LibraryFile> = state.files.values().cloned().collect();
        files.sort_by(queue_order);
        Ok(files)
    }

    async fn find_by_path(&self, library: Uuid, path: &str) -> Result<Option<LibraryFile>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .files
            .values()
            .find(|f| f.library_uid == library && f.name == path)
            .cloned())
    }

    async fn find_by_fingerprint(
        &self,
        library: Uuid,
        fingerprint: &str,
        exclude: Uuid,
    ) -> Result<Option<LibraryFile>, StoreError> {
        let state = self.state.lock().await;
        let mut matches: Vec<&LibraryFile> = state
            .files
            .values()
            .filter(|f| {
                f.uid != exclude
                    && f.library_uid == library
                    && f.fingerprint.as_deref() == Some(fingerprint)
            })
            .collect();
        matches.sort_by_key(|f| (f.status == FileStatus::Duplicate, f.date_created));
        Ok(matches.first().map(|f| (*f).clone()))
    }

    async fn claim_next(&self, claim: &Claim) -> Result<Option<LibraryFile>, StoreError> {
        let mut state = self.state.lock().await;

        let owned = state
            .files
            .values()
            .filter(|f| f.status == FileStatus::Processing && f.node_uid == Some(claim.node.uid))
            .count();
        if owned >= claim.max_owned {
            return Ok(None);
        }

        let next = state
            .files
            .values()
            .filter(|f| eligible(f, state.libraries.get(&f.library_uid), claim))
            .min_by(|a, b| queue_order(a, b))
            .map(|f| f.uid);
        let Some(uid) = next else {
            return Ok(None);
        };

        let library_flow = state
            .files
            .get(&uid)
            .and_then(|f| state.libraries.get(&f.library_uid))
            .and_then(|l| l.flow_uid);
        let file = state.files.get_mut(&uid).ok_or(StoreError::NotFound(uid))?;
        file.status = FileStatus::Processing;
        file.node_uid = Some(claim.node.uid);
        file.node_name = Some(claim.node.name.clone());
        file.worker_uid = Some(claim.worker_uid);
        file.processing_started = Some(claim.now);
        file.processing_ended = None;
        file.failure_reason = None;
        file.executed_nodes.clear();
        if file.flow_uid.is_none() {
            file.flow_uid = library_flow;
        }
        if let Some(name) = file.flow_uid.and_then(|flow| claim.flow_names.get(&flow)) {
            file.flow_name = Some(name.clone());
        }
        let claimed = file.clone();

        self.persist(&state).await?;
        Ok(Some(claimed))
    }

    async fn complete(&self, completion: Completion) -> Result<CompletionResult, StoreError> {
        let mut state = self.state.lock().await;
        let Some(file) = state.files.get_mut(&completion.file_uid) else {
            return Ok(CompletionResult::Missing);
        };
        if file.status != FileStatus::Processing {
            return Ok(CompletionResult::NotProcessing(file.status));
        }
        if file.worker_uid != Some(completion.worker_uid) {
            return Ok(CompletionResult::NotOwner);
        }

        file.status = completion.status;
        file.failure_reason = completion.failure_reason;
        file.executed_nodes = completion.executed_nodes;
        file.processing_ended = Some(completion.ended);
        file.worker_uid = None;
        if completion.flow_uid.is_some() {
            file.flow_uid = completion.flow_uid;
        }
        if completion.flow_name.is_some() {
            file.flow_name = completion.flow_name;
        }
        let finished = file.clone();
        state.logs.insert(completion.file_uid, completion.log);

        self.persist(&state).await?;
        Ok(CompletionResult::Finished(finished))
    }

    async fn reset_processing(&self, node: Option<Uuid>) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let mut reset = 0;
        for file in state.files.values_mut() {
            if file.status != FileStatus::Processing {
                continue;
            }
            if node.is_some() && file.node_uid != node {
                continue;
            }
            file.status = FileStatus::Unprocessed;
            file.clear_processing();
            reset += 1;
        }
        if reset > 0 {
            self.persist(&state).await?;
        }
        Ok(reset)
    }

    async fn node(&self, uid: Uuid) -> Result<Option<ProcessingNode>, StoreError> {
        Ok(self.state.lock().await.nodes.get(&uid).cloned())
    }

    async fn node_by_address(&self, address: &str) -> Result<Option<ProcessingNode>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.nodes.values().find(|n| n.address == address).cloned())
    }

    async fn upsert_node(&self, node: ProcessingNode) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.nodes.insert(node.uid, node);
        self.persist(&state).await
    }

    async fn nodes(&self) -> Result<Vec<ProcessingNode>, StoreError> {
        let state = self.state.lock().await;
        let mut nodes: Vec<ProcessingNode> = state.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(nodes)
    }

    async fn save_log(&self, file: Uuid, lines: Vec<String>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.logs.insert(file, lines);
        self.persist(&state).await
    }

    async fn log(&self, file: Uuid) -> Result<Option<Vec<String>>, StoreError> {
        Ok(self.state.lock().await.logs.get(&file).cloned())
    }
}
