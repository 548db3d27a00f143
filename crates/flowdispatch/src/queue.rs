use crate::clock::Clock;
use crate::config::DispatchConfig;
use crate::fingerprint::{Deduper, Verdict};
use crate::nodes::NodeRegistry;
use crate::store::{Claim, Completion, CompletionResult, Store};
use async_trait::async_trait;
use chrono::Duration;
use flowcore::dispatch::{
    CannotRunRequest, CoordinatorClient, FinishRequest, NextFileRequest, RegisterRequest,
};
use flowcore::{DispatchError, FileStatus, FlowId, Library, LibraryFile, ProcessingNode};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The coordinator: hands out files, tracks their lifecycle, recovers after crashes
pub struct WorkQueue {
    store: Arc<dyn Store>,
    nodes: NodeRegistry,
    deduper: Deduper,
    clock: Arc<dyn Clock>,
    /// Flows the coordinator can hand out, by uid; empty means unknown.
    known_flows: RwLock<Arc<HashMap<FlowId, String>>>,
}

impl WorkQueue {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: DispatchConfig) -> Self {
        Self {
            nodes: NodeRegistry::new(store.clone(), clock.clone(), config),
            deduper: Deduper::new(store.clone()),
            store,
            clock,
            known_flows: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn set_known_flows(&self, flows: impl IntoIterator<Item = (FlowId, String)>) {
        *self.known_flows.write().await = Arc::new(flows.into_iter().collect());
    }

    pub async fn add_library(&self, library: Library) -> Result<(), DispatchError> {
        info!(library = %library.name, path = %library.path, "Adding library");
        Ok(self.store.upsert_library(library).await?)
    }

    /// Queue a newly discovered path. Known paths are returned unchanged.
    pub async fn add_file(
        &self,
        library_uid: Uuid,
        path: &str,
        fingerprint: Option<String>,
    ) -> Result<LibraryFile, DispatchError> {
        if let Some(existing) = self.store.find_by_path(library_uid, path).await? {
            return Ok(existing);
        }

        let now = self.clock.now();
        let mut file = LibraryFile::new(library_uid, path, now);
        file.fingerprint = fingerprint;

        match self.store.library(library_uid).await? {
            None => {
                warn!(file = %path, library = %library_uid, "file belongs to an unknown library");
                file.status = FileStatus::MissingLibrary;
            }
            Some(library) => {
                if library.hold_minutes > 0 {
                    file.hold_until = Some(now + Duration::minutes(library.hold_minutes as i64));
                }
                if let Some(fingerprint) = &file.fingerprint {
                    if let Verdict::Duplicate(original) =
                        self.deduper.evaluate(library_uid, fingerprint, file.uid).await?
                    {
                        info!(file = %path, original = %original, "Duplicate file detected");
                        file.status = FileStatus::Duplicate;
                        file.duplicate_of = Some(original);
                    }
                }
            }
        }

        debug!(file = %path, status = ?file.status, "queued file");
        self.store.insert_file(file.clone()).await?;
        Ok(file)
    }

    pub async fn register_node(&self, request: RegisterRequest) -> Result<ProcessingNode, DispatchError> {
        self.nodes.register(request).await
    }

    /// Hand at most one file to the requesting worker, ownership already stamped
    pub async fn get_next(&self, request: NextFileRequest) -> Result<Option<LibraryFile>, DispatchError> {
        let node = self
            .nodes
            .get(request.node_uid)
            .await?
            .ok_or(DispatchError::NodeNotFound(request.node_uid))?;
        self.nodes.touch(&node).await?;

        let now = self.clock.now();
        if !self.nodes.can_run(&node, now).await {
            debug!(node = %node.name, "node is not eligible for work right now");
            return Ok(None);
        }

        let claim = Claim {
            max_owned: node.flow_runners.max(1) as usize,
            node,
            worker_uid: request.worker_uid,
            now,
            flow_names: self.known_flows.read().await.clone(),
        };
        let Some(file) = self.store.claim_next(&claim).await? else {
            return Ok(None);
        };

        info!(
            file = %file.name,
            node = %claim.node.name,
            worker = %request.worker_uid,
            "Assigned file"
        );
        Ok(Some(file))
    }

    pub async fn node_cannot_run(&self, request: CannotRunRequest) -> Result<(), DispatchError> {
        if self.store.node(request.node_uid).await?.is_none() {
            return Err(DispatchError::NodeNotFound(request.node_uid));
        }
        self.nodes.mark_cannot_run(request.node_uid, request.seconds).await;
        Ok(())
    }

    /// Record a node's result for a file it owns
    pub async fn finish_processing(&self, request: FinishRequest) -> Result<(), DispatchError> {
        if !request.status.is_processing_result() {
            return Err(DispatchError::InvalidResult(request.status));
        }
        let completion = Completion {
            file_uid: request.file_uid,
            worker_uid: request.worker_uid,
            status: request.status,
            failure_reason: request.failure_reason,
            executed_nodes: request.executed_nodes,
            flow_uid: request.flow_uid,
            flow_name: request.flow_name,
            log: request.log,
            ended: self.clock.now(),
        };
        match self.store.complete(completion).await? {
            CompletionResult::Finished(file) => {
                info!(file = %file.name, status = ?file.status, "File finished");
                Ok(())
            }
            CompletionResult::Missing => Err(DispatchError::FileNotFound(request.file_uid)),
            CompletionResult::NotProcessing(status) => Err(DispatchError::InvalidStatus {
                file: request.file_uid,
                status,
                expected: FileStatus::Processing,
            }),
            CompletionResult::NotOwner => Err(DispatchError::NotOwner {
                file: request.file_uid,
            }),
        }
    }

    /// Release files stuck in `Processing`, for one node or all of them
    pub async fn reset_processing_status(&self, node: Option<Uuid>) -> Result<usize, DispatchError> {
        let reset = self.store.reset_processing(node).await?;
        if reset > 0 {
            info!(count = reset, node = ?node, "Reset files left in processing");
        }
        Ok(reset)
    }

    /// Put `files` ahead of everything else, in the given order
    pub async fn move_to_top(&self, files: &[Uuid]) -> Result<(), DispatchError> {
        let lowest = self
            .store
            .files()
            .await?
            .iter()
            .filter_map(|f| f.order)
            .min()
            .unwrap_or(0)
            .min(0);
        let count = files.len() as i64;
        for (index, uid) in files.iter().enumerate() {
            let mut file = self
                .store
                .file(*uid)
                .await?
                .ok_or(DispatchError::FileNotFound(*uid))?;
            file.order = Some(lowest - count + index as i64);
            self.store.update_file(file).await?;
        }
        Ok(())
    }

    /// Queue a finished file again, optionally through a different flow
    pub async fn reprocess(&self, uid: Uuid, flow: Option<FlowId>) -> Result<(), DispatchError> {
        let mut file = self
            .store
            .file(uid)
            .await?
            .ok_or(DispatchError::FileNotFound(uid))?;
        if !file.status.is_processing_result() {
            return Err(DispatchError::InvalidStatus {
                file: uid,
                status: file.status,
                expected: FileStatus::ProcessingFailed,
            });
        }
        file.clear_processing();
        match flow {
            Some(flow) => {
                file.flow_uid = Some(flow);
                file.flow_name = None;
                file.status = FileStatus::ReprocessByFlow;
            }
            None => file.status = FileStatus::Unprocessed,
        }
        info!(file = %file.name, status = ?file.status, "Reprocessing file");
        self.store.update_file(file).await?;
        Ok(())
    }

    /// Operator override: process this file even though it is a duplicate
    pub async fn force_reprocess(&self, uid: Uuid) -> Result<(), DispatchError> {
        let mut file = self
            .store
            .file(uid)
            .await?
            .ok_or(DispatchError::FileNotFound(uid))?;
        if file.status == FileStatus::Processing {
            return Err(DispatchError::InvalidStatus {
                file: uid,
                status: file.status,
                expected: FileStatus::Duplicate,
            });
        }
        file.clear_processing();
        file.duplicate_of = None;
        file.status = FileStatus::Unprocessed;
        info!(file = %file.name, "Forced reprocess");
        self.store.update_file(file).await?;
        Ok(())
    }

    /// Recompute the waiting side lanes from library and flow state.
    /// Returns how many files changed status.
    pub async fn refresh_statuses(&self) -> Result<usize, DispatchError> {
        let now = self.clock.now();
        let libraries: HashMap<Uuid, Library> = self
            .store
            .libraries()
            .await?
            .into_iter()
            .map(|l| (l.uid, l))
            .collect();
        let known_flows = self.known_flows.read().await.clone();

        let mut changed = 0;
        for mut file in self.store.files().await? {
            if !file.status.is_waiting_lane() {
                continue;
            }
            // a node-reported FlowNotFound is a result, not a lane
            if file.status == FileStatus::FlowNotFound && file.processing_ended.is_some() {
                continue;
            }

            let status = match libraries.get(&file.library_uid) {
                None => FileStatus::MissingLibrary,
                Some(library) if !library.enabled => FileStatus::Disabled,
                Some(library) if !library.schedule.is_active_at(&now) => FileStatus::OutOfSchedule,
                Some(library) => match file.flow_uid.or(library.flow_uid) {
                    None => FileStatus::FlowNotFound,
                    Some(flow) if !known_flows.is_empty() && !known_flows.contains_key(&flow) => {
                        FileStatus::FlowNotFound
                    }
                    Some(_) => FileStatus::Unprocessed,
                },
            };
            if status != file.status {
                debug!(file = %file.name, from = ?file.status, to = ?status, "status lane changed");
                file.status = status;
                self.store.update_file(file).await?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    pub async fn file(&self, uid: Uuid) -> Result<Option<LibraryFile>, DispatchError> {
        Ok(self.store.file(uid).await?)
    }

    pub async fn file_log(&self, uid: Uuid) -> Result<Option<Vec<String>>, DispatchError> {
        Ok(self.store.log(uid).await?)
    }
}

#[async_trait]
impl CoordinatorClient for WorkQueue {
    async fn register(&self, request: RegisterRequest) -> Result<ProcessingNode, DispatchError> {
        self.register_node(request).await
    }

    async fn next_file(&self, request: NextFileRequest) -> Result<Option<LibraryFile>, DispatchError> {
        self.get_next(request).await
    }

    async fn node_cannot_run(&self, request: CannotRunRequest) -> Result<(), DispatchError> {
        WorkQueue::node_cannot_run(self, request).await
    }

    async fn finish_processing(&self, request: FinishRequest) -> Result<(), DispatchError> {
        WorkQueue::finish_processing(self, request).await
    }

    async fn reset_processing(&self, node_uid: Uuid) -> Result<usize, DispatchError> {
        if self.store.node(node_uid).await?.is_none() {
            return Err(DispatchError::NodeNotFound(node_uid));
        }
        self.reset_processing_status(Some(node_uid)).await
    }
}
