//! Processing-node side: poll the coordinator, run files, report back.

use crate::runner::{variables, RunRequest};
use crate::runtime::FlowRuntime;
use flowcore::dispatch::{
    CannotRunRequest, CoordinatorClient, FinishRequest, NextFileRequest, RegisterRequest,
};
use flowcore::{DispatchError, FileStatus, LibraryFile, ProcessingNode, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NodeWorkerConfig {
    pub address: String,
    pub name: Option<String>,
    pub version: String,
    /// Worker loops to run; the coordinator's value wins once registered.
    pub flow_runners: Option<u32>,
    pub poll_interval: Duration,
    /// Prefix rewrites from coordinator paths to local paths, applied in order.
    pub path_mappings: Vec<(String, String)>,
    /// Seconds to back off after the coordinator rejects a poll.
    pub unavailable_backoff_secs: u64,
    /// Extra attempts at reporting a result after a transient failure.
    pub finish_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub finish_retry_delay: Duration,
    pub capabilities: Vec<String>,
}

impl Default for NodeWorkerConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            name: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            flow_runners: None,
            poll_interval: Duration::from_secs(10),
            path_mappings: Vec::new(),
            unavailable_backoff_secs: 60,
            finish_retries: 5,
            finish_retry_delay: Duration::from_secs(1),
            capabilities: Vec::new(),
        }
    }
}

/// What happened to one poll of the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    Idle,
    Processed { file: Uuid, status: FileStatus },
    /// The file was run but the coordinator never accepted the result.
    Unreported { file: Uuid, status: FileStatus },
}

/// Runs files handed out by a coordinator through the local runtime
pub struct NodeWorker {
    client: Arc<dyn CoordinatorClient>,
    runtime: Arc<FlowRuntime>,
    config: NodeWorkerConfig,
}

impl NodeWorker {
    pub fn new(
        client: Arc<dyn CoordinatorClient>,
        runtime: Arc<FlowRuntime>,
        config: NodeWorkerConfig,
    ) -> Self {
        Self {
            client,
            runtime,
            config,
        }
    }

    pub async fn register(&self) -> Result<ProcessingNode, DispatchError> {
        let node = self
            .client
            .register(RegisterRequest {
                address: self.config.address.clone(),
                name: self.config.name.clone(),
                version: self.config.version.clone(),
                architecture: std::env::consts::ARCH.to_string(),
                operating_system: std::env::consts::OS.to_string(),
                flow_runners: self.config.flow_runners,
                capabilities: self.config.capabilities.clone(),
            })
            .await?;
        info!(node = %node.name, uid = %node.uid, runners = node.flow_runners, "Registered with coordinator");
        Ok(node)
    }

    /// Register, release files a previous run of this node still owns, then
    /// poll with `flow_runners` loops until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), DispatchError> {
        let node = self.register().await?;
        let released = self.client.reset_processing(node.uid).await?;
        if released > 0 {
            warn!(node = %node.name, count = released, "Released files left in processing by a previous run");
        }
        let runners = node.flow_runners.max(1);
        let node = Arc::new(node);

        let mut loops = JoinSet::new();
        for index in 0..runners {
            let worker = self.clone();
            let node = node.clone();
            let shutdown = shutdown.clone();
            loops.spawn(async move { worker.worker_loop(index, &node, shutdown).await });
        }
        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                error!("worker loop ended abnormally: {}", e);
            }
        }
        info!(node = %node.name, "All worker loops stopped");
        Ok(())
    }

    async fn worker_loop(&self, index: u32, node: &ProcessingNode, shutdown: CancellationToken) {
        let worker_uid = Uuid::new_v4();
        debug!(node = %node.name, worker = %worker_uid, index, "worker loop started");

        while !shutdown.is_cancelled() {
            let wait = match self.process_next(node, worker_uid, &shutdown).await {
                Ok(PollResult::Processed { .. }) => continue,
                Ok(PollResult::Unreported { file, .. }) => {
                    error!(node = %node.name, worker = %worker_uid, file = %file, "result was not accepted by the coordinator");
                    self.config.poll_interval
                }
                Ok(PollResult::Idle) => self.config.poll_interval,
                Err(e) => {
                    warn!(node = %node.name, worker = %worker_uid, "poll failed: {}", e);
                    self.backoff(node).await;
                    self.config.poll_interval
                }
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        debug!(node = %node.name, worker = %worker_uid, "worker loop stopped");
    }

    async fn backoff(&self, node: &ProcessingNode) {
        let request = CannotRunRequest {
            node_uid: node.uid,
            seconds: self.config.unavailable_backoff_secs,
        };
        if let Err(e) = self.client.node_cannot_run(request).await {
            debug!(node = %node.name, "could not report backoff: {}", e);
        }
    }

    /// Ask for one file and, if one is handed out, process and report it.
    pub async fn process_next(
        &self,
        node: &ProcessingNode,
        worker_uid: Uuid,
        cancellation: &CancellationToken,
    ) -> Result<PollResult, DispatchError> {
        let request = NextFileRequest {
            node_name: node.name.clone(),
            node_uid: node.uid,
            node_version: self.config.version.clone(),
            worker_uid,
        };
        let Some(file) = self.client.next_file(request).await? else {
            return Ok(PollResult::Idle);
        };

        info!(node = %node.name, file = %file.name, "Processing file");
        let finish = self.execute_file(&file, worker_uid, cancellation.child_token()).await;
        let status = finish.status;
        if let Err(e) = self.report(finish).await {
            error!(node = %node.name, file = %file.name, "could not report result: {}", e);
            return Ok(PollResult::Unreported {
                file: file.uid,
                status,
            });
        }
        info!(node = %node.name, file = %file.name, status = ?status, "Finished file");

        Ok(PollResult::Processed {
            file: file.uid,
            status,
        })
    }

    /// Send a result, retrying transient failures with a doubling delay.
    async fn report(&self, finish: FinishRequest) -> Result<(), DispatchError> {
        let mut delay = self.config.finish_retry_delay;
        let mut attempt = 0;
        loop {
            match self.client.finish_processing(finish.clone()).await {
                Ok(()) => return Ok(()),
                Err(e @ (DispatchError::Transport(_) | DispatchError::Store(_)))
                    if attempt < self.config.finish_retries =>
                {
                    attempt += 1;
                    warn!(file = %finish.file_uid, attempt, "reporting result failed, retrying: {}", e);
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn execute_file(
        &self,
        file: &LibraryFile,
        worker_uid: Uuid,
        cancellation: CancellationToken,
    ) -> FinishRequest {
        let mut finish = FinishRequest {
            file_uid: file.uid,
            worker_uid,
            status: FileStatus::ProcessingFailed,
            failure_reason: None,
            log: Vec::new(),
            executed_nodes: Vec::new(),
            flow_uid: file.flow_uid,
            flow_name: file.flow_name.clone(),
        };

        let configuration = self.runtime.configuration().await;
        let Some(flow) = file.flow_uid.and_then(|uid| configuration.flow(uid)).cloned() else {
            warn!(file = %file.name, flow = ?file.flow_uid, "flow not found on this node");
            finish.status = FileStatus::FlowNotFound;
            finish.failure_reason = Some("Flow not found".to_string());
            return finish;
        };

        let local = map_path(&file.name, &self.config.path_mappings);
        let exists = tokio::fs::try_exists(&local).await.unwrap_or(false);
        if !exists {
            warn!(file = %file.name, local = %local, "file not reachable from this node");
            finish.status = FileStatus::MappingIssue;
            finish.failure_reason = Some(format!("File not found: {}", local));
            return finish;
        }

        let mut request = RunRequest::new(flow, local)
            .for_library_file(file.uid)
            .with_variables(file.custom_variables.clone())
            .with_variable(variables::FILE_ORIGINAL, Value::from(file.name.clone()))
            .with_cancellation(cancellation);
        request
            .variables
            .insert("library.Uid".to_string(), Value::from(file.library_uid.to_string()));

        let report = self.runtime.run(request).await;
        finish.status = report.file_status();
        finish.failure_reason = report.failure_reason();
        finish.flow_uid = Some(report.flow_uid);
        finish.flow_name = Some(report.flow_name.clone());
        finish.executed_nodes = report.executed_nodes;
        finish.log = report.log;
        finish
    }
}

/// Rewrite a coordinator path with the first matching prefix mapping.
pub fn map_path(path: &str, mappings: &[(String, String)]) -> String {
    for (from, to) in mappings {
        if let Some(rest) = path.strip_prefix(from.as_str()) {
            let mapped = format!("{}{}", to, rest);
            return Path::new(&mapped).to_string_lossy().into_owned();
        }
    }
    path.to_string()
}
