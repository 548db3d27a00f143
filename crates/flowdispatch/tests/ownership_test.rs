// crates/flowdispatch/tests/ownership_test.rs

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use flowcore::dispatch::{FinishRequest, NextFileRequest, RegisterRequest};
use flowcore::{DispatchError, FileStatus, FlowId, Library, LibraryFile, ProcessingNode};
use flowdispatch::{
    Claim, Completion, CompletionResult, DispatchConfig, ManualClock, MemoryStore, Store,
    StoreError, WorkQueue,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Runs a crash reset and a second node's claim right after the next claim,
/// before the claiming request has returned.
struct InterleavingStore {
    inner: Arc<MemoryStore>,
    pending: Mutex<Option<Claim>>,
    interleaved: Mutex<Option<LibraryFile>>,
}

#[async_trait]
impl Store for InterleavingStore {
    async fn libraries(&self) -> Result<Vec<Library>, StoreError> {
        self.inner.libraries().await
    }

    async fn library(&self, uid: Uuid) -> Result<Option<Library>, StoreError> {
        self.inner.library(uid).await
    }

    async fn upsert_library(&self, library: Library) -> Result<(), StoreError> {
        self.inner.upsert_library(library).await
    }

    async fn insert_file(&self, file: LibraryFile) -> Result<(), StoreError> {
        self.inner.insert_file(file).await
    }

    async fn file(&self, uid: Uuid) -> Result<Option<LibraryFile>, StoreError> {
        self.inner.file(uid).await
    }

    async fn update_file(&self, file: LibraryFile) -> Result<(), StoreError> {
        self.inner.update_file(file).await
    }

    async fn files(&self) -> Result<Vec<LibraryFile>, StoreError> {
        self.inner.files().await
    }

    async fn find_by_path(&self, library: Uuid, path: &str) -> Result<Option<LibraryFile>, StoreError> {
        self.inner.find_by_path(library, path).await
    }

    async fn find_by_fingerprint(
        &self,
        library: Uuid,
        fingerprint: &str,
        exclude: Uuid,
    ) -> Result<Option<LibraryFile>, StoreError> {
        self.inner.find_by_fingerprint(library, fingerprint, exclude).await
    }

    async fn claim_next(&self, claim: &Claim) -> Result<Option<LibraryFile>, StoreError> {
        let claimed = self.inner.claim_next(claim).await?;
        if let Some(other) = self.pending.lock().await.take() {
            self.inner.reset_processing(None).await?;
            *self.interleaved.lock().await = self.inner.claim_next(&other).await?;
        }
        Ok(claimed)
    }

    async fn complete(&self, completion: Completion) -> Result<CompletionResult, StoreError> {
        self.inner.complete(completion).await
    }

    async fn reset_processing(&self, node: Option<Uuid>) -> Result<usize, StoreError> {
        self.inner.reset_processing(node).await
    }

    async fn node(&self, uid: Uuid) -> Result<Option<ProcessingNode>, StoreError> {
        self.inner.node(uid).await
    }

    async fn node_by_address(&self, address: &str) -> Result<Option<ProcessingNode>, StoreError> {
        self.inner.node_by_address(address).await
    }

    async fn upsert_node(&self, node: ProcessingNode) -> Result<(), StoreError> {
        self.inner.upsert_node(node).await
    }

    async fn nodes(&self) -> Result<Vec<ProcessingNode>, StoreError> {
        self.inner.nodes().await
    }

    async fn save_log(&self, file: Uuid, lines: Vec<String>) -> Result<(), StoreError> {
        self.inner.save_log(file, lines).await
    }

    async fn log(&self, file: Uuid) -> Result<Option<Vec<String>>, StoreError> {
        self.inner.log(file).await
    }
}

fn register_request(address: &str) -> RegisterRequest {
    RegisterRequest {
        address: address.to_string(),
        name: None,
        version: "1.0.0".to_string(),
        architecture: "x86_64".to_string(),
        operating_system: "linux".to_string(),
        flow_runners: Some(1),
        capabilities: Vec::new(),
    }
}

fn finish_request(file: Uuid, worker_uid: Uuid) -> FinishRequest {
    FinishRequest {
        file_uid: file,
        worker_uid,
        status: FileStatus::Processed,
        failure_reason: None,
        log: Vec::new(),
        executed_nodes: Vec::new(),
        flow_uid: None,
        flow_name: None,
    }
}

#[tokio::test]
async fn test_claim_is_not_overwritten_after_reassignment() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap()));
    let inner = Arc::new(MemoryStore::new());
    let store = Arc::new(InterleavingStore {
        inner: inner.clone(),
        pending: Mutex::new(None),
        interleaved: Mutex::new(None),
    });
    let queue = WorkQueue::new(store.clone(), clock.clone(), DispatchConfig::default());

    let flow = FlowId::new_v4();
    let library = Library::new("Movies", "/m").with_flow(flow);
    queue.add_library(library.clone()).await.unwrap();
    queue.set_known_flows([(flow, "Convert".to_string())]).await;
    let file = queue.add_file(library.uid, "/m/a.mkv", None).await.unwrap();

    let node_a = queue.register_node(register_request("node-a")).await.unwrap();
    let node_b = queue.register_node(register_request("node-b")).await.unwrap();
    let (worker_a, worker_b) = (Uuid::new_v4(), Uuid::new_v4());

    *store.pending.lock().await = Some(Claim {
        node: node_b.clone(),
        worker_uid: worker_b,
        now: Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap(),
        max_owned: 1,
        flow_names: Arc::new(HashMap::from([(flow, "Convert".to_string())])),
    });

    let handed_to_a = queue
        .get_next(NextFileRequest {
            node_name: node_a.name.clone(),
            node_uid: node_a.uid,
            node_version: "1.0.0".to_string(),
            worker_uid: worker_a,
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handed_to_a.flow_name.as_deref(), Some("Convert"), "flow name stamped at claim");

    let handed_to_b = store.interleaved.lock().await.clone().unwrap();
    assert_eq!(handed_to_b.uid, file.uid);

    let stored = inner.file(file.uid).await.unwrap().unwrap();
    assert_eq!(stored.worker_uid, Some(worker_b), "the later claim keeps ownership");
    assert_eq!(stored.node_uid, Some(node_b.uid));

    let stale = queue.finish_processing(finish_request(file.uid, worker_a)).await;
    assert!(matches!(stale, Err(DispatchError::NotOwner { .. })));
    queue
        .finish_processing(finish_request(file.uid, worker_b))
        .await
        .unwrap();
    assert_eq!(
        inner.file(file.uid).await.unwrap().unwrap().status,
        FileStatus::Processed
    );
}
