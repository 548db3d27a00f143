use async_trait::async_trait;
use flowcore::dispatch::{
    CannotRunRequest, CoordinatorClient, FinishRequest, NextFileRequest, RegisterRequest,
    ResetRequest, ResetResponse,
};
use flowcore::{DispatchError, LibraryFile, ProcessingNode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// Talks to a flowserver over HTTP
pub struct HttpCoordinator {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCoordinator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<reqwest::Response, DispatchError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(format!("POST {} failed: {}", url, e)))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let message = format!("{} returned {}: {}", url, status, text);
        if status.is_client_error() {
            return Err(DispatchError::Rejected(message));
        }
        Err(DispatchError::Transport(message))
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &impl Serialize) -> Result<T, DispatchError> {
        self.post(path, body)
            .await?
            .json()
            .await
            .map_err(|e| DispatchError::Transport(format!("invalid response from {}: {}", path, e)))
    }
}

#[async_trait]
impl CoordinatorClient for HttpCoordinator {
    async fn register(&self, request: RegisterRequest) -> Result<ProcessingNode, DispatchError> {
        self.post_json("/api/node/register", &request).await
    }

    async fn next_file(&self, request: NextFileRequest) -> Result<Option<LibraryFile>, DispatchError> {
        self.post_json("/api/work/next", &request).await
    }

    async fn node_cannot_run(&self, request: CannotRunRequest) -> Result<(), DispatchError> {
        self.post("/api/node/cannot-run", &request).await.map(|_| ())
    }

    async fn finish_processing(&self, request: FinishRequest) -> Result<(), DispatchError> {
        self.post("/api/work/finish", &request).await.map(|_| ())
    }

    async fn reset_processing(&self, node_uid: Uuid) -> Result<usize, DispatchError> {
        let request = ResetRequest {
            node_uid: Some(node_uid),
        };
        let response: ResetResponse = self.post_json("/api/work/reset", &request).await?;
        Ok(response.reset)
    }
}
