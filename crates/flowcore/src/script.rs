use crate::{StepError, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Script source plus the flow variables exposed to it as globals
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub script_uid: String,
    pub language: String,
    pub code: String,
    pub working_file: String,
    pub variables: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptOutcome {
    pub exit_code: i32,
    /// Variables the script assigned; merged back into the flow.
    pub variables: HashMap<String, Value>,
    pub log: Vec<String>,
}

/// External capability that runs inline scripts
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute(
        &self,
        request: ScriptRequest,
        cancellation: CancellationToken,
    ) -> Result<ScriptOutcome, StepError>;
}

/// Used when no script sandbox is configured.
pub struct UnavailableScriptExecutor;

#[async_trait]
impl ScriptExecutor for UnavailableScriptExecutor {
    async fn execute(
        &self,
        request: ScriptRequest,
        _cancellation: CancellationToken,
    ) -> Result<ScriptOutcome, StepError> {
        Err(StepError::Script(format!(
            "no script executor configured for '{}'",
            request.script_uid
        )))
    }
}
