use async_trait::async_trait;
use flowcore::{ScriptExecutor, ScriptOutcome, ScriptRequest, StepError, Value};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Stdout lines with this prefix assign a flow variable: `::set Name=Value`.
pub const SET_VARIABLE_PREFIX: &str = "::set ";

/// Runs script code through an external interpreter
pub struct ProcessScriptExecutor {
    interpreter: String,
    args: Vec<String>,
}

impl ProcessScriptExecutor {
    pub fn new(interpreter: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            args,
        }
    }

    /// `sh -c <code>`
    pub fn shell() -> Self {
        Self::new("sh", vec!["-c".to_string()])
    }
}

impl Default for ProcessScriptExecutor {
    fn default() -> Self {
        Self::shell()
    }
}

/// Variable names as environment keys: `file.FullName` becomes `FILE_FULLNAME`.
pub fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

#[async_trait]
impl ScriptExecutor for ProcessScriptExecutor {
    async fn execute(
        &self,
        request: ScriptRequest,
        cancellation: CancellationToken,
    ) -> Result<ScriptOutcome, StepError> {
        let mut command = Command::new(&self.interpreter);
        command
            .args(&self.args)
            .arg(&request.code)
            .env("WORKING_FILE", &request.working_file)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (name, value) in &request.variables {
            command.env(env_key(name), value.to_string());
        }

        tracing::debug!(script = %request.script_uid, interpreter = %self.interpreter, "spawning script");
        let child = command
            .spawn()
            .map_err(|e| StepError::Script(format!("failed to start {}: {}", self.interpreter, e)))?;

        let output = tokio::select! {
            _ = cancellation.cancelled() => return Err(StepError::Cancelled),
            output = child.wait_with_output() => output?,
        };

        let mut outcome = ScriptOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            ..Default::default()
        };
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            match line.strip_prefix(SET_VARIABLE_PREFIX).and_then(|s| s.split_once('=')) {
                Some((name, value)) => {
                    outcome
                        .variables
                        .insert(name.trim().to_string(), Value::from(value.to_string()));
                }
                None => outcome.log.push(line.to_string()),
            }
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            outcome.log.push(format!("stderr: {}", line));
        }
        Ok(outcome)
    }
}
