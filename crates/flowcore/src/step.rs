use crate::events::{EventBus, EventEmitter, ExecutionId};
use crate::flow::{output, Flow, FlowId, PartId};
use crate::{ExecutedNode, Failure, RunLog, RunOutcome, ScriptExecutor, StepError, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Core trait that all executable steps implement
#[async_trait]
pub trait Step: Send + Sync {
    /// Element identifier this step was resolved from (e.g. "debug.log")
    fn element_uid(&self) -> &str;

    /// Optional: reject the run before `execute` is called
    async fn pre_execute(&mut self, _ctx: &mut StepContext) -> bool {
        true
    }

    /// Execute the step and return the output code used for edge selection
    async fn execute(&mut self, ctx: &mut StepContext) -> Result<i32, StepError>;
}

/// Runs a flow on behalf of a step (sub-flows, iterators)
#[async_trait]
pub trait FlowInvoker: Send + Sync {
    async fn invoke(&self, flow: Arc<Flow>, ctx: StepContext) -> NestedRun;
}

/// Result of a nested run together with the context it finished with
pub struct NestedRun {
    pub outcome: RunOutcome,
    pub context: StepContext,
}

/// Services shared by every context derived from one top-level run
pub struct RunServices {
    pub events: Arc<EventBus>,
    pub cancellation: CancellationToken,
    pub scripts: Arc<dyn ScriptExecutor>,
    pub invoker: Arc<dyn FlowInvoker>,
    pub library_file_uid: Option<Uuid>,
}

struct RunState {
    run_id: ExecutionId,
    services: RunServices,
    log: RunLog,
    history: Mutex<Vec<ExecutedNode>>,
    current_flow: Mutex<Option<(FlowId, String)>>,
}

#[derive(Clone)]
pub struct GotoRequest {
    pub flow: Arc<Flow>,
}

#[derive(Clone, Default)]
struct Signals {
    goto: Option<GotoRequest>,
    failure_reason: Option<String>,
    fatal: Option<Failure>,
}

/// Execution context passed to each step.
///
/// Cloning shares the run services, log and history; `variables` and
/// `working_file` are owned by each context.
#[derive(Clone)]
pub struct StepContext {
    state: Arc<RunState>,
    pub working_file: String,
    pub variables: HashMap<String, Value>,
    depth: usize,
    emitter: EventEmitter,
    signals: Signals,
}

impl StepContext {
    pub fn new(
        services: RunServices,
        working_file: impl Into<String>,
        variables: HashMap<String, Value>,
    ) -> Self {
        let run_id = ExecutionId::new_v4();
        let emitter = services.events.create_emitter(run_id, PartId::nil());
        Self {
            state: Arc::new(RunState {
                run_id,
                services,
                log: RunLog::new(),
                history: Mutex::new(Vec::new()),
                current_flow: Mutex::new(None),
            }),
            working_file: working_file.into(),
            variables,
            depth: 0,
            emitter,
            signals: Signals::default(),
        }
    }

    pub fn run_id(&self) -> ExecutionId {
        self.state.run_id
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn library_file_uid(&self) -> Option<Uuid> {
        self.state.services.library_file_uid
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.state.services.events
    }

    pub fn scripts(&self) -> &Arc<dyn ScriptExecutor> {
        &self.state.services.scripts
    }

    pub fn invoker(&self) -> Arc<dyn FlowInvoker> {
        self.state.services.invoker.clone()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.state.services.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.services.cancellation.is_cancelled()
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Replaces `{Name}` with the variable's display form; unknown names are left as-is.
    pub fn substitute(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match self.variables.get(name) {
                        Some(value) => out.push_str(&value.to_string()),
                        None => {
                            out.push('{');
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.state.log.info(message.as_ref());
        self.emitter.info(message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.state.log.warn(message.as_ref());
        self.emitter.warn(message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.state.log.error(message.as_ref());
    }

    pub fn progress(&self, percent: f64) {
        self.state.log.info(&format!("Progress: {}%", percent));
        self.emitter.progress(percent, None);
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.state.log.lines()
    }

    /// Points the event emitter at the part about to execute.
    pub fn enter_part(&mut self, part_uid: PartId) {
        self.emitter = self.emitter.for_part(part_uid);
    }

    /// Context for a nested run: same services, one level deeper, its own variables.
    pub fn derive(&self, extra: HashMap<String, Value>) -> Self {
        let mut variables = self.variables.clone();
        variables.extend(extra);
        Self {
            state: self.state.clone(),
            working_file: self.working_file.clone(),
            variables,
            depth: self.depth + 1,
            emitter: self.emitter.clone(),
            signals: Signals::default(),
        }
    }

    /// Like [`derive`](Self::derive) but scoped to a single iteration item.
    pub fn derive_for_item(
        &self,
        working_file: impl Into<String>,
        extra: HashMap<String, Value>,
    ) -> Self {
        let mut ctx = self.derive(extra);
        ctx.working_file = working_file.into();
        ctx
    }

    /// Appends to the run's history, assigning the next position.
    pub fn record(&self, mut entry: ExecutedNode) {
        let mut history = self.state.history.lock().unwrap_or_else(|e| e.into_inner());
        entry.position = history.len();
        history.push(entry);
    }

    pub fn history(&self) -> Vec<ExecutedNode> {
        self.state
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_current_flow(&self, uid: FlowId, name: impl Into<String>) {
        let mut current = self
            .state
            .current_flow
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *current = Some((uid, name.into()));
    }

    pub fn current_flow(&self) -> Option<(FlowId, String)> {
        self.state
            .current_flow
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Records why the step failed and returns the failure code.
    pub fn fail(&mut self, reason: impl Into<String>) -> i32 {
        let reason = reason.into();
        self.error(&reason);
        self.signals.failure_reason = Some(reason);
        output::FAILURE
    }

    pub fn take_failure_reason(&mut self) -> Option<String> {
        self.signals.failure_reason.take()
    }

    /// Ends the whole run with `failure`, bypassing error edges.
    pub fn fail_run(&mut self, failure: Failure) -> i32 {
        self.signals.fatal = Some(failure);
        output::FAILURE
    }

    pub fn take_fatal(&mut self) -> Option<Failure> {
        self.signals.fatal.take()
    }

    /// Continue the current run at `flow`'s entry point after this step.
    pub fn request_goto(&mut self, flow: Arc<Flow>) {
        self.signals.goto = Some(GotoRequest { flow });
    }

    pub fn take_goto(&mut self) -> Option<GotoRequest> {
        self.signals.goto.take()
    }
}
