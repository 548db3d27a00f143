use crate::graph;
use crate::registry::ElementRegistry;
use crate::resolver::ElementResolver;
use crate::runtime::RunnerConfig;
use async_trait::async_trait;
use chrono::Utc;
use flowcore::{
    output, Configuration, EventBus, ExecutedNode, ExecutionEvent, ExecutionId, Failure,
    FailureKind, FileStatus, Flow, FlowId, FlowInvoker, FlowPart, NestedRun, PartId, RunOutcome,
    RunServices, ScriptExecutor, StepContext, StepError, Value,
};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Variables seeded into runs by the runner itself
pub mod variables {
    pub const FILE_FULL_NAME: &str = "file.FullName";
    pub const FILE_NAME: &str = "file.Name";
    pub const FILE_ORIGINAL: &str = "file.Orig.FullName";
    pub const FLOW_NAME: &str = "flow.Name";

    pub const FAILURE_REASON: &str = "FailureReason";
    pub const FAILED_ELEMENT: &str = "FailedElement";
    pub const FAILED_ELEMENT_UID: &str = "FailedElementUid";
    pub const FAILED_FLOW_NAME: &str = "FailedFlowName";
}

/// One unit of work handed to the runner
pub struct RunRequest {
    pub flow: Arc<Flow>,
    pub working_file: String,
    pub library_file_uid: Option<Uuid>,
    pub variables: HashMap<String, Value>,
    pub cancellation: CancellationToken,
}

impl RunRequest {
    pub fn new(flow: Arc<Flow>, working_file: impl Into<String>) -> Self {
        Self {
            flow,
            working_file: working_file.into(),
            library_file_uid: None,
            variables: HashMap::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_variables(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables.extend(variables);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn for_library_file(mut self, uid: Uuid) -> Self {
        self.library_file_uid = Some(uid);
        self
    }
}

/// Result of a top-level run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub execution_id: ExecutionId,
    pub outcome: RunOutcome,
    /// Outcome of the failure flow, when one ran.
    pub failure_flow: Option<RunOutcome>,
    pub executed_nodes: Vec<ExecutedNode>,
    pub log: Vec<String>,
    pub variables: HashMap<String, Value>,
    pub working_file: String,
    pub flow_uid: FlowId,
    pub flow_name: String,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn file_status(&self) -> FileStatus {
        match self.outcome {
            RunOutcome::Completed { .. } => FileStatus::Processed,
            RunOutcome::Failed(_) | RunOutcome::Canceled => FileStatus::ProcessingFailed,
        }
    }

    pub fn failure_reason(&self) -> Option<String> {
        match &self.outcome {
            RunOutcome::Failed(failure) => Some(failure.reason.clone()),
            RunOutcome::Canceled => Some("Canceled".to_string()),
            RunOutcome::Completed { .. } => None,
        }
    }
}

enum PartResult {
    Next(PartId),
    Goto(Arc<Flow>),
    Done(RunOutcome),
}

/// Walks flow graphs one part at a time
pub struct FlowRunner {
    resolver: ElementResolver,
    configuration: Arc<Configuration>,
    config: RunnerConfig,
    events: Arc<EventBus>,
    scripts: Arc<dyn ScriptExecutor>,
}

impl FlowRunner {
    pub fn new(
        registry: Arc<ElementRegistry>,
        configuration: Arc<Configuration>,
        config: RunnerConfig,
        events: Arc<EventBus>,
        scripts: Arc<dyn ScriptExecutor>,
    ) -> Self {
        let resolver = ElementResolver::new(
            registry,
            configuration.clone(),
            config.license,
            config.iterator_accepted_codes.clone(),
        );
        Self {
            resolver,
            configuration,
            config,
            events,
            scripts,
        }
    }

    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    /// Run a flow to a terminal state, escalating to the failure flow once if needed
    pub async fn run(self: &Arc<Self>, request: RunRequest) -> RunReport {
        let start = Instant::now();
        let flow = request.flow.clone();
        let invoker: Arc<dyn FlowInvoker> = self.clone();
        let services = RunServices {
            events: self.events.clone(),
            cancellation: request.cancellation,
            scripts: self.scripts.clone(),
            invoker,
            library_file_uid: request.library_file_uid,
        };

        let mut vars = standard_variables(&request.working_file, &flow);
        vars.extend(request.variables);
        let mut ctx = StepContext::new(services, request.working_file, vars);
        ctx.set_current_flow(flow.uid, flow.name.clone());

        self.events.emit(ExecutionEvent::RunStarted {
            execution_id: ctx.run_id(),
            flow_uid: flow.uid,
            flow_name: flow.name.clone(),
            working_file: ctx.working_file.clone(),
            timestamp: Utc::now(),
        });
        info!(flow = %flow.name, file = %ctx.working_file, "Starting flow run");
        ctx.info(format!("Executing flow '{}' on {}", flow.name, ctx.working_file));

        let outcome = self.walk(flow.clone(), &mut ctx).await;

        let failure_flow = match &outcome {
            RunOutcome::Failed(failure) if failure.kind.escalates() => {
                self.run_failure_flow(&ctx, failure).await
            }
            _ => None,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        ctx.info(format!("Flow '{}' {}", flow.name, outcome.label()));
        self.events.emit(ExecutionEvent::RunCompleted {
            execution_id: ctx.run_id(),
            success: outcome.is_completed(),
            outcome: outcome.label(),
            duration_ms,
            timestamp: Utc::now(),
        });

        let (flow_uid, flow_name) = ctx
            .current_flow()
            .unwrap_or_else(|| (flow.uid, flow.name.clone()));
        RunReport {
            execution_id: ctx.run_id(),
            outcome,
            failure_flow,
            executed_nodes: ctx.history(),
            log: ctx.log_lines(),
            variables: ctx.variables.clone(),
            working_file: ctx.working_file.clone(),
            flow_uid,
            flow_name,
            duration_ms,
        }
    }

    async fn run_failure_flow(&self, ctx: &StepContext, failure: &Failure) -> Option<RunOutcome> {
        let flow = self.configuration.default_failure_flow()?.clone();
        let mut seed = HashMap::new();
        seed.insert(
            variables::FAILURE_REASON.to_string(),
            Value::from(failure.reason.clone()),
        );
        seed.insert(
            variables::FAILED_ELEMENT.to_string(),
            failure.element.clone().map(Value::from).unwrap_or_default(),
        );
        seed.insert(
            variables::FAILED_ELEMENT_UID.to_string(),
            failure.element_uid.clone().map(Value::from).unwrap_or_default(),
        );
        seed.insert(
            variables::FAILED_FLOW_NAME.to_string(),
            Value::from(failure.flow_name.clone()),
        );

        warn!(flow = %failure.flow_name, failure_flow = %flow.name, "Executing failure flow");
        ctx.warn(format!("Executing failure flow '{}'", flow.name));
        let mut failure_ctx = ctx.derive(seed);
        let outcome = self.walk(flow, &mut failure_ctx).await;
        ctx.info(format!("Failure flow {}", outcome.label()));
        Some(outcome)
    }

    /// The step loop
    async fn walk(&self, mut flow: Arc<Flow>, ctx: &mut StepContext) -> RunOutcome {
        let mut current = match entry_of(&flow) {
            Ok(uid) => uid,
            Err(failure) => {
                ctx.warn(&failure.reason);
                return RunOutcome::Failed(failure);
            }
        };

        for _ in 0..self.config.max_steps {
            if ctx.is_cancelled() {
                ctx.warn("Flow run canceled");
                return RunOutcome::Canceled;
            }

            let graph = flow.clone();
            let Some(part) = graph.find_part(current) else {
                let reason = format!("Part {} not found in flow '{}'", current, flow.name);
                warn!(flow = %flow.name, part = %current, "connection points to a missing part");
                ctx.warn(&reason);
                return RunOutcome::Failed(Failure::new(FailureKind::Structural, reason, &flow.name));
            };

            match self.run_part(&flow, part, ctx).await {
                PartResult::Next(next) => current = next,
                PartResult::Goto(target) => {
                    current = match entry_of(&target) {
                        Ok(uid) => uid,
                        Err(failure) => {
                            ctx.warn(&failure.reason);
                            return RunOutcome::Failed(failure);
                        }
                    };
                    flow = target;
                }
                PartResult::Done(outcome) => return outcome,
            }
        }

        let reason = format!(
            "Flow '{}' exceeded the maximum of {} steps",
            flow.name, self.config.max_steps
        );
        warn!(flow = %flow.name, max_steps = self.config.max_steps, "step limit reached");
        ctx.warn(&reason);
        RunOutcome::Failed(Failure::new(FailureKind::IterationLimit, reason, &flow.name))
    }

    async fn run_part(&self, flow: &Flow, part: &FlowPart, ctx: &mut StepContext) -> PartResult {
        let name = part.display_name().to_string();
        let failure = |kind, reason: String| {
            Failure::new(kind, reason, flow.name.clone()).at_element(name.clone(), part.flow_element_uid.clone())
        };

        ctx.enter_part(part.uid);
        self.events.emit(ExecutionEvent::StepStarted {
            execution_id: ctx.run_id(),
            part_uid: part.uid,
            element: part.flow_element_uid.clone(),
            depth: ctx.depth(),
            timestamp: Utc::now(),
        });

        let mut step = match self.resolver.resolve(part, &ctx.variables) {
            Ok(step) => step,
            Err(e) => {
                let reason = format!("Failed to load '{}': {}", name, e);
                self.step_failed(ctx, part, &reason, 0);
                return PartResult::Done(RunOutcome::Failed(failure(FailureKind::Resolution, reason)));
            }
        };

        ctx.info(format!("Executing: {}", name));
        if !step.pre_execute(ctx).await {
            self.step_failed(ctx, part, "PreExecute failed", 0);
            return PartResult::Done(RunOutcome::Failed(failure(
                FailureKind::PreExecute,
                "PreExecute failed".to_string(),
            )));
        }

        let started = Instant::now();
        let result = AssertUnwindSafe(step.execute(ctx)).catch_unwind().await;
        let elapsed = started.elapsed().as_millis() as u64;

        let code = match result {
            Ok(Ok(code)) => code,
            Ok(Err(StepError::Cancelled)) => output::RUN_CANCELED,
            Ok(Err(_)) if ctx.is_cancelled() => output::RUN_CANCELED,
            Ok(Err(e)) => ctx.fail(e.to_string()),
            Err(panic) => {
                let reason = format!("'{}' panicked: {}", name, panic_message(panic.as_ref()));
                self.step_failed(ctx, part, &reason, elapsed);
                return PartResult::Done(RunOutcome::Failed(failure(FailureKind::Panic, reason)));
            }
        };

        // a detail only describes the step that set it
        let detail = ctx.take_failure_reason();
        record(ctx, part, code, elapsed);
        self.events.emit(ExecutionEvent::StepCompleted {
            execution_id: ctx.run_id(),
            part_uid: part.uid,
            output: code,
            duration_ms: elapsed,
            timestamp: Utc::now(),
        });

        if let Some(fatal) = ctx.take_fatal() {
            return PartResult::Done(RunOutcome::Failed(fatal));
        }
        match code {
            output::TERMINAL_EXIT => return PartResult::Done(RunOutcome::Completed { code }),
            output::RUN_CANCELED => {
                ctx.warn(format!("'{}' canceled the run", name));
                return PartResult::Done(RunOutcome::Canceled);
            }
            _ => {}
        }
        if let Some(goto) = ctx.take_goto() {
            return PartResult::Goto(goto.flow);
        }

        if code == output::FAILURE {
            if let Some(target) = part.error_connection {
                ctx.info(format!("'{}' failed, following error connection", name));
                return PartResult::Next(target);
            }
            let mut reason = format!("{} returned error code", name);
            if let Some(detail) = detail {
                reason.push_str(": ");
                reason.push_str(&detail);
            }
            ctx.error(&reason);
            return PartResult::Done(RunOutcome::Failed(failure(FailureKind::Step, reason)));
        }

        match part.connection_for(code) {
            Some(connection) => PartResult::Next(connection.input_node),
            None => {
                tracing::debug!(part = %name, output = code, "no connection for output, flow complete");
                PartResult::Done(RunOutcome::Completed { code })
            }
        }
    }

    fn step_failed(&self, ctx: &StepContext, part: &FlowPart, reason: &str, elapsed: u64) {
        ctx.error(reason);
        record(ctx, part, output::FAILURE, elapsed);
        self.events.emit(ExecutionEvent::StepFailed {
            execution_id: ctx.run_id(),
            part_uid: part.uid,
            error: reason.to_string(),
            timestamp: Utc::now(),
        });
    }
}

#[async_trait]
impl FlowInvoker for FlowRunner {
    async fn invoke(&self, flow: Arc<Flow>, mut ctx: StepContext) -> NestedRun {
        if ctx.depth() > self.config.max_depth {
            let reason = format!(
                "Flow '{}' exceeds the maximum nesting depth of {}",
                flow.name, self.config.max_depth
            );
            warn!(flow = %flow.name, depth = ctx.depth(), "nesting limit reached");
            ctx.warn(&reason);
            let outcome =
                RunOutcome::Failed(Failure::new(FailureKind::IterationLimit, reason, &flow.name));
            return NestedRun { outcome, context: ctx };
        }
        let outcome = self.walk(flow, &mut ctx).await;
        NestedRun { outcome, context: ctx }
    }
}

fn entry_of(flow: &Flow) -> Result<PartId, Failure> {
    graph::validate(flow)
        .and_then(|_| flow.entry_part().map(|p| p.uid))
        .map_err(|e| {
            warn!(flow = %flow.name, "invalid flow: {}", e);
            Failure::new(
                FailureKind::Structural,
                format!("Flow '{}' is invalid: {}", flow.name, e),
                &flow.name,
            )
        })
}

fn record(ctx: &StepContext, part: &FlowPart, output: i32, elapsed: u64) {
    ctx.record(ExecutedNode {
        node_name: part.display_name().to_string(),
        node_uid: part.flow_element_uid.clone(),
        part_uid: part.uid,
        output,
        depth: ctx.depth(),
        position: 0,
        processing_time_ms: elapsed,
    });
}

fn standard_variables(working_file: &str, flow: &Flow) -> HashMap<String, Value> {
    let path = Path::new(working_file);
    let mut vars = HashMap::new();
    vars.insert(variables::FILE_FULL_NAME.to_string(), Value::from(working_file));
    vars.insert(variables::FILE_ORIGINAL.to_string(), Value::from(working_file));
    if let Some(name) = path.file_name() {
        vars.insert(
            variables::FILE_NAME.to_string(),
            Value::from(name.to_string_lossy().into_owned()),
        );
    }
    vars.insert(variables::FLOW_NAME.to_string(), Value::from(flow.name.clone()));
    vars
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
