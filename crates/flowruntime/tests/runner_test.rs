// crates/flowruntime/tests/runner_test.rs

use async_trait::async_trait;
use flowcore::{
    output, Configuration, ElementKind, ExecutionEvent, FailureKind, Flow, FlowPart, FlowType,
    LicenseLevel, ResolveError, RunOutcome, Script, ScriptExecutor, ScriptOutcome, ScriptRequest,
    Step, StepContext, StepError, StepEvent, SubFlowField, UnavailableScriptExecutor, Value,
};
use flowruntime::{
    iterator_vars, variables, BoundModel, FieldSpec, FlowRuntime, RunRequest, RunnerConfig,
    StepFactory, StepSchema,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct Seen {
    label: String,
    working_file: String,
    variables: HashMap<String, Value>,
    depth: usize,
}

type Trace = Arc<Mutex<Vec<Seen>>>;

/// Returns the configured code and records what it saw
struct CodeStep {
    label: String,
    code: i32,
    accept: bool,
    panic: bool,
    cancel: bool,
    error: Option<String>,
    detail: Option<String>,
    trace: Trace,
}

#[async_trait]
impl Step for CodeStep {
    fn element_uid(&self) -> &str {
        "test.code"
    }

    async fn pre_execute(&mut self, _ctx: &mut StepContext) -> bool {
        self.accept
    }

    async fn execute(&mut self, ctx: &mut StepContext) -> Result<i32, StepError> {
        self.trace.lock().unwrap().push(Seen {
            label: self.label.clone(),
            working_file: ctx.working_file.clone(),
            variables: ctx.variables.clone(),
            depth: ctx.depth(),
        });
        if self.panic {
            panic!("step exploded");
        }
        if self.cancel {
            ctx.cancellation().cancel();
        }
        if let Some(error) = &self.error {
            return Err(StepError::Failed(error.clone()));
        }
        if let Some(detail) = &self.detail {
            ctx.fail(detail.clone());
        }
        Ok(self.code)
    }
}

struct CodeFactory {
    element: &'static str,
    license: LicenseLevel,
    trace: Trace,
}

impl StepFactory for CodeFactory {
    fn create(&self, model: &BoundModel) -> Result<Box<dyn Step>, ResolveError> {
        Ok(Box::new(CodeStep {
            label: model.get_str("Label").unwrap_or_default().to_string(),
            code: model.get_i64("Code").unwrap_or(0) as i32,
            accept: model.get_bool("Accept").unwrap_or(true),
            panic: model.get_bool("Panic").unwrap_or(false),
            cancel: model.get_bool("Cancel").unwrap_or(false),
            error: model.get_str("Error").map(String::from),
            detail: model.get_str("Detail").map(String::from),
            trace: self.trace.clone(),
        }))
    }

    fn element_uid(&self) -> &str {
        self.element
    }

    fn schema(&self) -> StepSchema {
        StepSchema::new()
            .field(FieldSpec::string("Label"))
            .field(FieldSpec::integer("Code").with_default(0))
            .field(FieldSpec::bool("Accept").with_default(true))
            .field(FieldSpec::bool("Panic"))
            .field(FieldSpec::bool("Cancel"))
            .field(FieldSpec::string("Error"))
            .field(FieldSpec::string("Detail"))
    }

    fn license_level(&self) -> LicenseLevel {
        self.license
    }
}

fn create_runtime(configuration: Configuration, config: RunnerConfig) -> (FlowRuntime, Trace) {
    create_runtime_with_scripts(configuration, config, Arc::new(UnavailableScriptExecutor))
}

fn create_runtime_with_scripts(
    configuration: Configuration,
    config: RunnerConfig,
    scripts: Arc<dyn ScriptExecutor>,
) -> (FlowRuntime, Trace) {
    let trace: Trace = Arc::new(Mutex::new(Vec::new()));
    let mut registry = flowruntime::ElementRegistry::new();
    registry.register(Arc::new(CodeFactory {
        element: "test.code",
        license: LicenseLevel::Free,
        trace: trace.clone(),
    }));
    registry.register(Arc::new(CodeFactory {
        element: "test.premium",
        license: LicenseLevel::Professional,
        trace: trace.clone(),
    }));
    let runtime = FlowRuntime::new(Arc::new(registry), Arc::new(configuration), config, scripts);
    (runtime, trace)
}

fn code_part(label: &str, code: i32) -> FlowPart {
    FlowPart::plugin("test.code")
        .with_name(label)
        .with_model("Label", label)
        .with_model("Code", code)
}

fn labels(trace: &Trace) -> Vec<String> {
    trace.lock().unwrap().iter().map(|s| s.label.clone()).collect()
}

fn failure_flow() -> Flow {
    let mut flow = Flow::new("On Failure").with_type(FlowType::Failure).as_default();
    flow.add_part(code_part("Report", 0));
    flow
}

#[tokio::test]
async fn test_linear_flow_completes_with_last_output() {
    let mut flow = Flow::new("Main");
    let a = flow.add_part(code_part("A", 1));
    let b = flow.add_part(code_part("B", 3));
    flow.connect(a, 1, b).unwrap();
    let flow = Arc::new(flow);

    let (runtime, trace) = create_runtime(Configuration::new(), RunnerConfig::default());
    let report = runtime.run(RunRequest::new(flow, "/media/movie.mkv")).await;

    assert_eq!(report.outcome, RunOutcome::Completed { code: 3 });
    assert_eq!(labels(&trace), vec!["A", "B"]);
    assert_eq!(report.executed_nodes.len(), 2);
    assert_eq!(report.executed_nodes[0].output, 1);
    assert_eq!(report.executed_nodes[1].position, 1);
    assert_eq!(report.file_status(), flowcore::FileStatus::Processed);

    let seen = trace.lock().unwrap()[0].clone();
    assert_eq!(seen.working_file, "/media/movie.mkv");
    assert_eq!(
        seen.variables.get(variables::FILE_NAME),
        Some(&Value::from("movie.mkv"))
    );
    assert!(!report.log.is_empty(), "run log should have lines");
}

#[tokio::test]
async fn test_unhandled_failure_runs_failure_flow_once() {
    let mut flow = Flow::new("Main");
    let a = flow.add_part(code_part("A", output::FAILURE));
    let b = flow.add_part(code_part("B", 0));
    flow.connect(a, 1, b).unwrap();
    let flow = Arc::new(flow);
    let configuration = Configuration::new().with_flow(failure_flow());

    let (runtime, trace) = create_runtime(configuration, RunnerConfig::default());
    let report = runtime.run(RunRequest::new(flow, "/media/a.mkv")).await;

    let failure = report.outcome.failure().expect("run should fail");
    assert_eq!(failure.reason, "A returned error code");
    assert_eq!(failure.kind, FailureKind::Step);
    assert_eq!(report.failure_reason().as_deref(), Some("A returned error code"));
    assert_eq!(report.file_status(), flowcore::FileStatus::ProcessingFailed);
    assert_eq!(report.failure_flow, Some(RunOutcome::Completed { code: 0 }));

    assert_eq!(labels(&trace), vec!["A", "Report"]);
    let report_seen = trace.lock().unwrap()[1].clone();
    let var = |name: &str| report_seen.variables.get(name).cloned();
    assert_eq!(var(variables::FAILURE_REASON), Some(Value::from("A returned error code")));
    assert_eq!(var(variables::FAILED_ELEMENT), Some(Value::from("A")));
    assert_eq!(var(variables::FAILED_ELEMENT_UID), Some(Value::from("test.code")));
    assert_eq!(var(variables::FAILED_FLOW_NAME), Some(Value::from("Main")));
    assert_eq!(report_seen.depth, 1);
}

#[tokio::test]
async fn test_step_error_detail_in_reason() {
    let mut flow = Flow::new("Main");
    flow.add_part(code_part("Encode", 0).with_model("Error", "disk full"));

    let (runtime, _) = create_runtime(Configuration::new(), RunnerConfig::default());
    let report = runtime.run(RunRequest::new(Arc::new(flow), "f")).await;

    assert_eq!(
        report.failure_reason().as_deref(),
        Some("Encode returned error code: disk full")
    );
    assert_eq!(report.executed_nodes[0].output, output::FAILURE);
}

#[tokio::test]
async fn test_failure_detail_belongs_to_its_own_step() {
    let mut flow = Flow::new("Main");
    let a = flow.add_part(code_part("A", 1).with_model("Detail", "recovered"));
    let b = flow.add_part(code_part("B", output::FAILURE));
    flow.connect(a, 1, b).unwrap();

    let (runtime, _) = create_runtime(Configuration::new(), RunnerConfig::default());
    let report = runtime.run(RunRequest::new(Arc::new(flow), "f")).await;

    assert_eq!(report.failure_reason().as_deref(), Some("B returned error code"));
}

#[tokio::test]
async fn test_lifecycle_events() {
    let mut flow = Flow::new("Main");
    let a = flow.add_part(code_part("A", 1));
    let b = flow.add_part(code_part("B", 0).with_model("Accept", false));
    flow.connect(a, 1, b).unwrap();

    let (runtime, _) = create_runtime(Configuration::new(), RunnerConfig::default());
    let mut events = runtime.subscribe_events();
    let report = runtime.run(RunRequest::new(Arc::new(flow), "f")).await;
    assert!(report.outcome.is_failed());

    let mut lifecycle = Vec::new();
    while let Ok(event) = events.try_recv() {
        let (id, entry) = match event {
            ExecutionEvent::RunStarted { execution_id, flow_name, .. } => {
                (execution_id, format!("run started {}", flow_name))
            }
            ExecutionEvent::StepStarted { execution_id, part_uid, .. } => {
                (execution_id, format!("started {}", part_name(part_uid, a, b)))
            }
            ExecutionEvent::StepCompleted { execution_id, part_uid, output, .. } => (
                execution_id,
                format!("completed {} {}", part_name(part_uid, a, b), output),
            ),
            ExecutionEvent::StepFailed { execution_id, part_uid, error, .. } => (
                execution_id,
                format!("failed {} {}", part_name(part_uid, a, b), error),
            ),
            ExecutionEvent::RunCompleted { execution_id, success, .. } => {
                (execution_id, format!("run completed {}", success))
            }
            ExecutionEvent::StepEvent { .. } => continue,
        };
        assert_eq!(id, report.execution_id, "every event belongs to the run");
        lifecycle.push(entry);
    }
    assert_eq!(
        lifecycle,
        vec![
            "run started Main",
            "started A",
            "completed A 1",
            "started B",
            "failed B PreExecute failed",
            "run completed false",
        ]
    );
}

fn part_name(part: flowcore::PartId, a: flowcore::PartId, b: flowcore::PartId) -> &'static str {
    if part == a {
        "A"
    } else if part == b {
        "B"
    } else {
        "?"
    }
}

#[tokio::test]
async fn test_error_connection_is_followed() {
    let mut flow = Flow::new("Main");
    let a = flow.add_part(code_part("A", output::FAILURE));
    let ok = flow.add_part(code_part("Ok", 0));
    let handler = flow.add_part(code_part("Handler", 4));
    flow.connect(a, 1, ok).unwrap();
    flow.set_error_connection(a, handler).unwrap();
    let configuration = Configuration::new().with_flow(failure_flow());

    let (runtime, trace) = create_runtime(configuration, RunnerConfig::default());
    let report = runtime.run(RunRequest::new(Arc::new(flow), "f")).await;

    assert_eq!(report.outcome, RunOutcome::Completed { code: 4 });
    assert_eq!(labels(&trace), vec!["A", "Handler"]);
    assert!(report.failure_flow.is_none());
}

#[tokio::test]
async fn test_cancelled_before_start_records_nothing() {
    let mut flow = Flow::new("Main");
    flow.add_part(code_part("A", 1));
    let token = CancellationToken::new();
    token.cancel();

    let (runtime, trace) = create_runtime(Configuration::new().with_flow(failure_flow()), RunnerConfig::default());
    let report = runtime
        .run(RunRequest::new(Arc::new(flow), "f").with_cancellation(token))
        .await;

    assert_eq!(report.outcome, RunOutcome::Canceled);
    assert!(report.executed_nodes.is_empty());
    assert!(trace.lock().unwrap().is_empty());
    assert!(report.failure_flow.is_none(), "cancellation is run-fatal");
    assert_eq!(report.failure_reason().as_deref(), Some("Canceled"));
}

#[tokio::test]
async fn test_cancel_mid_run_stops_before_next_step() {
    let mut flow = Flow::new("Main");
    let a = flow.add_part(code_part("A", 1).with_model("Cancel", true));
    let b = flow.add_part(code_part("B", 1));
    flow.connect(a, 1, b).unwrap();

    let (runtime, trace) = create_runtime(Configuration::new(), RunnerConfig::default());
    let report = runtime.run(RunRequest::new(Arc::new(flow), "f")).await;

    assert_eq!(report.outcome, RunOutcome::Canceled);
    assert_eq!(labels(&trace), vec!["A"]);
    assert_eq!(report.executed_nodes.len(), 1);
}

#[tokio::test]
async fn test_sentinel_codes_bypass_edges() {
    let mut exit = Flow::new("Exit");
    let a = exit.add_part(code_part("A", output::TERMINAL_EXIT));
    let b = exit.add_part(code_part("B", 0));
    exit.connect(a, output::TERMINAL_EXIT, b).unwrap();

    let mut cancel = Flow::new("Cancel");
    cancel.add_part(code_part("C", output::RUN_CANCELED));

    let (runtime, trace) = create_runtime(Configuration::new(), RunnerConfig::default());
    let report = runtime.run(RunRequest::new(Arc::new(exit), "f")).await;
    assert_eq!(report.outcome, RunOutcome::Completed { code: output::TERMINAL_EXIT });

    let report = runtime.run(RunRequest::new(Arc::new(cancel), "f")).await;
    assert_eq!(report.outcome, RunOutcome::Canceled);
    assert_eq!(labels(&trace), vec!["A", "C"]);
}

#[tokio::test]
async fn test_step_bound_stops_cycles_without_failure_flow() {
    let mut flow = Flow::new("Loop");
    let a = flow.add_part(code_part("A", 1));
    let b = flow.add_part(code_part("B", 1));
    let c = flow.add_part(code_part("C", 1));
    flow.connect(a, 1, b).unwrap();
    flow.connect(b, 1, c).unwrap();
    flow.connect(c, 1, b).unwrap();
    let configuration = Configuration::new().with_flow(failure_flow());

    let (runtime, trace) = create_runtime(configuration, RunnerConfig::default());
    let report = runtime.run(RunRequest::new(Arc::new(flow), "f")).await;

    let failure = report.outcome.failure().expect("should hit the bound");
    assert_eq!(failure.kind, FailureKind::IterationLimit);
    assert_eq!(report.executed_nodes.len(), 250);
    assert!(report.failure_flow.is_none());
    assert!(!labels(&trace).contains(&"Report".to_string()));
}

#[tokio::test]
async fn test_license_and_missing_element_fail_resolution() {
    let mut premium = Flow::new("Premium");
    premium.add_part(FlowPart::plugin("test.premium").with_name("Fancy"));
    let mut missing = Flow::new("Missing");
    missing.add_part(FlowPart::plugin("no.such.element").with_name("Ghost"));

    let config = RunnerConfig {
        license: LicenseLevel::Basic,
        ..RunnerConfig::default()
    };
    let (runtime, trace) = create_runtime(Configuration::new(), config);

    let report = runtime.run(RunRequest::new(Arc::new(premium), "f")).await;
    let failure = report.outcome.failure().expect("license too low");
    assert_eq!(failure.kind, FailureKind::Resolution);
    assert!(failure.reason.contains("Professional"), "reason: {}", failure.reason);

    let report = runtime.run(RunRequest::new(Arc::new(missing), "f")).await;
    let failure = report.outcome.failure().expect("element missing");
    assert_eq!(failure.kind, FailureKind::Resolution);
    assert!(failure.reason.contains("no.such.element"));
    assert_eq!(report.executed_nodes.len(), 1, "failed resolution is still audited");
    assert_eq!(report.executed_nodes[0].output, output::FAILURE);

    assert!(trace.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_pre_execute_rejection() {
    let mut flow = Flow::new("Main");
    flow.add_part(code_part("Picky", 1).with_model("Accept", false));

    let (runtime, trace) = create_runtime(Configuration::new(), RunnerConfig::default());
    let report = runtime.run(RunRequest::new(Arc::new(flow), "f")).await;

    let failure = report.outcome.failure().unwrap();
    assert_eq!(failure.reason, "PreExecute failed");
    assert_eq!(failure.kind, FailureKind::PreExecute);
    assert!(trace.lock().unwrap().is_empty(), "execute must not run");
}

#[tokio::test]
async fn test_panicking_step_fails_the_run() {
    let mut flow = Flow::new("Main");
    flow.add_part(code_part("Boom", 1).with_model("Panic", true));

    let (runtime, _) = create_runtime(Configuration::new(), RunnerConfig::default());
    let report = runtime.run(RunRequest::new(Arc::new(flow), "f")).await;

    let failure = report.outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Panic);
    assert!(failure.reason.contains("step exploded"));
}

#[tokio::test]
async fn test_part_override_variable_beats_model() {
    let mut flow = Flow::new("Main");
    let a = flow.add_part(code_part("A", 1));
    let one = flow.add_part(code_part("One", 0));
    let two = flow.add_part(code_part("Two", 0));
    flow.connect(a, 1, one).unwrap();
    flow.connect(a, 2, two).unwrap();

    let (runtime, trace) = create_runtime(Configuration::new(), RunnerConfig::default());
    let request = RunRequest::new(Arc::new(flow), "f").with_variable(format!("{}.Code", a), 2);
    let report = runtime.run(request).await;

    assert!(report.outcome.is_completed());
    assert_eq!(labels(&trace), vec!["A", "Two"]);
}

#[tokio::test]
async fn test_invalid_field_type_is_a_resolution_failure() {
    let mut flow = Flow::new("Main");
    flow.add_part(code_part("A", 1).with_model("Code", "not a number"));

    let (runtime, _) = create_runtime(Configuration::new(), RunnerConfig::default());
    let report = runtime.run(RunRequest::new(Arc::new(flow), "f")).await;

    let failure = report.outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::Resolution);
    assert!(failure.reason.contains("Code"));
}

#[tokio::test]
async fn test_goto_flow_replaces_remainder() {
    let mut other = Flow::new("Other");
    other.add_part(code_part("X", 7));

    let mut main = Flow::new("Main");
    let a = main.add_part(code_part("A", 0));
    let goto = main.add_part(
        FlowPart::new(ElementKind::GotoFlow, "GotoFlow")
            .with_name("Jump")
            .with_model("Flow", other.uid.to_string())
            .with_model("UpdateFlowUsed", true),
    );
    let never = main.add_part(code_part("Never", 0));
    main.connect(a, 0, goto).unwrap();
    main.connect(goto, 0, never).unwrap();
    let other_uid = other.uid;

    let (runtime, trace) = create_runtime(Configuration::new().with_flow(other), RunnerConfig::default());
    let report = runtime.run(RunRequest::new(Arc::new(main), "f")).await;

    assert_eq!(report.outcome, RunOutcome::Completed { code: 7 });
    assert_eq!(labels(&trace), vec!["A", "X"]);
    assert_eq!(report.flow_name, "Other");
    assert_eq!(report.flow_uid, other_uid);
}

#[tokio::test]
async fn test_sub_flow_binds_fields_and_returns_code() {
    let mut sub = Flow::new("Sub")
        .with_type(FlowType::SubFlow)
        .with_field(SubFlowField::new("Greeting", "greeting"));
    sub.add_part(code_part("Inner", 3));

    let mut main = Flow::new("Main");
    let call = main.add_part(
        FlowPart::new(ElementKind::SubFlow, format!("SubFlow:{}", sub.uid))
            .with_name("Call")
            .with_model("Greeting", "hello"),
    );
    let after = main.add_part(code_part("After", 0));
    main.connect(call, 3, after).unwrap();

    let (runtime, trace) = create_runtime(Configuration::new().with_flow(sub), RunnerConfig::default());
    let report = runtime.run(RunRequest::new(Arc::new(main), "f")).await;

    assert_eq!(report.outcome, RunOutcome::Completed { code: 0 });
    assert_eq!(labels(&trace), vec!["Inner", "After"]);
    let inner = trace.lock().unwrap()[0].clone();
    assert_eq!(inner.variables.get("greeting"), Some(&Value::from("hello")));
    assert_eq!(inner.depth, 1);
    assert!(!report.variables.contains_key("greeting"), "sub-flow variables stay in the sub-flow");
}

#[tokio::test]
async fn test_nesting_depth_limit_is_run_fatal() {
    let mut recursive = Flow::new("Recursive");
    let uid = recursive.uid;
    recursive.add_part(FlowPart::new(ElementKind::SubFlow, format!("SubFlow:{}", uid)).with_name("Again"));
    let recursive = Arc::new(recursive);
    let configuration = Configuration {
        flows: vec![recursive.clone(), Arc::new(failure_flow())],
        ..Configuration::default()
    };

    let config = RunnerConfig {
        max_depth: 5,
        ..RunnerConfig::default()
    };
    let (runtime, trace) = create_runtime(configuration, config);
    let report = runtime.run(RunRequest::new(recursive, "f")).await;

    let failure = report.outcome.failure().expect("depth limit");
    assert_eq!(failure.kind, FailureKind::IterationLimit);
    assert!(report.failure_flow.is_none());
    assert!(trace.lock().unwrap().is_empty());
}

fn list_iterator(sub: &Flow, list: Value) -> FlowPart {
    FlowPart::new(ElementKind::ListIterator, "ListIterator")
        .with_name("Each")
        .with_model("Flow", sub.uid.to_string())
        .with_model("List", list)
}

#[tokio::test]
async fn test_list_iterator_runs_each_item_with_progress() {
    let mut sub = Flow::new("PerItem");
    sub.add_part(code_part("Item", 0));

    let mut main = Flow::new("Main");
    let each = main.add_part(list_iterator(
        &sub,
        Value::Array(vec!["a".into(), "b".into(), "c".into()]),
    ));
    let after = main.add_part(code_part("After", 0));
    main.connect(each, 1, after).unwrap();

    let (runtime, trace) = create_runtime(Configuration::new().with_flow(sub), RunnerConfig::default());
    let mut events = runtime.subscribe_events();
    let report = runtime.run(RunRequest::new(Arc::new(main), "f")).await;

    assert_eq!(report.outcome, RunOutcome::Completed { code: 0 });
    assert_eq!(labels(&trace), vec!["Item", "Item", "Item", "After"]);

    let seen = trace.lock().unwrap().clone();
    let items: Vec<Value> = seen[..3]
        .iter()
        .map(|s| s.variables[iterator_vars::ITEM].clone())
        .collect();
    assert_eq!(items, vec![Value::from("a"), Value::from("b"), Value::from("c")]);
    assert_eq!(seen[2].variables[iterator_vars::INDEX], Value::from(2));
    assert_eq!(seen[0].variables[iterator_vars::TOTAL], Value::from(3));
    assert!(!report.variables.contains_key(iterator_vars::ITEM));

    let mut progress = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::StepEvent {
            event: StepEvent::Progress { percent, .. },
            ..
        } = event
        {
            progress.push(percent);
        }
    }
    assert_eq!(progress, vec![33.0, 66.0, 100.0]);
}

#[tokio::test]
async fn test_list_iterator_empty_and_named_lists() {
    let mut sub = Flow::new("PerItem");
    sub.add_part(code_part("Item", 0));

    let mut empty = Flow::new("Empty");
    empty.add_part(list_iterator(&sub, Value::Array(Vec::new())));
    let mut named = Flow::new("Named");
    named.add_part(list_iterator(&sub, Value::from("codecs")));

    let configuration = Configuration::new()
        .with_flow(sub)
        .with_list("codecs", vec!["h264".into(), "hevc".into()]);
    let (runtime, trace) = create_runtime(configuration, RunnerConfig::default());

    let report = runtime.run(RunRequest::new(Arc::new(empty), "f")).await;
    assert_eq!(report.outcome, RunOutcome::Completed { code: flowruntime::ITERATOR_EMPTY });
    assert!(trace.lock().unwrap().is_empty());

    let report = runtime.run(RunRequest::new(Arc::new(named), "f")).await;
    assert_eq!(report.outcome, RunOutcome::Completed { code: flowruntime::ITERATOR_DONE });
    assert_eq!(labels(&trace).len(), 2);
}

#[tokio::test]
async fn test_list_iterator_aborts_on_item_failure() {
    let mut sub = Flow::new("PerItem");
    sub.add_part(code_part("Item", output::FAILURE));
    let mut odd = Flow::new("Odd");
    odd.add_part(code_part("Odd", 5));

    let mut main = Flow::new("Main");
    main.add_part(list_iterator(&sub, Value::Array(vec![1.into(), 2.into(), 3.into()])));
    let mut unexpected = Flow::new("Unexpected");
    unexpected.add_part(list_iterator(&odd, Value::Array(vec![1.into(), 2.into()])));

    let configuration = Configuration::new().with_flow(sub).with_flow(odd);
    let (runtime, trace) = create_runtime(configuration, RunnerConfig::default());

    let report = runtime.run(RunRequest::new(Arc::new(main), "f")).await;
    let failure = report.outcome.failure().expect("iteration should abort");
    assert!(failure.reason.starts_with("Each returned error code"), "reason: {}", failure.reason);
    assert_eq!(labels(&trace), vec!["Item"]);

    let report = runtime.run(RunRequest::new(Arc::new(unexpected), "f")).await;
    let failure = report.outcome.failure().unwrap();
    assert!(failure.reason.contains("unexpected output 5"), "reason: {}", failure.reason);
}

#[tokio::test]
async fn test_folder_iterator_sets_working_file() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.txt", "a.txt", "c.log"] {
        std::fs::write(dir.path().join(name), name).unwrap();
    }

    let mut sub = Flow::new("PerFile");
    sub.add_part(code_part("File", 1));

    let mut main = Flow::new("Main");
    main.add_part(
        FlowPart::new(ElementKind::FolderIterator, "FolderIterator")
            .with_name("Folder")
            .with_model("Flow", sub.uid.to_string())
            .with_model("Folder", "{Root}")
            .with_model("Pattern", r"\.txt$"),
    );

    let (runtime, trace) = create_runtime(Configuration::new().with_flow(sub), RunnerConfig::default());
    let request = RunRequest::new(Arc::new(main), "f")
        .with_variable("Root", dir.path().to_string_lossy().into_owned());
    let report = runtime.run(request).await;

    assert_eq!(report.outcome, RunOutcome::Completed { code: flowruntime::ITERATOR_DONE });
    let files: Vec<String> = trace.lock().unwrap().iter().map(|s| s.working_file.clone()).collect();
    assert_eq!(
        files,
        vec![
            dir.path().join("a.txt").to_string_lossy().into_owned(),
            dir.path().join("b.txt").to_string_lossy().into_owned(),
        ]
    );
    assert_eq!(report.working_file, "f", "item working files do not leak to the parent");
}

struct FakeScripts;

#[async_trait]
impl ScriptExecutor for FakeScripts {
    async fn execute(
        &self,
        request: ScriptRequest,
        _cancellation: CancellationToken,
    ) -> Result<ScriptOutcome, StepError> {
        let mut variables = HashMap::new();
        variables.insert("scripted".to_string(), Value::from(request.code.clone()));
        Ok(ScriptOutcome {
            exit_code: 2,
            variables,
            log: vec![format!("ran {}", request.script_uid)],
        })
    }
}

/// Cancels the run it belongs to, then reports the cancellation
struct CancellingScripts;

#[async_trait]
impl ScriptExecutor for CancellingScripts {
    async fn execute(
        &self,
        _request: ScriptRequest,
        cancellation: CancellationToken,
    ) -> Result<ScriptOutcome, StepError> {
        cancellation.cancel();
        Err(StepError::Cancelled)
    }
}

#[tokio::test]
async fn test_script_cancelled_mid_run_is_canceled_not_failed() {
    let mut flow = Flow::new("Main");
    let slow = flow.add_part(FlowPart::new(ElementKind::Script, "Script:slow").with_name("Slow"));
    let after = flow.add_part(code_part("After", 0));
    flow.connect(slow, 1, after).unwrap();
    flow.set_error_connection(slow, after).unwrap();
    let configuration = Configuration::new()
        .with_flow(failure_flow())
        .with_script(Script {
            uid: "slow".to_string(),
            name: "Slow".to_string(),
            language: "sh".to_string(),
            code: "sleep 60".to_string(),
        });

    let (runtime, trace) = create_runtime_with_scripts(
        configuration,
        RunnerConfig::default(),
        Arc::new(CancellingScripts),
    );
    let report = runtime.run(RunRequest::new(Arc::new(flow), "f")).await;

    assert_eq!(report.outcome, RunOutcome::Canceled);
    assert_eq!(report.failure_flow, None, "cancellation never escalates");
    assert!(labels(&trace).is_empty(), "no later step or failure flow ran");
    assert_eq!(report.failure_reason().as_deref(), Some("Canceled"));
}

#[tokio::test]
async fn test_script_part_delegates_to_executor() {
    let mut flow = Flow::new("Main");
    flow.add_part(FlowPart::new(ElementKind::Script, "Script:greet").with_name("Greet"));
    let configuration = Configuration::new().with_script(Script {
        uid: "greet".to_string(),
        name: "Greet".to_string(),
        language: "sh".to_string(),
        code: "echo hi".to_string(),
    });

    let (runtime, _) =
        create_runtime_with_scripts(configuration, RunnerConfig::default(), Arc::new(FakeScripts));
    let report = runtime.run(RunRequest::new(Arc::new(flow), "f")).await;

    assert_eq!(report.outcome, RunOutcome::Completed { code: 2 });
    assert_eq!(report.variables.get("scripted"), Some(&Value::from("echo hi")));
    assert!(report.log.iter().any(|l| l.contains("ran greet")));
}

#[tokio::test]
async fn test_run_flow_by_name() {
    let mut flow = Flow::new("Convert");
    flow.add_part(code_part("A", 1));
    let (runtime, _) = create_runtime(Configuration::new().with_flow(flow), RunnerConfig::default());

    let report = runtime
        .run_flow("convert", "f", HashMap::new(), CancellationToken::new())
        .await
        .unwrap();
    assert!(report.outcome.is_completed());

    let missing = runtime
        .run_flow("nope", "f", HashMap::new(), CancellationToken::new())
        .await;
    assert!(missing.is_err());
}

#[test]
fn test_graph_validation() {
    let mut flow = Flow::new("Broken");
    flow.add_part(code_part("A", 1));
    flow.add_part(code_part("Orphan", 1));
    assert!(flowruntime::graph::validate(&flow).is_err(), "two entry points");

    let mut flow = Flow::new("Unreachable");
    let a = flow.add_part(code_part("A", 1));
    let b = flow.add_part(code_part("B", 1));
    let c = flow.add_part(code_part("C", 1));
    flow.connect(a, 1, b).unwrap();
    flow.connect(c, 1, b).unwrap();
    // self edge so C is not a second entry point
    flow.connect(c, 2, c).unwrap();
    assert!(flowruntime::graph::validate(&flow).is_ok());
    assert_eq!(flowruntime::graph::unreachable_parts(&flow).unwrap(), vec![c]);
}

#[tokio::test]
async fn test_set_configuration_swaps_flows() {
    let trace: Trace = Arc::new(Mutex::new(Vec::new()));
    let mut registry = flowruntime::ElementRegistry::new();
    registry.register(Arc::new(CodeFactory {
        element: "test.code",
        license: LicenseLevel::Free,
        trace: trace.clone(),
    }));
    let runtime = FlowRuntime::standard(Arc::new(registry), Arc::new(Configuration::new()));

    let missing = runtime
        .run_flow("Later", "f", HashMap::new(), CancellationToken::new())
        .await;
    assert!(missing.is_err());

    let mut flow = Flow::new("Later");
    flow.add_part(code_part("A", 1));
    runtime
        .set_configuration(Arc::new(Configuration::new().with_flow(flow)))
        .await;
    assert_eq!(runtime.configuration().await.flows.len(), 1);

    let report = runtime
        .run_flow("Later", "f", HashMap::new(), CancellationToken::new())
        .await
        .unwrap();
    assert!(report.outcome.is_completed());
    assert!(!report.outcome.is_failed() && !report.outcome.is_canceled());
    assert_eq!(labels(&trace), vec!["A"]);
}
