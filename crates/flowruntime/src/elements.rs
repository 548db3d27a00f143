//! Steps backing the structural element kinds: scripts, sub-flows, goto and iterators.

use async_trait::async_trait;
use flowcore::{
    output, Flow, RunOutcome, Script, ScriptRequest, Step, StepContext, StepError, Value,
};
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use walkdir::WalkDir;

/// Variables set on each iteration's derived context
pub mod iterator_vars {
    pub const ITEM: &str = "Iterator.Item";
    pub const INDEX: &str = "Iterator.Index";
    pub const TOTAL: &str = "Iterator.Total";
}

/// Iterator output when every item was processed.
pub const ITERATOR_DONE: i32 = 1;
/// Iterator output when the source had no items.
pub const ITERATOR_EMPTY: i32 = 2;

/// Turns a nested run's outcome into the calling step's output code.
fn nested_code(ctx: &mut StepContext, flow: &Flow, outcome: RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Completed { code } => code,
        RunOutcome::Canceled => output::RUN_CANCELED,
        RunOutcome::Failed(failure) if !failure.kind.escalates() => ctx.fail_run(failure),
        RunOutcome::Failed(failure) => {
            ctx.fail(format!("Sub flow '{}' failed: {}", flow.name, failure.reason))
        }
    }
}

pub struct ScriptStep {
    element: String,
    script: Script,
}

impl ScriptStep {
    pub fn new(element: String, script: Script) -> Self {
        Self { element, script }
    }
}

#[async_trait]
impl Step for ScriptStep {
    fn element_uid(&self) -> &str {
        &self.element
    }

    async fn execute(&mut self, ctx: &mut StepContext) -> Result<i32, StepError> {
        let request = ScriptRequest {
            script_uid: self.script.uid.clone(),
            language: self.script.language.clone(),
            code: self.script.code.clone(),
            working_file: ctx.working_file.clone(),
            variables: ctx.variables.clone(),
        };
        let outcome = ctx
            .scripts()
            .clone()
            .execute(request, ctx.cancellation().clone())
            .await?;
        for line in &outcome.log {
            ctx.info(line);
        }
        ctx.variables.extend(outcome.variables);
        Ok(outcome.exit_code)
    }
}

pub struct SubFlowStep {
    element: String,
    flow: Arc<Flow>,
    fields: HashMap<String, Value>,
}

impl SubFlowStep {
    pub fn new(element: String, flow: Arc<Flow>, fields: HashMap<String, Value>) -> Self {
        Self {
            element,
            flow,
            fields,
        }
    }
}

#[async_trait]
impl Step for SubFlowStep {
    fn element_uid(&self) -> &str {
        &self.element
    }

    async fn execute(&mut self, ctx: &mut StepContext) -> Result<i32, StepError> {
        ctx.info(format!("Executing sub flow '{}'", self.flow.name));
        let child = ctx.derive(self.fields.clone());
        let nested = ctx.invoker().invoke(self.flow.clone(), child).await;
        // the working file may have been replaced by the sub flow
        ctx.working_file = nested.context.working_file;
        Ok(nested_code(ctx, &self.flow, nested.outcome))
    }
}

pub struct GotoFlowStep {
    element: String,
    flow: Arc<Flow>,
    update_flow_used: bool,
}

impl GotoFlowStep {
    pub fn new(element: String, flow: Arc<Flow>, update_flow_used: bool) -> Self {
        Self {
            element,
            flow,
            update_flow_used,
        }
    }
}

#[async_trait]
impl Step for GotoFlowStep {
    fn element_uid(&self) -> &str {
        &self.element
    }

    async fn execute(&mut self, ctx: &mut StepContext) -> Result<i32, StepError> {
        ctx.info(format!("Going to flow '{}'", self.flow.name));
        if self.update_flow_used {
            ctx.set_current_flow(self.flow.uid, self.flow.name.clone());
        }
        ctx.request_goto(self.flow.clone());
        Ok(output::COMPLETED)
    }
}

/// Runs `flow` once per item, one at a time, each on its own derived context.
async fn iterate(
    ctx: &mut StepContext,
    flow: &Arc<Flow>,
    items: Vec<(Option<String>, Value)>,
    accepted: &[i32],
) -> i32 {
    let total = items.len();
    if total == 0 {
        ctx.info("No items to iterate");
        return ITERATOR_EMPTY;
    }
    ctx.info(format!("Iterating {} items through '{}'", total, flow.name));

    for (index, (working_file, item)) in items.into_iter().enumerate() {
        if ctx.is_cancelled() {
            return output::RUN_CANCELED;
        }
        let mut extra = HashMap::new();
        extra.insert(iterator_vars::ITEM.to_string(), item);
        extra.insert(iterator_vars::INDEX.to_string(), Value::from(index as i64));
        extra.insert(iterator_vars::TOTAL.to_string(), Value::from(total as i64));
        let item_ctx = match working_file {
            Some(file) => ctx.derive_for_item(file, extra),
            None => ctx.derive(extra),
        };

        let nested = ctx.invoker().invoke(flow.clone(), item_ctx).await;
        match nested.outcome {
            RunOutcome::Completed { code } if accepted.contains(&code) => {}
            RunOutcome::Completed { code } => {
                return ctx.fail(format!(
                    "Iteration {} of {} returned unexpected output {}",
                    index + 1,
                    total,
                    code
                ));
            }
            outcome => {
                let code = nested_code(ctx, flow, outcome);
                if code == output::FAILURE {
                    ctx.warn(format!("Iteration {} of {} aborted", index + 1, total));
                }
                return code;
            }
        }

        ctx.progress(((index + 1) * 100 / total) as f64);
    }
    ITERATOR_DONE
}

pub struct ListIteratorStep {
    element: String,
    flow: Arc<Flow>,
    items: Vec<Value>,
    accepted: Vec<i32>,
}

impl ListIteratorStep {
    pub fn new(element: String, flow: Arc<Flow>, items: Vec<Value>, accepted: Vec<i32>) -> Self {
        Self {
            element,
            flow,
            items,
            accepted,
        }
    }
}

#[async_trait]
impl Step for ListIteratorStep {
    fn element_uid(&self) -> &str {
        &self.element
    }

    async fn execute(&mut self, ctx: &mut StepContext) -> Result<i32, StepError> {
        let items = self.items.iter().map(|item| (None, item.clone())).collect();
        Ok(iterate(ctx, &self.flow, items, &self.accepted).await)
    }
}

pub struct FolderIteratorStep {
    element: String,
    flow: Arc<Flow>,
    folder: String,
    pattern: Option<Regex>,
    recursive: bool,
    accepted: Vec<i32>,
}

impl FolderIteratorStep {
    pub fn new(
        element: String,
        flow: Arc<Flow>,
        folder: String,
        pattern: Option<Regex>,
        recursive: bool,
        accepted: Vec<i32>,
    ) -> Self {
        Self {
            element,
            flow,
            folder,
            pattern,
            recursive,
            accepted,
        }
    }
}

fn list_folder(
    folder: PathBuf,
    pattern: Option<Regex>,
    recursive: bool,
) -> Result<Vec<String>, StepError> {
    if !folder.is_dir() {
        return Err(StepError::Io(format!(
            "folder does not exist: {}",
            folder.display()
        )));
    }
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();
    for entry in WalkDir::new(&folder)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| StepError::Io(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if let Some(pattern) = &pattern {
            if !pattern.is_match(&name) {
                continue;
            }
        }
        files.push(entry.path().to_string_lossy().into_owned());
    }
    Ok(files)
}

#[async_trait]
impl Step for FolderIteratorStep {
    fn element_uid(&self) -> &str {
        &self.element
    }

    async fn execute(&mut self, ctx: &mut StepContext) -> Result<i32, StepError> {
        let folder = PathBuf::from(ctx.substitute(&self.folder));
        ctx.info(format!("Enumerating folder {}", folder.display()));
        let pattern = self.pattern.clone();
        let recursive = self.recursive;
        let files = tokio::task::spawn_blocking(move || list_folder(folder, pattern, recursive))
            .await
            .map_err(|e| StepError::Failed(format!("folder enumeration failed: {}", e)))??;

        let items = files
            .into_iter()
            .map(|path| (Some(path.clone()), Value::String(path)))
            .collect();
        Ok(iterate(ctx, &self.flow, items, &self.accepted).await)
    }
}
