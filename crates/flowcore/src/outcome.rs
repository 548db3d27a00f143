use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Resolution,
    PreExecute,
    Step,
    Structural,
    IterationLimit,
    Panic,
}

impl FailureKind {
    /// Whether the default failure flow runs for this kind of failure.
    pub fn escalates(self) -> bool {
        !matches!(self, FailureKind::IterationLimit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub reason: String,
    pub kind: FailureKind,
    pub element: Option<String>,
    pub element_uid: Option<String>,
    pub flow_name: String,
}

impl Failure {
    pub fn new(kind: FailureKind, reason: impl Into<String>, flow_name: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            kind,
            element: None,
            element_uid: None,
            flow_name: flow_name.into(),
        }
    }

    pub fn at_element(mut self, name: impl Into<String>, uid: impl Into<String>) -> Self {
        self.element = Some(name.into());
        self.element_uid = Some(uid.into());
        self
    }
}

/// Terminal state of a flow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// The flow ran out of edges; `code` is the last output produced.
    Completed { code: i32 },
    Failed(Failure),
    Canceled,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RunOutcome::Failed(_))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, RunOutcome::Canceled)
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            RunOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            RunOutcome::Completed { code } => format!("completed ({})", code),
            RunOutcome::Failed(failure) => format!("failed: {}", failure.reason),
            RunOutcome::Canceled => "canceled".to_string(),
        }
    }
}
