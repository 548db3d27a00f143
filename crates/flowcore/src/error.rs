use crate::config::LicenseLevel;
use crate::flow::PartId;
use crate::library::FileStatus;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Step error: {0}")]
    Step(#[from] StepError),

    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Reasons a flow part could not be turned into an executable step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Element '{element}' requires a {required} license, run is licensed for {actual}")]
    LicenseInsufficient {
        element: String,
        required: LicenseLevel,
        actual: LicenseLevel,
    },

    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("Missing required field '{field}' on element '{element}'")]
    MissingField { element: String, field: String },

    #[error("Invalid value for '{field}': expected {expected}, got {actual}")]
    InvalidField {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid model: {0}")]
    InvalidModel(String),
}

/// Failure raised by a step while executing.
#[derive(Error, Debug, Clone)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    #[error("Missing variable: {0}")]
    MissingVariable(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Cancelled")]
    Cancelled,
}

impl From<std::io::Error> for StepError {
    fn from(e: std::io::Error) -> Self {
        StepError::Io(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Flow has no entry point")]
    NoEntryPoint,

    #[error("Flow has {0} entry points, expected exactly one")]
    MultipleEntryPoints(usize),

    #[error("Duplicate part id: {0}")]
    DuplicatePart(PartId),

    #[error("Unknown part: {0}")]
    UnknownPart(PartId),

    #[error("Connection from {from} points to missing part {to}")]
    MissingTarget { from: PartId, to: PartId },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("Schedule mask must be {expected} characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Schedule mask contains invalid character '{0}'")]
    InvalidCharacter(char),
}

/// Errors crossing the node/coordinator boundary.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    #[error("Storage error: {0}")]
    Store(String),

    #[error("File not found: {0}")]
    FileNotFound(Uuid),

    #[error("Node not found: {0}")]
    NodeNotFound(Uuid),

    #[error("File {file} is {status:?}, expected {expected:?}")]
    InvalidStatus {
        file: Uuid,
        status: FileStatus,
        expected: FileStatus,
    },

    #[error("File {file} is owned by another worker")]
    NotOwner { file: Uuid },

    #[error("Status {0:?} cannot be reported as a processing result")]
    InvalidResult(FileStatus),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The coordinator answered but refused the request.
    #[error("Rejected by coordinator: {0}")]
    Rejected(String),
}
