//! Core abstractions for the flow engine
//!
//! This crate provides the data model shared by the runner, the processing
//! nodes and the coordinator: flows and their parts, library files, nodes,
//! the step contract and the execution context.

mod config;
pub mod dispatch;
mod error;
pub mod events;
mod flow;
mod library;
mod log;
mod outcome;
mod processing_node;
mod schedule;
mod script;
mod step;
mod value;

pub use config::{Configuration, LicenseLevel, Script};
pub use error::{DispatchError, FlowError, GraphError, ResolveError, ScheduleError, StepError};
pub use events::*;
pub use flow::{
    output, ElementKind, Flow, FlowConnection, FlowId, FlowPart, FlowType, PartId, SubFlowField,
};
pub use library::{ExecutedNode, FileStatus, Library, LibraryFile};
pub use log::RunLog;
pub use outcome::{Failure, FailureKind, RunOutcome};
pub use processing_node::{ProcessingLibraries, ProcessingNode};
pub use schedule::{Schedule, SLOT_COUNT};
pub use script::{ScriptExecutor, ScriptOutcome, ScriptRequest, UnavailableScriptExecutor};
pub use step::{FlowInvoker, GotoRequest, NestedRun, RunServices, Step, StepContext};
pub use value::Value;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
