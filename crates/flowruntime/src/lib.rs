//! Flow execution runtime
//!
//! This crate resolves flow parts into steps, walks flow graphs one step at
//! a time and hosts the processing-node loop that pulls work from a
//! coordinator.

mod elements;
pub mod graph;
mod registry;
mod resolver;
mod runner;
mod runtime;
pub mod schema;
mod worker;

pub use elements::{iterator_vars, ITERATOR_DONE, ITERATOR_EMPTY};
pub use registry::{ElementRegistry, OutputDefinition, StepFactory, StepMetadata};
pub use resolver::{keys, ElementResolver};
pub use runner::{variables, FlowRunner, RunReport, RunRequest};
pub use runtime::{FlowRuntime, RunnerConfig};
pub use schema::{BoundModel, FieldSpec, FieldType, StepSchema};
pub use worker::{map_path, NodeWorker, NodeWorkerConfig, PollResult};
