//! Standard step library
//!
//! Collection of built-in steps for common operations

mod control;
mod debug;
mod file;
mod http;
mod script;
mod time;
mod variables;

pub use control::{FailStep, OutputStep};
pub use debug::DebugStep;
pub use file::FileExistsStep;
pub use http::HttpRequestStep;
pub use script::{env_key, ProcessScriptExecutor, SET_VARIABLE_PREFIX};
pub use time::DelayStep;
pub use variables::SetVariableStep;
use flowruntime::ElementRegistry;

use std::sync::Arc;

/// Register all standard steps with a registry
pub fn register_all(registry: &mut ElementRegistry) {
    registry.register(Arc::new(debug::DebugStepFactory));
    registry.register(Arc::new(time::DelayStepFactory));
    registry.register(Arc::new(variables::SetVariableStepFactory));
    registry.register(Arc::new(control::FailStepFactory));
    registry.register(Arc::new(control::OutputStepFactory));
    registry.register(Arc::new(file::FileExistsStepFactory));
    registry.register(Arc::new(http::HttpRequestStepFactory));
}

/// A registry holding every standard step
pub fn standard_registry() -> ElementRegistry {
    let mut registry = ElementRegistry::new();
    register_all(&mut registry);
    registry
}
