use crate::registry::ElementRegistry;
use crate::runner::{FlowRunner, RunReport, RunRequest};
use flowcore::{
    Configuration, EventBus, ExecutionEvent, FlowError, LicenseLevel, ScriptExecutor,
    UnavailableScriptExecutor, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Main runtime for executing flows
pub struct FlowRuntime {
    registry: Arc<ElementRegistry>,
    event_bus: Arc<EventBus>,
    scripts: Arc<dyn ScriptExecutor>,
    config: RunnerConfig,
    runner: RwLock<Arc<FlowRunner>>,
}

impl FlowRuntime {
    pub fn new(
        registry: Arc<ElementRegistry>,
        configuration: Arc<Configuration>,
        config: RunnerConfig,
        scripts: Arc<dyn ScriptExecutor>,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let runner = Arc::new(FlowRunner::new(
            registry.clone(),
            configuration,
            config.clone(),
            event_bus.clone(),
            scripts.clone(),
        ));
        Self {
            registry,
            event_bus,
            scripts,
            config,
            runner: RwLock::new(runner),
        }
    }

    /// Runtime with default limits and no script support
    pub fn standard(registry: Arc<ElementRegistry>, configuration: Arc<Configuration>) -> Self {
        Self::new(
            registry,
            configuration,
            RunnerConfig::default(),
            Arc::new(UnavailableScriptExecutor),
        )
    }

    /// Get access to the element registry
    pub fn registry(&self) -> &Arc<ElementRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Snapshot of the active configuration
    pub async fn configuration(&self) -> Arc<Configuration> {
        self.runner.read().await.configuration().clone()
    }

    /// Swap in a new configuration; runs already in progress keep the old one.
    pub async fn set_configuration(&self, configuration: Arc<Configuration>) {
        let runner = Arc::new(FlowRunner::new(
            self.registry.clone(),
            configuration,
            self.config.clone(),
            self.event_bus.clone(),
            self.scripts.clone(),
        ));
        *self.runner.write().await = runner;
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub async fn run(&self, request: RunRequest) -> RunReport {
        let runner = self.runner.read().await.clone();
        runner.run(request).await
    }

    /// Run a flow looked up by uid or name
    pub async fn run_flow(
        &self,
        key: &str,
        working_file: impl Into<String>,
        variables: HashMap<String, Value>,
        cancellation: CancellationToken,
    ) -> Result<RunReport, FlowError> {
        let runner = self.runner.read().await.clone();
        let flow = runner
            .configuration()
            .find_flow(key)
            .cloned()
            .ok_or_else(|| FlowError::FlowNotFound(key.to_string()))?;
        let request = RunRequest::new(flow, working_file)
            .with_variables(variables)
            .with_cancellation(cancellation);
        Ok(runner.run(request).await)
    }
}

/// Limits and license for flow runs
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Steps a single run may take before it is stopped.
    pub max_steps: usize,
    /// Nesting depth for sub-flows and iterators.
    pub max_depth: usize,
    pub license: LicenseLevel,
    /// Nested outputs an iterator treats as success.
    pub iterator_accepted_codes: Vec<i32>,
    pub event_buffer_size: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_steps: 250,
            max_depth: 20,
            license: LicenseLevel::Enterprise,
            iterator_accepted_codes: vec![0, 1],
            event_buffer_size: 1000,
        }
    }
}
