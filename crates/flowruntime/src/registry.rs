use crate::schema::{BoundModel, StepSchema};
use flowcore::{LicenseLevel, ResolveError, Step};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating step instances
pub trait StepFactory: Send + Sync {
    /// Create a new instance of the step from its bound configuration
    fn create(&self, model: &BoundModel) -> Result<Box<dyn Step>, ResolveError>;

    /// Element identifier parts refer to
    fn element_uid(&self) -> &str;

    /// Configurable fields, bound from the part model before `create`
    fn schema(&self) -> StepSchema {
        StepSchema::default()
    }

    /// Minimum license tier needed to run this step
    fn license_level(&self) -> LicenseLevel {
        LicenseLevel::Free
    }

    /// Optional: description and output codes for listings
    fn metadata(&self) -> StepMetadata {
        StepMetadata::default()
    }
}

/// Metadata about a step type
#[derive(Debug, Clone)]
pub struct StepMetadata {
    pub description: String,
    pub category: String,
    pub outputs: Vec<OutputDefinition>,
}

impl Default for StepMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputDefinition {
    pub code: i32,
    pub description: String,
}

impl OutputDefinition {
    pub fn new(code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

/// Registry of available step types
pub struct ElementRegistry {
    factories: HashMap<String, Arc<dyn StepFactory>>,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a step factory
    pub fn register(&mut self, factory: Arc<dyn StepFactory>) {
        let element = factory.element_uid().to_string();
        tracing::info!("Registering element: {}", element);
        self.factories.insert(element, factory);
    }

    pub fn get(&self, element: &str) -> Option<&Arc<dyn StepFactory>> {
        self.factories.get(element)
    }

    /// Get all registered element ids, sorted
    pub fn list_elements(&self) -> Vec<String> {
        let mut elements: Vec<String> = self.factories.keys().cloned().collect();
        elements.sort();
        elements
    }

    pub fn get_metadata(&self, element: &str) -> Option<StepMetadata> {
        self.factories.get(element).map(|f| f.metadata())
    }

    pub fn get_schema(&self, element: &str) -> Option<StepSchema> {
        self.factories.get(element).map(|f| f.schema())
    }
}

impl Default for ElementRegistry {
    fn default() -> Self {
        Self::new()
    }
}
