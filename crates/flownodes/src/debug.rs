use async_trait::async_trait;
use flowcore::{output, ResolveError, Step, StepContext, StepError};
use flowruntime::{BoundModel, FieldSpec, OutputDefinition, StepFactory, StepMetadata, StepSchema};

/// Simple debug step that writes a message to the run log
pub struct DebugStep {
    message: String,
}

#[async_trait]
impl Step for DebugStep {
    fn element_uid(&self) -> &str {
        "debug.log"
    }

    async fn execute(&mut self, ctx: &mut StepContext) -> Result<i32, StepError> {
        let message = ctx.substitute(&self.message);
        ctx.info(format!("DEBUG: {}", message));

        // Also log all variables for visibility
        let mut names: Vec<&String> = ctx.variables.keys().collect();
        names.sort();
        for name in names {
            tracing::debug!("  {}: {}", name, ctx.variables[name]);
        }

        Ok(output::COMPLETED)
    }
}

pub struct DebugStepFactory;

impl StepFactory for DebugStepFactory {
    fn create(&self, model: &BoundModel) -> Result<Box<dyn Step>, ResolveError> {
        let message = model.get_str("Message").unwrap_or("(no message)").to_string();
        Ok(Box::new(DebugStep { message }))
    }

    fn element_uid(&self) -> &str {
        "debug.log"
    }

    fn schema(&self) -> StepSchema {
        StepSchema::new().field(FieldSpec::string("Message"))
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "Logs a message for debugging".to_string(),
            category: "debug".to_string(),
            outputs: vec![OutputDefinition::new(output::COMPLETED, "Logged")],
        }
    }
}
