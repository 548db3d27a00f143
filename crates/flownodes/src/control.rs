//! Steps that steer a run: fail it deliberately or end it with a chosen output.

use async_trait::async_trait;
use flowcore::{output, ResolveError, Step, StepContext, StepError};
use flowruntime::{BoundModel, FieldSpec, OutputDefinition, StepFactory, StepMetadata, StepSchema};

pub struct FailStep {
    reason: String,
}

#[async_trait]
impl Step for FailStep {
    fn element_uid(&self) -> &str {
        "flow.fail"
    }

    async fn execute(&mut self, ctx: &mut StepContext) -> Result<i32, StepError> {
        let reason = ctx.substitute(&self.reason);
        Ok(ctx.fail(reason))
    }
}

pub struct FailStepFactory;

impl StepFactory for FailStepFactory {
    fn create(&self, model: &BoundModel) -> Result<Box<dyn Step>, ResolveError> {
        let reason = model.get_str("Reason").unwrap_or("Flow failed").to_string();
        Ok(Box::new(FailStep { reason }))
    }

    fn element_uid(&self) -> &str {
        "flow.fail"
    }

    fn schema(&self) -> StepSchema {
        StepSchema::new().field(FieldSpec::string("Reason"))
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "Fails the flow with a reason".to_string(),
            category: "flow".to_string(),
            outputs: vec![OutputDefinition::new(output::FAILURE, "Failed")],
        }
    }
}

/// Returns a fixed output code, e.g. to route a branch or end the run
pub struct OutputStep {
    code: i32,
}

#[async_trait]
impl Step for OutputStep {
    fn element_uid(&self) -> &str {
        "flow.output"
    }

    async fn execute(&mut self, ctx: &mut StepContext) -> Result<i32, StepError> {
        ctx.info(format!("Output {}", self.code));
        Ok(self.code)
    }
}

pub struct OutputStepFactory;

impl StepFactory for OutputStepFactory {
    fn create(&self, model: &BoundModel) -> Result<Box<dyn Step>, ResolveError> {
        let code = model.get_i64("Output").unwrap_or(1);
        let code = i32::try_from(code).map_err(|_| ResolveError::InvalidField {
            field: "Output".to_string(),
            expected: "32-bit output code".to_string(),
            actual: code.to_string(),
        })?;
        Ok(Box::new(OutputStep { code }))
    }

    fn element_uid(&self) -> &str {
        "flow.output"
    }

    fn schema(&self) -> StepSchema {
        StepSchema::new().field(FieldSpec::integer("Output").with_default(1))
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "Returns the configured output code".to_string(),
            category: "flow".to_string(),
            outputs: vec![
                OutputDefinition::new(output::TERMINAL_EXIT, "Exit the flow"),
                OutputDefinition::new(output::RUN_CANCELED, "Cancel the run"),
            ],
        }
    }
}
