use async_trait::async_trait;
use flowcore::{output, ResolveError, Step, StepContext, StepError};
use flowruntime::{BoundModel, FieldSpec, OutputDefinition, StepFactory, StepMetadata, StepSchema};
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration
pub struct DelayStep {
    delay_ms: u64,
}

#[async_trait]
impl Step for DelayStep {
    fn element_uid(&self) -> &str {
        "time.delay"
    }

    async fn execute(&mut self, ctx: &mut StepContext) -> Result<i32, StepError> {
        ctx.info(format!("Delaying for {}ms", self.delay_ms));

        tokio::select! {
            _ = ctx.cancellation().cancelled() => {
                ctx.warn("Delay interrupted by cancellation");
                Ok(output::RUN_CANCELED)
            }
            _ = sleep(Duration::from_millis(self.delay_ms)) => Ok(1),
        }
    }
}

pub struct DelayStepFactory;

impl StepFactory for DelayStepFactory {
    fn create(&self, model: &BoundModel) -> Result<Box<dyn Step>, ResolveError> {
        let delay_ms = model.get_i64("DelayMs").unwrap_or(1000).max(0) as u64;
        Ok(Box::new(DelayStep { delay_ms }))
    }

    fn element_uid(&self) -> &str {
        "time.delay"
    }

    fn schema(&self) -> StepSchema {
        StepSchema::new().field(FieldSpec::integer("DelayMs").with_default(1000))
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            outputs: vec![OutputDefinition::new(1, "Delay elapsed")],
        }
    }
}
