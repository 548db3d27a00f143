use async_trait::async_trait;
use flowcore::{ResolveError, Step, StepContext, StepError, Value};
use flowruntime::{BoundModel, FieldSpec, OutputDefinition, StepFactory, StepMetadata, StepSchema};

/// Assign a flow variable; string values get `{Name}` substitution
pub struct SetVariableStep {
    variable: String,
    value: Value,
}

#[async_trait]
impl Step for SetVariableStep {
    fn element_uid(&self) -> &str {
        "variables.set"
    }

    async fn execute(&mut self, ctx: &mut StepContext) -> Result<i32, StepError> {
        let value = match &self.value {
            Value::String(s) => Value::String(ctx.substitute(s)),
            other => other.clone(),
        };
        ctx.info(format!("Setting variable '{}' to '{}'", self.variable, value));
        ctx.set_variable(self.variable.clone(), value);
        Ok(1)
    }
}

pub struct SetVariableStepFactory;

impl StepFactory for SetVariableStepFactory {
    fn create(&self, model: &BoundModel) -> Result<Box<dyn Step>, ResolveError> {
        Ok(Box::new(SetVariableStep {
            variable: model.require_str("Variable")?.to_string(),
            value: model.get("Value").cloned().unwrap_or_default(),
        }))
    }

    fn element_uid(&self) -> &str {
        "variables.set"
    }

    fn schema(&self) -> StepSchema {
        StepSchema::new()
            .field(FieldSpec::string("Variable").required())
            .field(FieldSpec::json("Value"))
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "Sets a flow variable".to_string(),
            category: "variables".to_string(),
            outputs: vec![OutputDefinition::new(1, "Variable set")],
        }
    }
}
