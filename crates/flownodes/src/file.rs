use async_trait::async_trait;
use flowcore::{ResolveError, Step, StepContext, StepError};
use flowruntime::{BoundModel, FieldSpec, OutputDefinition, StepFactory, StepMetadata, StepSchema};

/// Checks whether a path exists; defaults to the working file
pub struct FileExistsStep {
    path: Option<String>,
}

#[async_trait]
impl Step for FileExistsStep {
    fn element_uid(&self) -> &str {
        "file.exists"
    }

    async fn execute(&mut self, ctx: &mut StepContext) -> Result<i32, StepError> {
        let path = match &self.path {
            Some(path) => ctx.substitute(path),
            None => ctx.working_file.clone(),
        };
        let exists = tokio::fs::try_exists(&path).await?;
        ctx.info(format!(
            "{} {}",
            path,
            if exists { "exists" } else { "does not exist" }
        ));
        Ok(if exists { 1 } else { 2 })
    }
}

pub struct FileExistsStepFactory;

impl StepFactory for FileExistsStepFactory {
    fn create(&self, model: &BoundModel) -> Result<Box<dyn Step>, ResolveError> {
        let path = model
            .get_str("Path")
            .filter(|p| !p.is_empty())
            .map(String::from);
        Ok(Box::new(FileExistsStep { path }))
    }

    fn element_uid(&self) -> &str {
        "file.exists"
    }

    fn schema(&self) -> StepSchema {
        StepSchema::new().field(FieldSpec::string("Path"))
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "Checks if a file exists".to_string(),
            category: "file".to_string(),
            outputs: vec![
                OutputDefinition::new(1, "File exists"),
                OutputDefinition::new(2, "File does not exist"),
            ],
        }
    }
}
