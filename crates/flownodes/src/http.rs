use async_trait::async_trait;
use flowcore::{ResolveError, Step, StepContext, StepError, Value};
use flowruntime::{BoundModel, FieldSpec, OutputDefinition, StepFactory, StepMetadata, StepSchema};

/// HTTP request step
pub struct HttpRequestStep {
    client: reqwest::Client,
    url: String,
    method: String,
    body: Option<Value>,
    headers: Vec<(String, String)>,
}

#[async_trait]
impl Step for HttpRequestStep {
    fn element_uid(&self) -> &str {
        "http.request"
    }

    async fn execute(&mut self, ctx: &mut StepContext) -> Result<i32, StepError> {
        let url = ctx.substitute(&self.url);
        ctx.info(format!("{} {}", self.method, url));

        let request = match self.method.as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            other => return Ok(ctx.fail(format!("Unsupported method: {}", other))),
        };

        let request = match &self.body {
            Some(Value::String(text)) => request.body(ctx.substitute(text)),
            Some(json) => request.json(json),
            None => request,
        };

        // Add headers if provided
        let request = self
            .headers
            .iter()
            .fold(request, |req, (key, value)| req.header(key, value));

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Ok(ctx.fail(format!("HTTP request failed: {}", e))),
        };

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| StepError::Failed(format!("Failed to read response: {}", e)))?;

        ctx.info(format!("Response status: {}", status.as_u16()));
        ctx.set_variable("http.StatusCode", status.as_u16() as i64);
        ctx.set_variable("http.Body", body_text);

        Ok(if status.is_success() { 1 } else { 2 })
    }
}

pub struct HttpRequestStepFactory;

impl StepFactory for HttpRequestStepFactory {
    fn create(&self, model: &BoundModel) -> Result<Box<dyn Step>, ResolveError> {
        let headers = match model.get("Headers") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect(),
            _ => Vec::new(),
        };
        Ok(Box::new(HttpRequestStep {
            client: reqwest::Client::new(),
            url: model.require_str("Url")?.to_string(),
            method: model.get_str("Method").unwrap_or("GET").to_uppercase(),
            body: model.get("Body").cloned(),
            headers,
        }))
    }

    fn element_uid(&self) -> &str {
        "http.request"
    }

    fn schema(&self) -> StepSchema {
        StepSchema::new()
            .field(FieldSpec::string("Url").required())
            .field(FieldSpec::string("Method").with_default("GET"))
            .field(FieldSpec::json("Body"))
            .field(FieldSpec::json("Headers"))
    }

    fn license_level(&self) -> flowcore::LicenseLevel {
        flowcore::LicenseLevel::Basic
    }

    fn metadata(&self) -> StepMetadata {
        StepMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            outputs: vec![
                OutputDefinition::new(1, "2xx response"),
                OutputDefinition::new(2, "Non-success response"),
            ],
        }
    }
}
