use crate::elements::{FolderIteratorStep, GotoFlowStep, ListIteratorStep, ScriptStep, SubFlowStep};
use crate::registry::ElementRegistry;
use crate::schema;
use flowcore::{
    Configuration, ElementKind, Flow, FlowId, FlowPart, LicenseLevel, ResolveError, Step, Value,
};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// Model keys understood by the structural element kinds
pub mod keys {
    pub const FLOW: &str = "Flow";
    pub const UPDATE_FLOW_USED: &str = "UpdateFlowUsed";
    pub const LIST: &str = "List";
    pub const FOLDER: &str = "Folder";
    pub const PATTERN: &str = "Pattern";
    pub const RECURSIVE: &str = "Recursive";
}

/// Maps flow parts to executable steps
pub struct ElementResolver {
    registry: Arc<ElementRegistry>,
    configuration: Arc<Configuration>,
    license: LicenseLevel,
    accepted_codes: Vec<i32>,
}

impl ElementResolver {
    pub fn new(
        registry: Arc<ElementRegistry>,
        configuration: Arc<Configuration>,
        license: LicenseLevel,
        accepted_codes: Vec<i32>,
    ) -> Self {
        Self {
            registry,
            configuration,
            license,
            accepted_codes,
        }
    }

    pub fn resolve(
        &self,
        part: &FlowPart,
        variables: &HashMap<String, Value>,
    ) -> Result<Box<dyn Step>, ResolveError> {
        match part.kind {
            ElementKind::Plugin => self.resolve_plugin(part, variables),
            ElementKind::Script => self.resolve_script(part),
            ElementKind::SubFlow => self.resolve_sub_flow(part, variables),
            ElementKind::GotoFlow => self.resolve_goto(part),
            ElementKind::ListIterator => self.resolve_list_iterator(part, variables),
            ElementKind::FolderIterator => self.resolve_folder_iterator(part),
        }
    }

    fn resolve_plugin(
        &self,
        part: &FlowPart,
        variables: &HashMap<String, Value>,
    ) -> Result<Box<dyn Step>, ResolveError> {
        let factory = self
            .registry
            .get(&part.flow_element_uid)
            .ok_or_else(|| ResolveError::ElementNotFound(part.flow_element_uid.clone()))?;

        let required = factory.license_level();
        if required > self.license {
            return Err(ResolveError::LicenseInsufficient {
                element: part.flow_element_uid.clone(),
                required,
                actual: self.license,
            });
        }

        let model = schema::bind(&factory.schema(), part, variables)?;
        factory.create(&model)
    }

    fn resolve_script(&self, part: &FlowPart) -> Result<Box<dyn Step>, ResolveError> {
        let key = element_key(&part.flow_element_uid);
        let script = self
            .configuration
            .script(key)
            .ok_or_else(|| ResolveError::ScriptNotFound(key.to_string()))?;
        Ok(Box::new(ScriptStep::new(part.flow_element_uid.clone(), script.clone())))
    }

    fn resolve_sub_flow(
        &self,
        part: &FlowPart,
        variables: &HashMap<String, Value>,
    ) -> Result<Box<dyn Step>, ResolveError> {
        let key = element_key(&part.flow_element_uid);
        let uid = key
            .parse::<FlowId>()
            .ok()
            .or_else(|| part.model.get(keys::FLOW).and_then(reference_uid))
            .ok_or_else(|| ResolveError::FlowNotFound(key.to_string()))?;
        let flow = self.flow(uid)?;

        let mut fields = HashMap::new();
        for field in &flow.fields {
            let override_key = format!("{}.{}", part.uid, field.name);
            let value = variables
                .get(&override_key)
                .or_else(|| part.model.get(&field.name))
                .filter(|v| !v.is_null())
                .or(field.default.as_ref());
            if let Some(value) = value {
                fields.insert(field.target_variable.clone(), value.clone());
            }
        }

        Ok(Box::new(SubFlowStep::new(part.flow_element_uid.clone(), flow, fields)))
    }

    fn resolve_goto(&self, part: &FlowPart) -> Result<Box<dyn Step>, ResolveError> {
        let flow = self.model_flow(part)?;
        let update_flow_used = part
            .model
            .get(keys::UPDATE_FLOW_USED)
            .map(|v| schema::coerce(v, schema::FieldType::Bool))
            .transpose()
            .map_err(|actual| invalid(keys::UPDATE_FLOW_USED, "bool", actual))?
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Ok(Box::new(GotoFlowStep::new(
            part.flow_element_uid.clone(),
            flow,
            update_flow_used,
        )))
    }

    fn resolve_list_iterator(
        &self,
        part: &FlowPart,
        variables: &HashMap<String, Value>,
    ) -> Result<Box<dyn Step>, ResolveError> {
        let flow = self.model_flow(part)?;
        let items = match part.model.get(keys::LIST) {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::String(name)) => match variables.get(name) {
                Some(Value::Array(items)) => items.clone(),
                _ => self
                    .configuration
                    .list(name)
                    .map(<[Value]>::to_vec)
                    .ok_or_else(|| ResolveError::InvalidModel(format!("list '{}' not found", name)))?,
            },
            Some(other) => return Err(invalid(keys::LIST, "array or list name", other.type_name())),
            None => {
                return Err(ResolveError::MissingField {
                    element: part.flow_element_uid.clone(),
                    field: keys::LIST.to_string(),
                })
            }
        };
        Ok(Box::new(ListIteratorStep::new(
            part.flow_element_uid.clone(),
            flow,
            items,
            self.accepted_codes.clone(),
        )))
    }

    fn resolve_folder_iterator(&self, part: &FlowPart) -> Result<Box<dyn Step>, ResolveError> {
        let flow = self.model_flow(part)?;
        let folder = match part.model.get(keys::FOLDER) {
            Some(Value::String(folder)) if !folder.is_empty() => folder.clone(),
            Some(other) if !other.is_null() => {
                return Err(invalid(keys::FOLDER, "string", other.type_name()))
            }
            _ => {
                return Err(ResolveError::MissingField {
                    element: part.flow_element_uid.clone(),
                    field: keys::FOLDER.to_string(),
                })
            }
        };
        let pattern = match part.model.get(keys::PATTERN).and_then(Value::as_str) {
            Some(p) if !p.is_empty() => Some(
                Regex::new(p).map_err(|e| invalid(keys::PATTERN, "regular expression", e.to_string()))?,
            ),
            _ => None,
        };
        let recursive = part
            .model
            .get(keys::RECURSIVE)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(Box::new(FolderIteratorStep::new(
            part.flow_element_uid.clone(),
            flow,
            folder,
            pattern,
            recursive,
            self.accepted_codes.clone(),
        )))
    }

    fn model_flow(&self, part: &FlowPart) -> Result<Arc<Flow>, ResolveError> {
        let value = part.model.get(keys::FLOW).ok_or_else(|| ResolveError::MissingField {
            element: part.flow_element_uid.clone(),
            field: keys::FLOW.to_string(),
        })?;
        let uid = reference_uid(value)
            .ok_or_else(|| invalid(keys::FLOW, "flow reference", value.to_string()))?;
        self.flow(uid)
    }

    fn flow(&self, uid: FlowId) -> Result<Arc<Flow>, ResolveError> {
        self.configuration
            .flow(uid)
            .cloned()
            .ok_or_else(|| ResolveError::FlowNotFound(uid.to_string()))
    }
}

/// Element ids may carry a kind prefix such as `SubFlow:<uid>`.
fn element_key(element: &str) -> &str {
    element.rsplit(':').next().unwrap_or(element)
}

/// A flow reference is either a uid string or an object with a `uid` member.
fn reference_uid(value: &Value) -> Option<FlowId> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Object(map) => map
            .get("uid")
            .or_else(|| map.get("Uid"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok()),
        _ => None,
    }
}

fn invalid(field: &str, expected: &str, actual: impl Into<String>) -> ResolveError {
    ResolveError::InvalidField {
        field: field.to_string(),
        expected: expected.to_string(),
        actual: actual.into(),
    }
}
