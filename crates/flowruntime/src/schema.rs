//! Declared step fields and the decode-and-validate binding of part models.

use flowcore::{FlowPart, ResolveError, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Number,
    Integer,
    Bool,
    String,
    StringList,
    /// Any value, passed through untouched.
    Json,
}

impl FieldType {
    fn name(self) -> &'static str {
        match self {
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Bool => "bool",
            FieldType::String => "string",
            FieldType::StringList => "string list",
            FieldType::Json => "json",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub default: Option<Value>,
    pub required: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            default: None,
            required: false,
        }
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Number)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Bool)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Json)
    }

    pub fn string_list(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::StringList)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Configurable fields of a step type
#[derive(Debug, Clone, Default)]
pub struct StepSchema {
    pub fields: Vec<FieldSpec>,
}

impl StepSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }
}

/// Validated field values handed to a step factory
#[derive(Debug, Clone, Default)]
pub struct BoundModel {
    element: String,
    values: HashMap<String, Value>,
}

impl BoundModel {
    pub fn new(element: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            values: HashMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn get_strings(&self, name: &str) -> Vec<String> {
        self.get(name)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default()
    }

    pub fn require_str(&self, name: &str) -> Result<&str, ResolveError> {
        self.get_str(name).ok_or_else(|| ResolveError::MissingField {
            element: self.element.clone(),
            field: name.to_string(),
        })
    }
}

/// Binds a part's configuration onto `schema`.
///
/// Precedence, lowest first: field default, part model, then the runtime
/// override stored in `variables` under `"<partUid>.<Field>"`.
pub fn bind(
    schema: &StepSchema,
    part: &FlowPart,
    variables: &HashMap<String, Value>,
) -> Result<BoundModel, ResolveError> {
    let mut bound = BoundModel::new(part.flow_element_uid.clone());
    for field in &schema.fields {
        let override_key = format!("{}.{}", part.uid, field.name);
        let raw = variables
            .get(&override_key)
            .or_else(|| part.model.get(&field.name))
            .filter(|v| !v.is_null())
            .or(field.default.as_ref());

        match raw {
            Some(value) => {
                let coerced = coerce(value, field.field_type).map_err(|actual| {
                    ResolveError::InvalidField {
                        field: field.name.clone(),
                        expected: field.field_type.name().to_string(),
                        actual,
                    }
                })?;
                bound.values.insert(field.name.clone(), coerced);
            }
            None if field.required => {
                return Err(ResolveError::MissingField {
                    element: part.flow_element_uid.clone(),
                    field: field.name.clone(),
                });
            }
            None => {}
        }
    }

    for key in part.model.keys() {
        if !schema.fields.iter().any(|f| &f.name == key) {
            tracing::debug!(element = %part.flow_element_uid, field = %key, "ignoring undeclared model field");
        }
    }

    Ok(bound)
}

/// Converts `value` to `target`; the error is a description of what was found.
pub fn coerce(value: &Value, target: FieldType) -> Result<Value, String> {
    let mismatch = || match value {
        Value::String(s) => format!("string '{}'", s),
        other => other.type_name().to_string(),
    };
    match target {
        FieldType::Json => Ok(value.clone()),
        FieldType::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s.trim().parse::<f64>().map(Value::Number).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        FieldType::Integer => match value {
            Value::Number(n) if n.fract() == 0.0 => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        FieldType::Bool => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) if *n == 0.0 || *n == 1.0 => Ok(Value::Bool(*n == 1.0)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            _ => Err(mismatch()),
        },
        FieldType::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(_) | Value::Bool(_) => Ok(Value::String(value.to_string())),
            _ => Err(mismatch()),
        },
        FieldType::StringList => match value {
            Value::Array(items) => items
                .iter()
                .map(|item| coerce(item, FieldType::String))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::String(s) => Ok(Value::Array(vec![Value::String(s.clone())])),
            _ => Err(mismatch()),
        },
    }
}
