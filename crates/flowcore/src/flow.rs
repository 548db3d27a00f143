use crate::{GraphError, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type FlowId = Uuid;
pub type PartId = Uuid;

/// Output codes with a fixed meaning to the runner.
///
/// `0` is deliberately not reserved: a step returning `0` with no matching
/// connection ends the flow like any other unconnected code, and iterators
/// accept it as a successful pass.
pub mod output {
    pub const FAILURE: i32 = -1;
    pub const COMPLETED: i32 = 0;
    /// The step fully reported the result itself; stop without edge lookup.
    pub const TERMINAL_EXIT: i32 = -99;
    pub const RUN_CANCELED: i32 = -100;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum FlowType {
    #[default]
    Standard,
    Failure,
    SubFlow,
}

/// How a part's element id is interpreted by the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ElementKind {
    #[default]
    Plugin,
    Script,
    SubFlow,
    GotoFlow,
    ListIterator,
    FolderIterator,
}

/// Complete flow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub uid: FlowId,
    pub name: String,
    #[serde(default)]
    pub flow_type: FlowType,
    /// Marks the failure flow used when a run fails without an error edge.
    #[serde(default)]
    pub default: bool,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub revision: u32,
    #[serde(default)]
    pub parts: Vec<FlowPart>,
    /// Fields a sub-flow exposes to the parts that call it.
    #[serde(default)]
    pub fields: Vec<SubFlowField>,
}

fn enabled_by_default() -> bool {
    true
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            name: name.into(),
            flow_type: FlowType::Standard,
            default: false,
            enabled: true,
            revision: 0,
            parts: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn with_type(mut self, flow_type: FlowType) -> Self {
        self.flow_type = flow_type;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    pub fn with_field(mut self, field: SubFlowField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn add_part(&mut self, part: FlowPart) -> PartId {
        let id = part.uid;
        self.parts.push(part);
        id
    }

    /// Adds an edge taken when `from` produces `output`.
    pub fn connect(&mut self, from: PartId, output: i32, to: PartId) -> Result<(), GraphError> {
        self.mark_as_target(to);
        let part = self.find_part_mut(from).ok_or(GraphError::UnknownPart(from))?;
        part.output_connections.push(FlowConnection {
            output,
            input: 1,
            input_node: to,
        });
        if output > part.outputs as i32 {
            part.outputs = output as u32;
        }
        Ok(())
    }

    /// Sets the edge taken when `from` signals failure.
    pub fn set_error_connection(&mut self, from: PartId, to: PartId) -> Result<(), GraphError> {
        self.mark_as_target(to);
        let part = self.find_part_mut(from).ok_or(GraphError::UnknownPart(from))?;
        part.error_connection = Some(to);
        Ok(())
    }

    fn mark_as_target(&mut self, to: PartId) {
        if let Some(target) = self.find_part_mut(to) {
            target.inputs = target.inputs.max(1);
        }
    }

    pub fn find_part(&self, id: PartId) -> Option<&FlowPart> {
        self.parts.iter().find(|p| p.uid == id)
    }

    fn find_part_mut(&mut self, id: PartId) -> Option<&mut FlowPart> {
        self.parts.iter_mut().find(|p| p.uid == id)
    }

    /// The single part with no inputs.
    pub fn entry_part(&self) -> Result<&FlowPart, GraphError> {
        let mut entries = self.parts.iter().filter(|p| p.inputs == 0);
        match (entries.next(), entries.count()) {
            (None, _) => Err(GraphError::NoEntryPoint),
            (Some(part), 0) => Ok(part),
            (Some(_), rest) => Err(GraphError::MultipleEntryPoints(rest + 1)),
        }
    }
}

/// One step in a flow's graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowPart {
    pub uid: PartId,
    #[serde(default)]
    pub name: Option<String>,
    pub flow_element_uid: String,
    #[serde(default)]
    pub kind: ElementKind,
    #[serde(default)]
    pub inputs: u32,
    #[serde(default)]
    pub outputs: u32,
    #[serde(default)]
    pub output_connections: Vec<FlowConnection>,
    #[serde(default)]
    pub error_connection: Option<PartId>,
    #[serde(default)]
    pub model: HashMap<String, Value>,
}

impl FlowPart {
    pub fn new(kind: ElementKind, element: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            name: None,
            flow_element_uid: element.into(),
            kind,
            inputs: 0,
            outputs: 1,
            output_connections: Vec::new(),
            error_connection: None,
            model: HashMap::new(),
        }
    }

    pub fn plugin(element: impl Into<String>) -> Self {
        Self::new(ElementKind::Plugin, element)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_model(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.model.insert(key.into(), value.into());
        self
    }

    /// Name shown in logs and history; falls back to the element id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.flow_element_uid)
    }

    pub fn connection_for(&self, output: i32) -> Option<&FlowConnection> {
        self.output_connections.iter().find(|c| c.output == output)
    }
}

/// Edge from an output code to the input slot of another part
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowConnection {
    pub output: i32,
    #[serde(default)]
    pub input: i32,
    pub input_node: PartId,
}

/// A field exposed by a sub-flow and bound from the calling part's model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubFlowField {
    pub name: String,
    pub target_variable: String,
    #[serde(default)]
    pub default: Option<Value>,
}

impl SubFlowField {
    pub fn new(name: impl Into<String>, target_variable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_variable: target_variable.into(),
            default: None,
        }
    }
}
