use crate::flow::{Flow, FlowId, FlowType};
use crate::{FlowError, Library, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// License tier required by a step or granted to a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum LicenseLevel {
    #[default]
    Free,
    Basic,
    Standard,
    Professional,
    Enterprise,
}

impl fmt::Display for LicenseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LicenseLevel::Free => "Free",
            LicenseLevel::Basic => "Basic",
            LicenseLevel::Standard => "Standard",
            LicenseLevel::Professional => "Professional",
            LicenseLevel::Enterprise => "Enterprise",
        };
        f.write_str(name)
    }
}

/// Inline script referenced by `Script` parts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub language: String,
    pub code: String,
}

/// The active configuration: flows, scripts, named lists and libraries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub revision: u32,
    #[serde(default)]
    pub flows: Vec<Arc<Flow>>,
    #[serde(default)]
    pub scripts: Vec<Script>,
    #[serde(default)]
    pub lists: HashMap<String, Vec<Value>>,
    #[serde(default)]
    pub libraries: Vec<Library>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, FlowError> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn with_flow(mut self, flow: Flow) -> Self {
        self.flows.push(Arc::new(flow));
        self
    }

    pub fn with_script(mut self, script: Script) -> Self {
        self.scripts.push(script);
        self
    }

    pub fn with_list(mut self, name: impl Into<String>, items: Vec<Value>) -> Self {
        self.lists.insert(name.into(), items);
        self
    }

    pub fn flow(&self, uid: FlowId) -> Option<&Arc<Flow>> {
        self.flows.iter().find(|f| f.uid == uid)
    }

    /// Looks a flow up by uid text or, failing that, by case-insensitive name.
    pub fn find_flow(&self, key: &str) -> Option<&Arc<Flow>> {
        if let Ok(uid) = key.parse::<FlowId>() {
            if let Some(flow) = self.flow(uid) {
                return Some(flow);
            }
        }
        self.flows.iter().find(|f| f.name.eq_ignore_ascii_case(key))
    }

    /// The enabled failure flow marked as default, if any.
    pub fn default_failure_flow(&self) -> Option<&Arc<Flow>> {
        self.flows
            .iter()
            .find(|f| f.flow_type == FlowType::Failure && f.default && f.enabled)
    }

    pub fn script(&self, key: &str) -> Option<&Script> {
        self.scripts
            .iter()
            .find(|s| s.uid == key || (!s.name.is_empty() && s.name.eq_ignore_ascii_case(key)))
    }

    pub fn list(&self, name: &str) -> Option<&[Value]> {
        self.lists.get(name).map(Vec::as_slice)
    }
}
