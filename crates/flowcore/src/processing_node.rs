use crate::Schedule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which libraries a node may take work from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProcessingLibraries {
    #[default]
    All,
    Only,
    AllExcept,
}

/// A worker identity known to the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingNode {
    pub uid: Uuid,
    pub name: String,
    pub address: String,
    pub enabled: bool,
    /// Concurrent runners this node may operate.
    pub flow_runners: u32,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub all_libraries: ProcessingLibraries,
    #[serde(default)]
    pub libraries: Vec<Uuid>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub operating_system: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub last_seen: DateTime<Utc>,
}

impl ProcessingNode {
    pub fn permits_library(&self, library: Uuid) -> bool {
        match self.all_libraries {
            ProcessingLibraries::All => true,
            ProcessingLibraries::Only => self.libraries.contains(&library),
            ProcessingLibraries::AllExcept => !self.libraries.contains(&library),
        }
    }
}
