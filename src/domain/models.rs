use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Version reported for commands whose module is not in the version mapping.
pub const UNKNOWN_MODULE_VERSION: &str = "?";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Incoming,
    Accepted,
    Transfering,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub state: DeviceState,
}

/// A command as submitted by a client, before it is stamped by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandInput {
    pub module: String,
    pub action: String,
    /// `None` only when the key is missing; an explicit `null` is kept.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandRecord {
    pub module: String,
    pub action: String,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
    pub module_version: String,
    pub stored_time: DateTime<Utc>,
}

impl CommandRecord {
    #[must_use]
    pub fn matches(&self, module: &str, action: &str) -> bool {
        self.module == module && self.action == action
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogRecordInput {
    pub module: String,
    pub action: String,
    pub result: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogRecord {
    pub module: String,
    pub action: String,
    pub result: bool,
    pub when_stored: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogBatch {
    pub batch_id: String,
    pub records: Vec<LogRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerRecord {
    pub controller_id: String,
    pub commands: Vec<CommandRecord>,
    pub logs: Vec<LogBatch>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AcceptStatus {
    Started,
    CaReady,
    ServerReady,
    ClientReady,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AcceptTaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcceptTaskRecord {
    pub task_id: String,
    pub id: String,
    pub state: AcceptTaskState,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
