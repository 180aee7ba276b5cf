//! Replays queued commands onto devices that finished netbooting.
//!
//! The observer watches `remote.advertize` notifications on the message bus.
//! When a device reports `netboot: booted`, the commands queued for it on the
//! host controller are sent to the device one by one, every result is logged
//! back to the host, and the device is marked configured.

pub mod config;
pub mod cooldown;
pub mod replay;
pub mod runner;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    Connect(String),
    #[error("bus connection closed")]
    Closed,
    #[error("request {0} timed out")]
    Timeout(String),
    #[error("controller error {code}: {message}")]
    Remote { code: String, message: String },
    #[error("bus protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to initialize logging: {0}")]
    Logging(String),
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Notification published by a controller on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub controller_id: String,
    pub module: String,
    pub action: String,
    pub data: Value,
}

impl Notification {
    /// Splits a `module.action` event name into a notification.
    #[must_use]
    pub fn from_event(controller_id: &str, event: &str, data: Value) -> Option<Self> {
        let (module, action) = event.split_once('.')?;
        Some(Self {
            controller_id: controller_id.to_owned(),
            module: module.to_owned(),
            action: action.to_owned(),
            data,
        })
    }
}

/// Request/response access to controllers attached to the bus.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Calls `module.action` on `controller_id` and returns the reply data.
    async fn send(
        &self,
        controller_id: &str,
        module: &str,
        action: &str,
        data: Option<Value>,
    ) -> Result<Value, BusError>;
}

/// Normalizes a controller id given on the command line.
///
/// The id must start with 16 alphanumeric characters; they are used upper-cased.
pub fn prepare_controller_id(raw: &str) -> Result<String, String> {
    let pattern = regex::Regex::new("^[0-9a-zA-Z]{16}")
        .map_err(|error| format!("invalid controller id pattern: {error}"))?;
    pattern
        .find(raw)
        .map(|found| found.as_str().to_uppercase())
        .ok_or_else(|| format!("controller id must start with 16 alphanumeric characters: {raw}"))
}
