use async_trait::async_trait;
use tokio::process::Command;

use super::models::{Device, DeviceState};

/// Source of truth for netboot devices and their trust state.
///
/// Failures of the backing tool are folded into the return values: an empty
/// list, or `false` for state changes. Callers treat those as authoritative
/// for the call and never retry.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn list(&self) -> Vec<Device>;

    async fn accept(&self, id: &str) -> bool;

    async fn revoke(&self, id: &str) -> bool;

    /// Process that performs the accept while streaming progress, when the
    /// backend supports running accept as a background task.
    fn accept_process(&self, _id: &str) -> Option<Command> {
        None
    }

    async fn state_of(&self, id: &str) -> Option<DeviceState> {
        self.list()
            .await
            .into_iter()
            .find(|device| device.id == id)
            .map(|device| device.state)
    }

    async fn is_accepted(&self, id: &str) -> bool {
        self.state_of(id).await == Some(DeviceState::Accepted)
    }
}
