use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{
    models::{Device, DeviceState},
    registry::DeviceRegistry,
};

/// In-process device registry used for `--mock-devices` and tests.
///
/// Accept and revoke complete synchronously. Each instance owns its devices.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    devices: RwLock<Vec<Device>>,
}

impl MemoryRegistry {
    #[must_use]
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices: RwLock::new(devices),
        }
    }

    /// Registry pre-populated with one device in each state.
    #[must_use]
    pub fn seeded() -> Self {
        Self::new(vec![
            Device {
                id: "0000000D300002AF".to_owned(),
                state: DeviceState::Incoming,
            },
            Device {
                id: "0000000D30000299".to_owned(),
                state: DeviceState::Accepted,
            },
            Device {
                id: "0000000D3000028E".to_owned(),
                state: DeviceState::Transfering,
            },
        ])
    }

    /// Registers or moves a device, as the netboot server would.
    pub async fn insert(&self, id: &str, state: DeviceState) {
        let mut devices = self.devices.write().await;
        match devices.iter_mut().find(|device| device.id == id) {
            Some(device) => device.state = state,
            None => devices.push(Device {
                id: id.to_owned(),
                state,
            }),
        }
    }

    async fn transition(&self, id: &str, from: DeviceState, to: DeviceState) -> bool {
        let mut devices = self.devices.write().await;
        match devices.iter_mut().find(|device| device.id == id) {
            Some(device) if device.state == from => {
                device.state = to;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl DeviceRegistry for MemoryRegistry {
    async fn list(&self) -> Vec<Device> {
        self.devices.read().await.clone()
    }

    async fn accept(&self, id: &str) -> bool {
        self.transition(id, DeviceState::Incoming, DeviceState::Accepted)
            .await
    }

    async fn revoke(&self, id: &str) -> bool {
        self.transition(id, DeviceState::Accepted, DeviceState::Incoming)
            .await
    }
}
