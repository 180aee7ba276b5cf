use std::{path::PathBuf, process::Stdio};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::{
    models::{Device, DeviceState},
    registry::DeviceRegistry,
};

pub const DEFAULT_NETBOOT_MANAGER: &str = "/usr/bin/netboot-manager";

#[derive(Debug, Deserialize)]
struct ListAllOutput {
    accepted: Vec<String>,
    incoming: Vec<String>,
    transfering: Vec<String>,
}

/// Device registry backed by the `netboot-manager` tool.
#[derive(Debug, Clone)]
pub struct NetbootManager {
    binary: PathBuf,
}

impl NetbootManager {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command.stdin(Stdio::null()).kill_on_drop(true);
        command
    }

    async fn run_status(&self, args: &[&str]) -> bool {
        let result = self.command().args(args).output().await;
        match result {
            Ok(output) => {
                if !output.status.success() {
                    debug!(
                        "netboot-manager {} exited with {}",
                        args.join(" "),
                        output
                            .status
                            .code()
                            .map_or_else(|| "signal".to_owned(), |code| code.to_string())
                    );
                }
                output.status.success()
            }
            Err(error) => {
                warn!("failed to execute {}: {error}", self.binary.display());
                false
            }
        }
    }
}

#[async_trait]
impl DeviceRegistry for NetbootManager {
    async fn list(&self) -> Vec<Device> {
        let output = match self.command().args(["list-all", "-j"]).output().await {
            Ok(output) => output,
            Err(error) => {
                warn!("failed to execute {}: {error}", self.binary.display());
                return Vec::new();
            }
        };
        if !output.status.success() {
            return Vec::new();
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_list_output(&stdout) {
            Some(devices) => {
                debug!("netboot-manager listed {} devices", devices.len());
                devices
            }
            None => Vec::new(),
        }
    }

    async fn accept(&self, id: &str) -> bool {
        self.run_status(&["accept", id]).await
    }

    async fn revoke(&self, id: &str) -> bool {
        self.run_status(&["revoke", id]).await
    }

    fn accept_process(&self, id: &str) -> Option<Command> {
        let mut command = self.command();
        command.arg("accept").arg(id);
        Some(command)
    }
}

/// Parses `list-all -j` output; `None` when it is not the expected shape.
pub fn parse_list_output(stdout: &str) -> Option<Vec<Device>> {
    let parsed = match serde_json::from_str::<ListAllOutput>(stdout) {
        Ok(parsed) => parsed,
        Err(error) if error.is_data() => {
            warn!("netboot-manager list output is not in correct format: {error}");
            return None;
        }
        Err(error) => {
            warn!("failed to parse netboot-manager list output: {error}");
            return None;
        }
    };

    let groups = [
        (parsed.accepted, DeviceState::Accepted),
        (parsed.incoming, DeviceState::Incoming),
        (parsed.transfering, DeviceState::Transfering),
    ];
    Some(
        groups
            .into_iter()
            .flat_map(|(ids, state)| ids.into_iter().map(move |id| Device { id, state }))
            .collect(),
    )
}
