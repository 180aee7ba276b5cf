use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use super::{BusClient, BusError, Notification, cooldown::Cooldown};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    HostController,
    OtherNotification,
    NotBooted,
    CoolingDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedCommand {
    pub module: String,
    pub action: String,
    pub result: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    Skipped(SkipReason),
    /// Nothing was queued; the device was only marked configured.
    NothingQueued,
    Replayed {
        batch_id: String,
        commands: Vec<ReplayedCommand>,
    },
    Aborted(String),
}

#[derive(Debug, Deserialize)]
struct CommandsList {
    controllers: Vec<QueuedController>,
}

#[derive(Debug, Deserialize)]
struct QueuedController {
    controller_id: String,
    #[serde(default)]
    commands: Vec<QueuedCommand>,
}

#[derive(Debug, Deserialize)]
struct QueuedCommand {
    module: String,
    action: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Reacts to device advertisements by replaying their queued commands.
#[derive(Clone)]
pub struct Replayer {
    bus: Arc<dyn BusClient>,
    host_controller_id: String,
    cooldown: Cooldown,
}

impl Replayer {
    #[must_use]
    pub fn new(bus: Arc<dyn BusClient>, host_controller_id: String, cooldown: Cooldown) -> Self {
        Self {
            bus,
            host_controller_id,
            cooldown,
        }
    }

    pub async fn handle(&self, notification: &Notification) -> ReplayOutcome {
        let controller_id = notification.controller_id.as_str();
        debug!(
            "notification from {controller_id} {}.{}",
            notification.module, notification.action
        );

        if controller_id.eq_ignore_ascii_case(&self.host_controller_id) {
            debug!("skip host notifications ({controller_id})");
            return ReplayOutcome::Skipped(SkipReason::HostController);
        }
        if notification.module != "remote" || notification.action != "advertize" {
            return ReplayOutcome::Skipped(SkipReason::OtherNotification);
        }
        if notification.data.get("netboot").and_then(Value::as_str) != Some("booted") {
            debug!("not under netboot or already configured ({controller_id})");
            return ReplayOutcome::Skipped(SkipReason::NotBooted);
        }
        if !self.cooldown.try_acquire(controller_id).await {
            debug!("configured too recently ({controller_id})");
            return ReplayOutcome::Skipped(SkipReason::CoolingDown);
        }

        match self.replay(controller_id).await {
            Ok(outcome) => outcome,
            Err(bus_error) => {
                error!("netbooted device configuration failed for {controller_id}: {bus_error}");
                ReplayOutcome::Aborted(bus_error.to_string())
            }
        }
    }

    async fn replay(&self, controller_id: &str) -> Result<ReplayOutcome, BusError> {
        let listed = match self
            .bus
            .send(&self.host_controller_id, "netboot", "commands_list", None)
            .await
        {
            Ok(listed) => listed,
            Err(BusError::Remote { code, message }) => {
                warn!("commands_list failed on host: {code} {message}");
                return Ok(ReplayOutcome::Aborted(format!("{code}: {message}")));
            }
            Err(other) => return Err(other),
        };
        let listed: CommandsList = serde_json::from_value(listed)
            .map_err(|error| BusError::Protocol(format!("invalid commands_list reply: {error}")))?;

        let commands = listed
            .controllers
            .into_iter()
            .find(|controller| controller.controller_id == controller_id)
            .map(|controller| controller.commands)
            .unwrap_or_default();

        if commands.is_empty() {
            debug!("no commands ({controller_id})");
            self.mark_configured(controller_id).await?;
            return Ok(ReplayOutcome::NothingQueued);
        }

        let batch_id = uuid::Uuid::new_v4().to_string();
        let mut replayed = Vec::with_capacity(commands.len());
        for mut command in commands {
            let data = command.data.take();
            let result = match self
                .bus
                .send(controller_id, &command.module, &command.action, data)
                .await
            {
                Ok(reply) => command_succeeded(&reply),
                Err(bus_error) => {
                    debug!(
                        "{}.{} failed on {controller_id}: {bus_error}",
                        command.module, command.action
                    );
                    false
                }
            };
            self.log_result(controller_id, &batch_id, &command, result)
                .await?;
            replayed.push(ReplayedCommand {
                module: command.module,
                action: command.action,
                result,
            });
        }

        self.mark_configured(controller_id).await?;
        Ok(ReplayOutcome::Replayed {
            batch_id,
            commands: replayed,
        })
    }

    async fn log_result(
        &self,
        controller_id: &str,
        batch_id: &str,
        command: &QueuedCommand,
        result: bool,
    ) -> Result<(), BusError> {
        debug!("logging '{}.{}'", command.module, command.action);
        self.bus
            .send(
                &self.host_controller_id,
                "netboot",
                "command_log",
                Some(json!({
                    "controller_id": controller_id,
                    "batch_id": batch_id,
                    "record": {
                        "module": command.module,
                        "action": command.action,
                        "result": result,
                    },
                })),
            )
            .await?;
        Ok(())
    }

    async fn mark_configured(&self, controller_id: &str) -> Result<(), BusError> {
        self.bus
            .send(controller_id, "remote", "set_netboot_configured", None)
            .await?;
        Ok(())
    }
}

/// A replayed command counts as applied only on an exact `{"result": true}`.
fn command_succeeded(reply: &Value) -> bool {
    *reply == json!({ "result": true })
}
