use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::{
    application::state::SharedState,
    domain::{
        events::{
            EVENT_ACCEPT, EVENT_COMMAND_LOG, EVENT_COMMAND_SET, EVENT_COMMAND_UNSET, EVENT_REVOKE,
        },
        models::{CommandInput, LogRecordInput},
    },
    protocol::{ERROR_INVALID_REQUEST, ErrorShape},
    rpc::{
        dispatcher::map_domain_error,
        methods::{parse_optional_params, parse_required_params},
    },
};

#[derive(Debug, Deserialize)]
struct DeviceParams {
    #[serde(alias = "serial")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct AcceptStatusParams {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct CommandSetParams {
    controller_id: String,
    command: CommandInput,
}

#[derive(Debug, Deserialize)]
struct CommandUnsetParams {
    controller_id: String,
    module: String,
    action: String,
}

#[derive(Debug, Deserialize)]
struct CommandLogParams {
    controller_id: String,
    batch_id: String,
    record: LogRecordInput,
}

pub async fn handle_list(state: &SharedState, params: Option<&Value>) -> Result<Value, ErrorShape> {
    let _: Map<String, Value> = parse_optional_params("netboot.list", params)?;
    let devices = state.registry().list().await;
    Ok(json!({ "devices": devices }))
}

pub async fn handle_revoke(
    state: &SharedState,
    params: Option<&Value>,
) -> Result<Value, ErrorShape> {
    let parsed: DeviceParams = parse_required_params("netboot.revoke", params)?;
    let id = require_non_empty("netboot.revoke", "id", parsed.id)?;

    let result = state.registry().revoke(&id).await;
    if result {
        state.emit(EVENT_REVOKE, json!({ "id": id }));
    }
    Ok(json!({ "result": result }))
}

/// Accepts a device, in the background when the registry streams progress.
pub async fn handle_accept(
    state: &SharedState,
    params: Option<&Value>,
) -> Result<Value, ErrorShape> {
    let parsed: DeviceParams = parse_required_params("netboot.accept", params)?;
    let id = require_non_empty("netboot.accept", "id", parsed.id)?;

    if let Some(process) = state.registry().accept_process(&id) {
        let task_id = state.accept_tasks().start(&id, process).await;
        debug!("accept task {task_id} started for {id}");
        return Ok(json!({ "task_id": task_id }));
    }

    let result = state.registry().accept(&id).await;
    if result {
        state.emit(EVENT_ACCEPT, json!({ "id": id }));
    }
    Ok(json!({ "result": result }))
}

pub async fn handle_accept_status(
    state: &SharedState,
    params: Option<&Value>,
) -> Result<Value, ErrorShape> {
    let parsed: AcceptStatusParams = parse_required_params("netboot.accept_status", params)?;
    let Some(task) = state.accept_tasks().status(&parsed.task_id).await else {
        return Err(ErrorShape::new(
            ERROR_INVALID_REQUEST,
            format!("unknown task_id: {}", parsed.task_id),
        ));
    };
    Ok(json!(task))
}

pub async fn handle_commands_list(
    state: &SharedState,
    params: Option<&Value>,
) -> Result<Value, ErrorShape> {
    let _: Map<String, Value> = parse_optional_params("netboot.commands_list", params)?;
    let controllers = state
        .commands()
        .commands_list()
        .await
        .map_err(map_domain_error)?;
    Ok(json!({ "controllers": controllers }))
}

pub async fn handle_command_set(
    state: &SharedState,
    params: Option<&Value>,
) -> Result<Value, ErrorShape> {
    let parsed: CommandSetParams = parse_required_params("netboot.command_set", params)?;
    if !controller_accepted(state, &parsed.controller_id).await {
        return Ok(json!({ "result": false }));
    }

    let module_version = state.module_version(&parsed.command.module);
    let mut notification = json!({
        "controller_id": parsed.controller_id,
        "command": parsed.command,
    });
    let (module_version, stored_time) = state
        .commands()
        .command_set(&parsed.controller_id, parsed.command, &module_version)
        .await
        .map_err(map_domain_error)?;

    notification["command"]["module_version"] = json!(module_version);
    notification["command"]["stored_time"] = json!(stored_time);
    state.emit(EVENT_COMMAND_SET, notification);
    Ok(json!({ "result": true }))
}

pub async fn handle_command_unset(
    state: &SharedState,
    params: Option<&Value>,
) -> Result<Value, ErrorShape> {
    let parsed: CommandUnsetParams = parse_required_params("netboot.command_unset", params)?;
    if !controller_accepted(state, &parsed.controller_id).await {
        return Ok(json!({ "result": false }));
    }

    let result = state
        .commands()
        .command_unset(&parsed.controller_id, &parsed.module, &parsed.action)
        .await
        .map_err(map_domain_error)?;
    if result {
        state.emit(
            EVENT_COMMAND_UNSET,
            json!({
                "controller_id": parsed.controller_id,
                "module": parsed.module,
                "action": parsed.action,
            }),
        );
    }
    Ok(json!({ "result": result }))
}

pub async fn handle_command_log(
    state: &SharedState,
    params: Option<&Value>,
) -> Result<Value, ErrorShape> {
    let parsed: CommandLogParams = parse_required_params("netboot.command_log", params)?;
    if !controller_accepted(state, &parsed.controller_id).await {
        return Ok(json!({ "result": false }));
    }

    let mut notification = json!({
        "controller_id": parsed.controller_id,
        "batch_id": parsed.batch_id,
        "record": parsed.record,
    });
    let stored = state
        .commands()
        .command_log(&parsed.controller_id, &parsed.batch_id, parsed.record)
        .await
        .map_err(map_domain_error)?;

    let Some(when_stored) = stored else {
        return Ok(json!({ "result": false }));
    };
    notification["record"]["when_stored"] = json!(when_stored);
    state.emit(EVENT_COMMAND_LOG, notification);
    Ok(json!({ "result": true }))
}

/// Device state is re-read on every call; it may change between requests.
async fn controller_accepted(state: &SharedState, controller_id: &str) -> bool {
    let accepted = state.registry().is_accepted(controller_id).await;
    if !accepted {
        debug!("rejecting command change for {controller_id}: device is not accepted");
    }
    accepted
}

fn require_non_empty(method: &str, field: &str, value: String) -> Result<String, ErrorShape> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ErrorShape::new(
            ERROR_INVALID_REQUEST,
            format!("invalid {method} params: {field} is required"),
        ));
    }
    Ok(trimmed.to_owned())
}
