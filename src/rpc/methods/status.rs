use serde_json::{Value, json};

use crate::application::state::SharedState;

#[must_use]
pub fn info_payload(state: &SharedState) -> Value {
    json!({
        "name": "netboot-controller",
        "version": state.config().runtime_version,
        "controllerId": state.config().controller_id,
        "protocolVersion": crate::protocol::PROTOCOL_VERSION,
        "authMode": state.auth_mode_label(),
        "methods": state.methods(),
        "events": state.events(),
        "moduleVersions": state.module_versions(),
    })
}
