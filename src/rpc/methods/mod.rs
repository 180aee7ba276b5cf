pub mod health;
pub mod netboot;
pub mod status;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{
    domain::events::{
        EVENT_ACCEPT, EVENT_COMMAND_LOG, EVENT_COMMAND_SET, EVENT_COMMAND_UNSET, EVENT_REVOKE,
    },
    protocol::{ERROR_INVALID_REQUEST, ErrorShape},
};

pub const BASE_METHODS: &[&str] = &[
    "health",
    "netboot.list",
    "netboot.accept",
    "netboot.accept_status",
    "netboot.revoke",
    "netboot.commands_list",
    "netboot.command_set",
    "netboot.command_unset",
    "netboot.command_log",
];

pub const GATEWAY_EVENTS: &[&str] = &[
    EVENT_ACCEPT,
    EVENT_REVOKE,
    EVENT_COMMAND_SET,
    EVENT_COMMAND_UNSET,
    EVENT_COMMAND_LOG,
];

#[must_use]
pub fn known_methods() -> Vec<String> {
    BASE_METHODS
        .iter()
        .map(|value| (*value).to_owned())
        .collect()
}

#[must_use]
pub fn known_events() -> Vec<String> {
    GATEWAY_EVENTS
        .iter()
        .map(|value| (*value).to_owned())
        .collect()
}

#[must_use]
pub fn is_known_method(method: &str) -> bool {
    BASE_METHODS.contains(&method)
}

pub(crate) fn parse_optional_params<T: DeserializeOwned>(
    method: &str,
    params: Option<&Value>,
) -> Result<T, ErrorShape> {
    let raw = params.cloned().unwrap_or_else(|| Value::Object(Map::new()));
    serde_json::from_value::<T>(raw).map_err(|error| {
        ErrorShape::new(
            ERROR_INVALID_REQUEST,
            format!("invalid {method} params: {error}"),
        )
    })
}

pub(crate) fn parse_required_params<T: DeserializeOwned>(
    method: &str,
    params: Option<&Value>,
) -> Result<T, ErrorShape> {
    let Some(raw) = params.cloned() else {
        return Err(ErrorShape::new(
            ERROR_INVALID_REQUEST,
            format!("invalid {method} params: object required"),
        ));
    };

    if !raw.is_object() {
        return Err(ErrorShape::new(
            ERROR_INVALID_REQUEST,
            format!("invalid {method} params: object required"),
        ));
    }

    serde_json::from_value::<T>(raw).map_err(|error| {
        ErrorShape::new(
            ERROR_INVALID_REQUEST,
            format!("invalid {method} params: {error}"),
        )
    })
}
