use crate::protocol::{ERROR_INVALID_REQUEST, ErrorShape};

use super::SessionContext;

pub const ADMIN_SCOPE: &str = "netboot.admin";
pub const READ_SCOPE: &str = "netboot.read";
pub const WRITE_SCOPE: &str = "netboot.write";

#[must_use]
pub fn default_operator_scopes() -> Vec<String> {
    vec![
        ADMIN_SCOPE.to_owned(),
        READ_SCOPE.to_owned(),
        WRITE_SCOPE.to_owned(),
    ]
}

pub fn authorize_session(session: &SessionContext, method: &str) -> Result<(), ErrorShape> {
    if method == "health" {
        return Ok(());
    }

    if session.role != "operator" {
        return Err(ErrorShape::new(
            ERROR_INVALID_REQUEST,
            format!("unauthorized role: {}", session.role),
        ));
    }

    if session.scopes.iter().any(|scope| scope == ADMIN_SCOPE) {
        return Ok(());
    }

    let required = required_scope_for_method(method).unwrap_or(ADMIN_SCOPE);

    // Write access implies read access.
    if required == READ_SCOPE {
        if session
            .scopes
            .iter()
            .any(|scope| scope == READ_SCOPE || scope == WRITE_SCOPE)
        {
            return Ok(());
        }
        return Err(ErrorShape::new(
            ERROR_INVALID_REQUEST,
            format!("missing scope: {READ_SCOPE}"),
        ));
    }

    if session.scopes.iter().any(|scope| scope == required) {
        return Ok(());
    }

    Err(ErrorShape::new(
        ERROR_INVALID_REQUEST,
        format!("missing scope: {required}"),
    ))
}

fn required_scope_for_method(method: &str) -> Option<&'static str> {
    match method {
        "netboot.list" | "netboot.commands_list" | "netboot.accept_status" => Some(READ_SCOPE),
        "netboot.accept"
        | "netboot.revoke"
        | "netboot.command_set"
        | "netboot.command_unset"
        | "netboot.command_log" => Some(WRITE_SCOPE),
        _ => None,
    }
}
