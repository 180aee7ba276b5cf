use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    application::state::SharedState,
    domain::error::DomainError,
    protocol::{
        ERROR_INVALID_REQUEST, ERROR_NOT_LINKED, ERROR_UNAVAILABLE, ErrorShape, RequestFrame,
        ResponseFrame, response_error, response_ok,
    },
    rpc::{SessionContext, methods, policy},
};

pub async fn dispatch_request(
    state: &SharedState,
    session: &SessionContext,
    request: &RequestFrame,
) -> ResponseFrame {
    if request.method == "connect" {
        return response_error(
            request.id.clone(),
            ErrorShape::new(
                ERROR_INVALID_REQUEST,
                "connect can only be used as the first handshake request",
            ),
        );
    }

    if let Err(error) = policy::authorize_session(session, &request.method) {
        return response_error(request.id.clone(), error);
    }

    if !state.serves_controller(request.controller_id.as_deref()) {
        let addressed = request.controller_id.clone().unwrap_or_default();
        let error = ErrorShape::new(
            ERROR_NOT_LINKED,
            format!("controller {addressed} is not served here"),
        )
        .with_details(json!({
            "controllerId": addressed,
            "servedControllerId": state.config().controller_id,
        }));
        return response_error(request.id.clone(), error);
    }

    debug!(
        "rpc request conn={} method={}",
        session.conn_id, request.method
    );

    let params = request.params.as_ref();
    let result = match request.method.as_str() {
        "health" => Ok(methods::health::handle(state, params).await),
        "netboot.list" => methods::netboot::handle_list(state, params).await,
        "netboot.accept" => methods::netboot::handle_accept(state, params).await,
        "netboot.accept_status" => methods::netboot::handle_accept_status(state, params).await,
        "netboot.revoke" => methods::netboot::handle_revoke(state, params).await,
        "netboot.commands_list" => methods::netboot::handle_commands_list(state, params).await,
        "netboot.command_set" => methods::netboot::handle_command_set(state, params).await,
        "netboot.command_unset" => methods::netboot::handle_command_unset(state, params).await,
        "netboot.command_log" => methods::netboot::handle_command_log(state, params).await,
        _ => Err(ErrorShape::new(
            ERROR_INVALID_REQUEST,
            format!("unknown method: {}", request.method),
        )),
    };

    match result {
        Ok(payload) => {
            info!(
                "rpc success conn={} method={}",
                session.conn_id, request.method
            );
            response_ok(request.id.clone(), payload)
        }
        Err(error) => {
            warn!(
                "rpc error conn={} method={} code={}",
                session.conn_id, request.method, error.code
            );
            response_error(request.id.clone(), error)
        }
    }
}

#[must_use]
pub fn map_domain_error(error: DomainError) -> ErrorShape {
    match error {
        DomainError::InvalidRequest(message) => ErrorShape::new(ERROR_INVALID_REQUEST, message),
        DomainError::Unavailable(message) => ErrorShape::new(ERROR_UNAVAILABLE, message),
        DomainError::Storage(message) => ErrorShape::new(ERROR_UNAVAILABLE, message),
    }
}
