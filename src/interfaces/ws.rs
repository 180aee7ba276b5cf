use std::net::SocketAddr;

use axum::{
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::{sync::broadcast::error::RecvError, time::timeout};
use tracing::{debug, error, warn};

use crate::{
    application::state::{ConnectedClient, SharedState},
    protocol::{
        ConnectParams, ERROR_INVALID_REQUEST, ERROR_UNAVAILABLE, ErrorShape, GatewayPolicy,
        HelloFeatures, HelloOk, HelloServer, PROTOCOL_VERSION, event_frame, parse_request_frame,
        response_error, response_ok,
    },
    rpc::{SessionContext, dispatcher::dispatch_request, policy::default_operator_scopes},
    security::auth::{auth_failure_error, authorize},
    storage::now_unix_ms,
};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.max_message_size(state.config().max_payload_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, remote_addr))
}

async fn handle_socket(mut socket: WebSocket, state: SharedState, remote_addr: SocketAddr) {
    let remote_ip = Some(remote_addr.ip().to_string());
    // Subscribed before hello-ok so no event emitted after the handshake is missed.
    let mut events = state.subscribe_events();

    let session = match perform_handshake(&mut socket, &state, remote_ip).await {
        Ok(context) => context,
        Err(()) => {
            debug!("handshake failed remote={remote_addr}");
            return;
        }
    };

    let controller_id = state.config().controller_id.clone();

    loop {
        tokio::select! {
            next = socket.recv() => {
                let Some(next) = next else {
                    break;
                };
                let message = match next {
                    Ok(message) => message,
                    Err(error) => {
                        warn!("websocket receive failed conn={}: {error}", session.conn_id);
                        break;
                    }
                };
                if !handle_message(&mut socket, &state, &session, message).await {
                    break;
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let frame = event_frame(event, controller_id.clone());
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("event stream lagged conn={} skipped={skipped}", session.conn_id);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    state.unregister_client(&session.conn_id).await;
    debug!(
        "connection closed conn={} remote={remote_addr}",
        session.conn_id
    );
}

/// Handles one inbound frame; returns `false` when the connection must close.
async fn handle_message(
    socket: &mut WebSocket,
    state: &SharedState,
    session: &SessionContext,
    message: Message,
) -> bool {
    if matches!(message, Message::Close(_)) {
        return false;
    }

    let text = match message_to_text(message, state.config().max_payload_bytes) {
        Ok(Some(text)) => text,
        Ok(None) => return true,
        Err(error_shape) => {
            let _ = send_frame(socket, &response_error("invalid", error_shape)).await;
            return false;
        }
    };

    let request = match parse_request_frame(&text) {
        Ok(frame) => frame,
        Err(error_shape) => {
            let request_id = extract_frame_id(&text).unwrap_or_else(|| "invalid".to_owned());
            return send_frame(socket, &response_error(request_id, error_shape))
                .await
                .is_ok();
        }
    };

    let response = dispatch_request(state, session, &request).await;
    send_frame(socket, &response).await.is_ok()
}

async fn perform_handshake(
    socket: &mut WebSocket,
    state: &SharedState,
    remote_ip: Option<String>,
) -> Result<SessionContext, ()> {
    let text = match timeout(
        state.config().handshake_timeout,
        recv_next_text(socket, state),
    )
    .await
    {
        Ok(Ok(text)) => text,
        Ok(Err(error_shape)) => {
            return reject(socket, "connect", error_shape).await;
        }
        Err(_) => {
            let error_shape = ErrorShape::new(ERROR_INVALID_REQUEST, "handshake timeout");
            return reject(socket, "connect", error_shape).await;
        }
    };

    let request = match parse_request_frame(&text) {
        Ok(frame) => frame,
        Err(error_shape) => {
            let request_id = extract_frame_id(&text).unwrap_or_else(|| "connect".to_owned());
            return reject(socket, request_id, error_shape).await;
        }
    };

    if request.method != "connect" {
        let error_shape = ErrorShape::new(
            ERROR_INVALID_REQUEST,
            "invalid handshake: first request must be connect",
        );
        return reject(socket, request.id, error_shape).await;
    }

    let connect_params = match parse_connect_params(request.params) {
        Ok(params) => params,
        Err(error_shape) => return reject(socket, request.id, error_shape).await,
    };

    if connect_params.max_protocol < PROTOCOL_VERSION
        || connect_params.min_protocol > PROTOCOL_VERSION
    {
        let error_shape = ErrorShape::new(ERROR_INVALID_REQUEST, "protocol mismatch")
            .with_details(json!({ "expectedProtocol": PROTOCOL_VERSION }));
        return reject(socket, request.id, error_shape).await;
    }

    let role = connect_params
        .role
        .clone()
        .unwrap_or_else(|| "operator".to_owned());
    if role != "operator" && role != "node" {
        let error_shape = ErrorShape::new(ERROR_INVALID_REQUEST, "invalid role");
        return reject(socket, request.id, error_shape).await;
    }

    if let Err(reason) = authorize(&state.config().auth_mode, connect_params.auth.as_ref()) {
        warn!(
            "handshake rejected client={} remote={}",
            connect_params.client.id,
            remote_ip.as_deref().unwrap_or("unknown")
        );
        return reject(socket, request.id, auth_failure_error(reason)).await;
    }

    let conn_id = uuid::Uuid::new_v4().to_string();
    let mut scopes = sanitize_scopes(&connect_params.scopes);
    if role == "operator" && scopes.is_empty() {
        scopes = default_operator_scopes();
    }

    state
        .register_client(ConnectedClient {
            conn_id: conn_id.clone(),
            client_id: connect_params.client.id.clone(),
            role: role.clone(),
            remote_ip,
            connected_at_ms: now_unix_ms(),
        })
        .await;

    let hello = HelloOk {
        frame_type: "hello-ok",
        protocol: PROTOCOL_VERSION,
        server: HelloServer {
            version: state.config().runtime_version.clone(),
            conn_id: conn_id.clone(),
            controller_id: state.config().controller_id.clone(),
        },
        features: HelloFeatures {
            methods: state.methods(),
            events: state.events(),
        },
        policy: GatewayPolicy {
            max_payload: state.config().max_payload_bytes,
        },
    };

    let payload = match serde_json::to_value(hello) {
        Ok(value) => value,
        Err(error) => {
            state.unregister_client(&conn_id).await;
            let error_shape = ErrorShape::new(
                ERROR_UNAVAILABLE,
                format!("failed to serialize hello payload: {error}"),
            );
            return reject(socket, request.id, error_shape).await;
        }
    };

    if send_frame(socket, &response_ok(request.id, payload))
        .await
        .is_err()
    {
        state.unregister_client(&conn_id).await;
        return Err(());
    }

    debug!("handshake ok conn={conn_id} role={role}");
    Ok(SessionContext {
        conn_id,
        role,
        scopes,
        client_id: connect_params.client.id,
    })
}

async fn reject(
    socket: &mut WebSocket,
    request_id: impl Into<String>,
    error_shape: ErrorShape,
) -> Result<SessionContext, ()> {
    let _ = send_frame(socket, &response_error(request_id, error_shape)).await;
    Err(())
}

async fn recv_next_text(socket: &mut WebSocket, state: &SharedState) -> Result<String, ErrorShape> {
    loop {
        let next = socket.recv().await.ok_or_else(|| {
            ErrorShape::new(ERROR_INVALID_REQUEST, "connection closed before handshake")
        })?;

        let message = next.map_err(|error| {
            ErrorShape::new(ERROR_UNAVAILABLE, format!("websocket read failed: {error}"))
        })?;

        match message_to_text(message, state.config().max_payload_bytes)? {
            Some(text) => return Ok(text),
            None => continue,
        }
    }
}

fn parse_connect_params(params: Option<Value>) -> Result<ConnectParams, ErrorShape> {
    let raw = params.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    serde_json::from_value::<ConnectParams>(raw).map_err(|error| {
        ErrorShape::new(
            ERROR_INVALID_REQUEST,
            format!("invalid connect params: {error}"),
        )
    })
}

fn sanitize_scopes(scopes: &[String]) -> Vec<String> {
    let mut sanitized: Vec<String> = scopes
        .iter()
        .map(|scope| scope.trim())
        .filter(|scope| !scope.is_empty())
        .map(str::to_owned)
        .collect();
    sanitized.sort();
    sanitized.dedup();
    sanitized
}

async fn send_frame<T: Serialize>(socket: &mut WebSocket, frame: &T) -> Result<(), ()> {
    let text = match serde_json::to_string(frame) {
        Ok(value) => value,
        Err(error) => {
            error!("failed to serialize websocket frame: {error}");
            return Err(());
        }
    };

    socket
        .send(Message::Text(text.into()))
        .await
        .map_err(|error| {
            warn!("failed to send websocket frame: {error}");
        })
}

fn message_to_text(
    message: Message,
    max_payload_bytes: usize,
) -> Result<Option<String>, ErrorShape> {
    match message {
        Message::Text(text) => {
            if text.len() > max_payload_bytes {
                return Err(payload_too_large(text.len(), max_payload_bytes));
            }
            Ok(Some(text.to_string()))
        }
        Message::Binary(bytes) => {
            if bytes.len() > max_payload_bytes {
                return Err(payload_too_large(bytes.len(), max_payload_bytes));
            }
            let text = String::from_utf8(bytes.to_vec()).map_err(|_| {
                ErrorShape::new(
                    ERROR_INVALID_REQUEST,
                    "binary websocket frames must contain UTF-8",
                )
            })?;
            Ok(Some(text))
        }
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => Ok(None),
    }
}

fn payload_too_large(len: usize, max_payload_bytes: usize) -> ErrorShape {
    ErrorShape::new(
        ERROR_INVALID_REQUEST,
        format!("payload exceeds maxPayload ({len} > {max_payload_bytes})"),
    )
}

fn extract_frame_id(text: &str) -> Option<String> {
    let value = serde_json::from_str::<Value>(text).ok()?;
    let id = value.get("id")?.as_str()?;
    let trimmed = id.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}
