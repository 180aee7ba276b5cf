use netboot_controller::{application::config::AuthMode, protocol::PROTOCOL_VERSION};
use serde_json::json;

use super::support::{
    ACCEPTED, TestClient, connect_frame, connect_gateway, recv_json, send_json, spawn_server,
    spawn_server_with,
};

#[tokio::test]
async fn handshake_and_health_round_trip() {
    let server = spawn_server(AuthMode::None).await;
    let mut ws = connect_gateway(server.addr).await;

    send_json(
        &mut ws,
        &connect_frame(None, 1, PROTOCOL_VERSION, "operator", "netboot-test", &[]),
    )
    .await;

    let hello = recv_json(&mut ws).await;
    assert_eq!(hello["type"], "res");
    assert_eq!(hello["id"], "connect-1");
    assert_eq!(hello["ok"], true);
    assert_eq!(hello["payload"]["type"], "hello-ok");
    assert_eq!(hello["payload"]["protocol"], PROTOCOL_VERSION);
    let methods = hello["payload"]["features"]["methods"]
        .as_array()
        .expect("methods array");
    assert!(methods.iter().any(|method| method == "netboot.list"));

    send_json(&mut ws, &json!({ "type": "req", "id": "h-1", "method": "health" })).await;
    let health = recv_json(&mut ws).await;
    assert_eq!(health["type"], "res");
    assert_eq!(health["id"], "h-1");
    assert_eq!(health["ok"], true);
    assert_eq!(health["payload"]["ok"], true);
    assert_eq!(health["payload"]["connections"], 1);

    server.stop().await;
}

#[tokio::test]
async fn handshake_rejects_protocol_mismatch() {
    let server = spawn_server(AuthMode::None).await;
    let mut ws = connect_gateway(server.addr).await;

    send_json(
        &mut ws,
        &connect_frame(
            None,
            PROTOCOL_VERSION + 1,
            PROTOCOL_VERSION + 1,
            "operator",
            "netboot-test",
            &[],
        ),
    )
    .await;

    let response = recv_json(&mut ws).await;
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"]["code"], "INVALID_REQUEST");
    assert_eq!(response["error"]["message"], "protocol mismatch");

    server.stop().await;
}

#[tokio::test]
async fn first_request_must_be_connect() {
    let server = spawn_server(AuthMode::None).await;
    let mut ws = connect_gateway(server.addr).await;

    send_json(
        &mut ws,
        &json!({ "type": "req", "id": "l-1", "method": "netboot.list" }),
    )
    .await;

    let response = recv_json(&mut ws).await;
    assert_eq!(response["id"], "l-1");
    assert_eq!(response["ok"], false);
    assert_eq!(
        response["error"]["message"],
        "invalid handshake: first request must be connect"
    );

    server.stop().await;
}

#[tokio::test]
async fn token_auth_rejects_missing_token() {
    let server = spawn_server(AuthMode::Token("top-secret".to_owned())).await;
    let mut ws = connect_gateway(server.addr).await;

    send_json(
        &mut ws,
        &connect_frame(None, 1, PROTOCOL_VERSION, "operator", "netboot-test", &[]),
    )
    .await;

    let response = recv_json(&mut ws).await;
    assert_eq!(response["ok"], false);
    assert_eq!(
        response["error"]["message"],
        "unauthorized: missing credentials"
    );

    server.stop().await;
}

#[tokio::test]
async fn password_auth_accepts_passwd_style_credentials() {
    let server = spawn_server(AuthMode::Password("s3cret".to_owned())).await;

    let mut client = TestClient::connect_with(
        server.addr,
        Some(json!({ "username": "observer", "password": "s3cret" })),
        &[],
    )
    .await;
    let listed = client.call("netboot.list", json!({})).await;
    assert_eq!(listed["devices"].as_array().map(Vec::len), Some(3));

    let mut ws = connect_gateway(server.addr).await;
    send_json(
        &mut ws,
        &connect_frame(
            Some(json!({ "username": "observer", "password": "wrong" })),
            1,
            PROTOCOL_VERSION,
            "operator",
            "netboot-test",
            &[],
        ),
    )
    .await;
    let rejected = recv_json(&mut ws).await;
    assert_eq!(rejected["ok"], false);
    assert_eq!(
        rejected["error"]["message"],
        "unauthorized: invalid credentials"
    );

    server.stop().await;
}

#[tokio::test]
async fn read_scope_cannot_change_the_queue() {
    let server = spawn_server(AuthMode::None).await;
    let mut client = TestClient::connect_with(server.addr, None, &["netboot.read"]).await;

    let listed = client.rpc_req("r-1", "netboot.commands_list", None).await;
    assert_eq!(listed["ok"], true);

    let denied = client
        .rpc_req(
            "w-1",
            "netboot.command_set",
            Some(json!({
                "controller_id": ACCEPTED,
                "command": { "module": "m", "action": "a" }
            })),
        )
        .await;
    assert_eq!(denied["ok"], false);
    assert_eq!(denied["error"]["message"], "missing scope: netboot.write");

    server.stop().await;
}

#[tokio::test]
async fn requests_for_other_controllers_are_not_linked() {
    let server = spawn_server_with(AuthMode::None, |config| {
        config.controller_id = Some("0000000A0000000B".to_owned());
    })
    .await;
    let mut client = TestClient::connect(server.addr).await;

    let remote = client
        .request(json!({
            "type": "req",
            "id": "n-1",
            "method": "netboot.list",
            "controllerId": ACCEPTED,
        }))
        .await;
    assert_eq!(remote["ok"], false);
    assert_eq!(remote["error"]["code"], "NOT_LINKED");

    let local = client
        .request(json!({
            "type": "req",
            "id": "n-2",
            "method": "netboot.list",
            "controllerId": "0000000a0000000b",
        }))
        .await;
    assert_eq!(local["ok"], true);

    server.stop().await;
}

#[tokio::test]
async fn unknown_methods_and_validation_errors_are_explicit() {
    let server = spawn_server(AuthMode::None).await;
    let mut client = TestClient::connect(server.addr).await;

    let unknown = client.rpc_req("u-1", "unknown.method", None).await;
    assert_eq!(unknown["ok"], false);
    assert_eq!(unknown["error"]["code"], "INVALID_REQUEST");

    let missing = client.rpc_req("u-2", "netboot.revoke", None).await;
    assert_eq!(missing["ok"], false);
    assert_eq!(
        missing["error"]["message"],
        "invalid netboot.revoke params: object required"
    );

    let malformed = client
        .rpc_req(
            "u-3",
            "netboot.command_log",
            Some(json!({ "controller_id": ACCEPTED, "batch_id": "b" })),
        )
        .await;
    assert_eq!(malformed["ok"], false);
    assert_eq!(malformed["error"]["code"], "INVALID_REQUEST");

    server.stop().await;
}
