use netboot_controller::application::config::AuthMode;
use serde_json::json;

use super::support::{
    ACCEPTED, INCOMING, TRANSFERING, TestClient, spawn_server, spawn_server_with,
};

#[tokio::test]
async fn device_trust_changes_are_broadcast() {
    let server = spawn_server_with(AuthMode::None, |config| {
        config.controller_id = Some("0000000A0000000B".to_owned());
    })
    .await;
    let mut operator = TestClient::connect(server.addr).await;
    let mut watcher = TestClient::connect(server.addr).await;

    let accepted = operator.call("netboot.accept", json!({ "id": INCOMING })).await;
    assert_eq!(accepted, json!({ "result": true }));

    let event = watcher.recv_event().await;
    assert_eq!(event["event"], "netboot.accept");
    assert_eq!(event["controllerId"], "0000000A0000000B");
    assert_eq!(event["payload"], json!({ "id": INCOMING }));

    let revoked = operator.call("netboot.revoke", json!({ "serial": ACCEPTED })).await;
    assert_eq!(revoked, json!({ "result": true }));
    let event = watcher.recv_event_named("netboot.revoke").await;
    assert_eq!(event["payload"], json!({ "id": ACCEPTED }));

    let listed = operator.call("netboot.list", json!({})).await;
    let devices = listed["devices"].as_array().expect("devices array");
    assert!(devices.contains(&json!({ "id": INCOMING, "state": "accepted" })));
    assert!(devices.contains(&json!({ "id": ACCEPTED, "state": "incoming" })));
    assert!(devices.contains(&json!({ "id": TRANSFERING, "state": "transfering" })));

    server.stop().await;
}

#[tokio::test]
async fn transfering_devices_cannot_change_trust() {
    let server = spawn_server(AuthMode::None).await;
    let mut client = TestClient::connect(server.addr).await;

    for method in ["netboot.accept", "netboot.revoke"] {
        let response = client.call(method, json!({ "id": TRANSFERING })).await;
        assert_eq!(response, json!({ "result": false }));
    }
    let unknown = client
        .call("netboot.accept", json!({ "id": "0000000D30000312" }))
        .await;
    assert_eq!(unknown, json!({ "result": false }));

    server.stop().await;
}

#[tokio::test]
async fn command_queue_lifecycle_round_trip() {
    let server = spawn_server(AuthMode::None).await;
    let mut operator = TestClient::connect(server.addr).await;
    let mut watcher = TestClient::connect(server.addr).await;

    let set = operator
        .call(
            "netboot.command_set",
            json!({
                "controller_id": ACCEPTED,
                "command": { "module": "time", "action": "update_settings", "data": { "ntp": true } }
            }),
        )
        .await;
    assert_eq!(set, json!({ "result": true }));

    let event = watcher.recv_event().await;
    assert_eq!(event["event"], "netboot.command_set");
    assert_eq!(event["payload"]["controller_id"], ACCEPTED);
    assert_eq!(event["payload"]["command"]["data"], json!({ "ntp": true }));
    assert_eq!(event["payload"]["command"]["module_version"], "?");

    let logged = operator
        .call(
            "netboot.command_log",
            json!({
                "controller_id": ACCEPTED,
                "batch_id": "batch-1",
                "record": { "module": "time", "action": "update_settings", "result": true }
            }),
        )
        .await;
    assert_eq!(logged, json!({ "result": true }));
    let event = watcher.recv_event_named("netboot.command_log").await;
    assert_eq!(event["payload"]["batch_id"], "batch-1");
    assert!(event["payload"]["record"]["when_stored"].is_string());

    let listed = operator.call("netboot.commands_list", json!({})).await;
    let controller = &listed["controllers"][0];
    assert_eq!(controller["controller_id"], ACCEPTED);
    assert_eq!(controller["commands"][0]["module"], "time");
    assert_eq!(controller["commands"][0]["data"], json!({ "ntp": true }));
    assert!(controller["commands"][0]["stored_time"].is_string());
    assert_eq!(controller["logs"][0]["batch_id"], "batch-1");
    assert_eq!(controller["logs"][0]["records"][0]["result"], true);

    let unset = operator
        .call(
            "netboot.command_unset",
            json!({ "controller_id": ACCEPTED, "module": "time", "action": "update_settings" }),
        )
        .await;
    assert_eq!(unset, json!({ "result": true }));
    let event = watcher.recv_event_named("netboot.command_unset").await;
    assert_eq!(event["payload"]["module"], "time");

    let listed = operator.call("netboot.commands_list", json!({})).await;
    assert_eq!(listed["controllers"][0]["commands"], json!([]));

    server.stop().await;
}

#[tokio::test]
async fn queue_changes_for_untrusted_devices_are_refused() {
    let server = spawn_server(AuthMode::None).await;
    let mut client = TestClient::connect(server.addr).await;

    for controller_id in [INCOMING, TRANSFERING, "C2"] {
        let set = client
            .call(
                "netboot.command_set",
                json!({
                    "controller_id": controller_id,
                    "command": { "module": "m", "action": "a" }
                }),
            )
            .await;
        assert_eq!(set, json!({ "result": false }));
    }

    let listed = client.call("netboot.commands_list", json!({})).await;
    assert_eq!(listed["controllers"], json!([]));

    let health = client.call("health", json!({})).await;
    assert_eq!(health["queuedCommands"], 0);

    server.stop().await;
}

#[tokio::test]
async fn accept_status_rejects_unknown_tasks() {
    let server = spawn_server(AuthMode::None).await;
    let mut client = TestClient::connect(server.addr).await;

    let response = client
        .rpc_req(
            "s-1",
            "netboot.accept_status",
            Some(json!({ "task_id": "missing" })),
        )
        .await;
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"]["message"], "unknown task_id: missing");

    server.stop().await;
}
