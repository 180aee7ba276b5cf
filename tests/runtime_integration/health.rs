use netboot_controller::application::config::AuthMode;
use serde_json::Value;

use super::support::{spawn_server, spawn_server_with};

#[tokio::test]
async fn healthz_endpoint_returns_ok_payload() {
    let server = spawn_server(AuthMode::None).await;

    let response = reqwest::get(format!("http://{}/healthz", server.addr))
        .await
        .expect("healthz endpoint should respond");

    assert!(response.status().is_success());

    let payload: Value = response.json().await.expect("healthz should return json");
    assert_eq!(payload["ok"], true);
    assert_eq!(payload["controllers"], 0);
    assert_eq!(payload["queuedCommands"], 0);

    server.stop().await;
}

#[tokio::test]
async fn info_endpoint_lists_methods_and_module_versions() {
    let server = spawn_server_with(AuthMode::None, |config| {
        config.controller_id = Some("0000000A0000000B".to_owned());
        config
            .module_versions
            .insert("wifi".to_owned(), "0.9".to_owned());
    })
    .await;

    let payload: Value = reqwest::get(format!("http://{}/info", server.addr))
        .await
        .expect("info endpoint should respond")
        .json()
        .await
        .expect("info should return json");

    assert_eq!(payload["name"], "netboot-controller");
    assert_eq!(payload["controllerId"], "0000000A0000000B");
    assert_eq!(payload["moduleVersions"]["wifi"], "0.9");
    assert_eq!(payload["moduleVersions"]["netboot"], "test");
    let methods = payload["methods"].as_array().expect("methods array");
    assert!(methods.iter().any(|method| method == "netboot.command_set"));
    let events = payload["events"].as_array().expect("events array");
    assert_eq!(events.len(), 5);

    server.stop().await;
}
