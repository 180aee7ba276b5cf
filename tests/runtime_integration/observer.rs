use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use netboot_controller::{
    application::config::AuthMode,
    interfaces::bus_client::{BusOptions, WsBusClient},
    observer::{
        BusClient, BusError, Notification,
        config::Credentials,
        cooldown::Cooldown,
        replay::{ReplayOutcome, Replayer},
        runner::{self, Reconnect},
    },
};
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::Mutex, time::timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::support::{ACCEPTED, TestClient, spawn_server_with};

const HOST: &str = "0000000A0000000B";

fn options(addr: std::net::SocketAddr, credentials: Option<Credentials>) -> BusOptions {
    BusOptions {
        url: format!("ws://{addr}/ws"),
        client_id: "netboot-observer-test".to_owned(),
        credentials,
        timeout: Duration::from_secs(5),
    }
}

/// Routes host calls to the gateway and answers device calls locally.
struct SplitBus {
    host: WsBusClient,
    device_calls: Mutex<Vec<String>>,
}

#[async_trait]
impl BusClient for SplitBus {
    async fn send(
        &self,
        controller_id: &str,
        module: &str,
        action: &str,
        data: Option<Value>,
    ) -> Result<Value, BusError> {
        if controller_id == HOST {
            return self.host.send(controller_id, module, action, data).await;
        }
        self.device_calls
            .lock()
            .await
            .push(format!("{module}.{action}"));
        if module == "wifi" {
            return Ok(json!({ "result": false }));
        }
        Ok(json!({ "result": true }))
    }
}

#[tokio::test]
async fn bus_client_calls_the_host_and_receives_notifications() {
    let server = spawn_server_with(AuthMode::Password("s3cret".to_owned()), |config| {
        config.controller_id = Some(HOST.to_owned());
    })
    .await;

    let credentials = Credentials {
        username: "observer".to_owned(),
        password: "s3cret".to_owned(),
    };
    let (bus, mut notifications) = WsBusClient::connect(options(server.addr, Some(credentials)))
        .await
        .expect("bus should connect");

    let listed = bus
        .send(HOST, "netboot", "list", None)
        .await
        .expect("host answers");
    assert_eq!(listed["devices"].as_array().map(Vec::len), Some(3));

    let remote = bus.send(ACCEPTED, "netboot", "list", None).await;
    assert!(matches!(remote, Err(BusError::Remote { ref code, .. }) if code == "NOT_LINKED"));

    bus.send(
        HOST,
        "netboot",
        "command_set",
        Some(json!({
            "controller_id": ACCEPTED,
            "command": { "module": "wifi", "action": "reset" }
        })),
    )
    .await
    .expect("command_set answers");

    let notification = timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("notification should arrive")
        .expect("stream open");
    assert_eq!(notification.controller_id, HOST);
    assert_eq!(notification.module, "netboot");
    assert_eq!(notification.action, "command_set");
    assert_eq!(notification.data["command"]["module"], "wifi");

    server.stop().await;
}

#[tokio::test]
async fn bus_client_reports_rejected_credentials() {
    let server = spawn_server_with(AuthMode::Password("s3cret".to_owned()), |_| {}).await;

    let result = WsBusClient::connect(options(server.addr, None)).await;
    assert!(matches!(result, Err(BusError::Remote { .. })));

    server.stop().await;
}

#[tokio::test]
async fn replay_logs_results_on_the_host() {
    let server = spawn_server_with(AuthMode::None, |config| {
        config.controller_id = Some(HOST.to_owned());
    })
    .await;
    let mut operator = TestClient::connect(server.addr).await;
    for (module, action) in [("time", "update_settings"), ("wifi", "reset")] {
        operator
            .call(
                "netboot.command_set",
                json!({
                    "controller_id": ACCEPTED,
                    "command": { "module": module, "action": action }
                }),
            )
            .await;
    }

    let (host, _notifications) = WsBusClient::connect(options(server.addr, None))
        .await
        .expect("bus should connect");
    let bus = Arc::new(SplitBus {
        host,
        device_calls: Mutex::new(Vec::new()),
    });
    let replayer = Replayer::new(bus.clone(), HOST.to_owned(), Cooldown::default());

    let outcome = replayer
        .handle(&Notification {
            controller_id: ACCEPTED.to_owned(),
            module: "remote".to_owned(),
            action: "advertize".to_owned(),
            data: json!({ "netboot": "booted" }),
        })
        .await;
    let batch_id = match outcome {
        ReplayOutcome::Replayed { batch_id, commands } => {
            let results: Vec<bool> = commands.iter().map(|command| command.result).collect();
            assert_eq!(results, vec![true, false]);
            batch_id
        }
        other => panic!("expected replay, got {other:?}"),
    };

    assert_eq!(
        *bus.device_calls.lock().await,
        vec![
            "time.update_settings".to_owned(),
            "wifi.reset".to_owned(),
            "remote.set_netboot_configured".to_owned(),
        ]
    );

    let listed = operator.call("netboot.commands_list", json!({})).await;
    let logs = &listed["controllers"][0]["logs"];
    assert_eq!(logs.as_array().map(Vec::len), Some(1));
    assert_eq!(logs[0]["batch_id"], batch_id);
    assert_eq!(logs[0]["records"][0]["result"], true);
    assert_eq!(logs[0]["records"][1]["result"], false);

    server.stop().await;
}

/// Bus endpoint that answers the handshake and then hangs up.
async fn spawn_hangup_bus() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener addr");
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let _ = ws.next().await;
                let hello = json!({ "type": "res", "id": "connect", "ok": true, "payload": {} });
                let _ = ws.send(Message::Text(hello.to_string().into())).await;
                let _ = ws.close(None).await;
            });
        }
    });
    (addr, accepted)
}

#[tokio::test]
async fn notification_stream_ends_when_the_bus_hangs_up() {
    let (addr, _) = spawn_hangup_bus().await;

    let (_bus, mut notifications) = WsBusClient::connect(options(addr, None))
        .await
        .expect("bus should connect");
    let next = timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("stream should close");
    assert!(next.is_none());
}

#[tokio::test]
async fn observer_reconnects_after_the_bus_hangs_up() {
    let (addr, accepted) = spawn_hangup_bus().await;
    let shutdown = CancellationToken::new();

    let supervisor = tokio::spawn(runner::supervise(
        move || async move {
            let (bus, notifications) = WsBusClient::connect(options(addr, None)).await?;
            let bus: Arc<dyn BusClient> = Arc::new(bus);
            Ok::<_, BusError>((bus, notifications))
        },
        HOST.to_owned(),
        Cooldown::default(),
        Reconnect {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        },
        shutdown.clone(),
    ));

    timeout(Duration::from_secs(5), async {
        while accepted.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("observer should keep reconnecting");

    shutdown.cancel();
    let result = timeout(Duration::from_secs(5), supervisor)
        .await
        .expect("observer should stop")
        .expect("observer task should not panic");
    assert!(result.is_ok());
}
