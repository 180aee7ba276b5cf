use std::{
    collections::VecDeque,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use netboot_controller::{
    application::{
        config::{AuthMode, RuntimeConfig},
        startup,
    },
    protocol::PROTOCOL_VERSION,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle, time::timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub(crate) const INCOMING: &str = "0000000D300002AF";
pub(crate) const ACCEPTED: &str = "0000000D30000299";
pub(crate) const TRANSFERING: &str = "0000000D3000028E";

pub(crate) struct ServerHandle {
    pub(crate) addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
    _temp_dir: TempDir,
}

impl ServerHandle {
    pub(crate) async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = self.join.await;
    }
}

pub(crate) async fn spawn_server(auth_mode: AuthMode) -> ServerHandle {
    spawn_server_with(auth_mode, |_: &mut RuntimeConfig| {}).await
}

pub(crate) async fn spawn_server_with(
    auth_mode: AuthMode,
    configure: impl FnOnce(&mut RuntimeConfig),
) -> ServerHandle {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("listener should bind");
    let addr = listener
        .local_addr()
        .expect("listener should expose local addr");

    let temp_dir = tempfile::tempdir().expect("temp dir should be created");
    let db_path = temp_dir.path().join("netboot.db");

    let mut config = RuntimeConfig::for_test(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port(), db_path);
    config.auth_mode = auth_mode;
    configure(&mut config);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let join = tokio::spawn(async move {
        let _ = startup::run_with_listener(listener, config, async {
            let _ = shutdown_rx.await;
        })
        .await;
    });

    ServerHandle {
        addr,
        shutdown: Some(shutdown_tx),
        join,
        _temp_dir: temp_dir,
    }
}

pub(crate) async fn connect_gateway(addr: SocketAddr) -> WsStream {
    let (socket, _) = connect_async(format!("ws://{addr}/"))
        .await
        .expect("websocket should connect");
    socket
}

pub(crate) fn connect_frame(
    auth: Option<Value>,
    min_protocol: u32,
    max_protocol: u32,
    role: &str,
    client_id: &str,
    scopes: &[&str],
) -> Value {
    let mut frame = json!({
        "type": "req",
        "id": "connect-1",
        "method": "connect",
        "params": {
            "minProtocol": min_protocol,
            "maxProtocol": max_protocol,
            "client": {
                "id": client_id,
                "displayName": format!("Netboot Test {client_id}"),
                "version": "0.0.1"
            },
            "role": role,
            "scopes": scopes
        }
    });
    if let Some(auth) = auth {
        frame["params"]["auth"] = auth;
    }
    frame
}

pub(crate) async fn send_json(ws: &mut WsStream, value: &Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("frame should send");
}

pub(crate) async fn recv_json(ws: &mut WsStream) -> Value {
    let next = timeout(Duration::from_secs(10), async {
        while let Some(next) = ws.next().await {
            let message = next.expect("websocket stream should remain valid");
            match message {
                Message::Text(text) => {
                    return serde_json::from_str(text.as_ref()).expect("json payload expected");
                }
                Message::Binary(bytes) => {
                    return serde_json::from_slice(bytes.as_ref()).expect("json payload expected");
                }
                Message::Ping(payload) => {
                    ws.send(Message::Pong(payload))
                        .await
                        .expect("pong should send");
                }
                Message::Pong(_) | Message::Frame(_) => {}
                Message::Close(_) => panic!("websocket closed before payload"),
            }
        }
        panic!("websocket ended unexpectedly");
    })
    .await;
    next.expect("frame should arrive in time")
}

/// Handshaken gateway connection that sets event frames aside while waiting
/// for responses.
pub(crate) struct TestClient {
    ws: WsStream,
    events: VecDeque<Value>,
}

impl TestClient {
    pub(crate) async fn connect(addr: SocketAddr) -> Self {
        Self::connect_with(addr, None, &[]).await
    }

    pub(crate) async fn connect_with(
        addr: SocketAddr,
        auth: Option<Value>,
        scopes: &[&str],
    ) -> Self {
        let mut ws = connect_gateway(addr).await;
        send_json(
            &mut ws,
            &connect_frame(auth, 1, PROTOCOL_VERSION, "operator", "netboot-test", scopes),
        )
        .await;
        let hello = recv_json(&mut ws).await;
        assert_eq!(hello["ok"], true, "handshake failed: {hello}");

        Self {
            ws,
            events: VecDeque::new(),
        }
    }

    pub(crate) async fn request(&mut self, frame: Value) -> Value {
        let id = frame["id"].clone();
        send_json(&mut self.ws, &frame).await;
        loop {
            let next = recv_json(&mut self.ws).await;
            if next["type"] == "event" {
                self.events.push_back(next);
                continue;
            }
            assert_eq!(next["id"], id);
            return next;
        }
    }

    pub(crate) async fn rpc_req(&mut self, id: &str, method: &str, params: Option<Value>) -> Value {
        let mut request = json!({
            "type": "req",
            "id": id,
            "method": method,
        });
        if let Some(params) = params {
            request["params"] = params;
        }
        self.request(request).await
    }

    /// Payload of a successful call; panics on an error response.
    pub(crate) async fn call(&mut self, method: &str, params: Value) -> Value {
        let response = self.rpc_req(method, method, Some(params)).await;
        assert_eq!(response["ok"], true, "{method} failed: {response}");
        response["payload"].clone()
    }

    pub(crate) async fn recv_event(&mut self) -> Value {
        if let Some(event) = self.events.pop_front() {
            return event;
        }
        loop {
            let next = recv_json(&mut self.ws).await;
            if next["type"] == "event" {
                return next;
            }
        }
    }

    /// Skips events until one named `name` arrives.
    pub(crate) async fn recv_event_named(&mut self, name: &str) -> Value {
        loop {
            let event = self.recv_event().await;
            if event["event"] == name {
                return event;
            }
        }
    }
}
