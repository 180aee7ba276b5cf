use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::{
    sync::{Mutex, mpsc, oneshot},
    time::timeout,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use crate::{
    observer::{BusClient, BusError, Notification, config::Credentials},
    protocol::{
        ConnectAuth, ConnectClient, ConnectParams, EventFrame, PROTOCOL_VERSION, RequestFrame,
        ResponseFrame,
    },
};

const CONNECT_REQUEST_ID: &str = "connect";

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<ResponseFrame>>>>;

#[derive(Debug, Clone)]
pub struct BusOptions {
    pub url: String,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub timeout: Duration,
}

/// Bus client speaking the gateway frame protocol over a WebSocket.
///
/// Requests are correlated with responses by frame id. Event frames that name
/// their controller are forwarded as notifications.
pub struct WsBusClient {
    outgoing: mpsc::UnboundedSender<String>,
    pending: PendingMap,
    timeout: Duration,
}

impl WsBusClient {
    pub async fn connect(
        options: BusOptions,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Notification>), BusError> {
        let (socket, _) = timeout(options.timeout, connect_async(options.url.as_str()))
            .await
            .map_err(|_| BusError::Timeout(CONNECT_REQUEST_ID.to_owned()))?
            .map_err(|error| BusError::Connect(format!("{}: {error}", options.url)))?;
        let (mut sink, mut stream) = socket.split();

        let hello = serde_json::to_string(&connect_request(&options))
            .map_err(|error| BusError::Protocol(error.to_string()))?;
        sink.send(Message::Text(hello.into()))
            .await
            .map_err(|error| BusError::Connect(error.to_string()))?;

        let response = timeout(options.timeout, next_response(&mut stream))
            .await
            .map_err(|_| BusError::Timeout(CONNECT_REQUEST_ID.to_owned()))??;
        response_result(response)?;
        debug!("connected to bus {}", options.url);

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if let Err(error) = sink.send(Message::Text(text.into())).await {
                    warn!("bus write failed: {error}");
                    break;
                }
            }
        });

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (notifications_tx, notifications) = mpsc::unbounded_channel();
        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(next) = stream.next().await {
                let text = match next {
                    Ok(Message::Text(text)) => text.as_str().to_owned(),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(error) => {
                        warn!("bus read failed: {error}");
                        break;
                    }
                };
                route_frame(&text, &reader_pending, &notifications_tx).await;
            }
            // Dropping the senders wakes every waiting request with `Closed`.
            reader_pending.lock().await.clear();
            debug!("bus connection closed");
        });

        Ok((
            Self {
                outgoing,
                pending,
                timeout: options.timeout,
            },
            notifications,
        ))
    }
}

#[async_trait]
impl BusClient for WsBusClient {
    async fn send(
        &self,
        controller_id: &str,
        module: &str,
        action: &str,
        data: Option<Value>,
    ) -> Result<Value, BusError> {
        let id = uuid::Uuid::new_v4().to_string();
        let method = format!("{module}.{action}");
        let frame = RequestFrame {
            frame_type: "req".to_owned(),
            id: id.clone(),
            method: method.clone(),
            params: data,
            controller_id: Some(controller_id.to_owned()),
        };
        let text =
            serde_json::to_string(&frame).map_err(|error| BusError::Protocol(error.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), reply_tx);
        if self.outgoing.send(text).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(BusError::Closed);
        }

        match timeout(self.timeout, reply_rx).await {
            Ok(Ok(response)) => response_result(response),
            Ok(Err(_)) => Err(BusError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(BusError::Timeout(format!("{method} to {controller_id}")))
            }
        }
    }
}

fn connect_request(options: &BusOptions) -> RequestFrame {
    let auth = options.credentials.as_ref().map(|credentials| ConnectAuth {
        username: Some(credentials.username.clone()),
        token: Some(credentials.password.clone()),
        password: Some(credentials.password.clone()),
    });
    let params = ConnectParams {
        min_protocol: PROTOCOL_VERSION,
        max_protocol: PROTOCOL_VERSION,
        client: ConnectClient {
            id: options.client_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            display_name: Some("netboot observer".to_owned()),
        },
        role: Some("operator".to_owned()),
        scopes: Vec::new(),
        auth,
    };

    RequestFrame {
        frame_type: "req".to_owned(),
        id: CONNECT_REQUEST_ID.to_owned(),
        method: "connect".to_owned(),
        params: serde_json::to_value(params).ok(),
        controller_id: None,
    }
}

async fn next_response<S>(stream: &mut S) -> Result<ResponseFrame, BusError>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(next) = stream.next().await {
        let message = next.map_err(|error| BusError::Connect(error.to_string()))?;
        let Message::Text(text) = message else {
            continue;
        };
        match serde_json::from_str::<ResponseFrame>(text.as_str()) {
            Ok(response) if response.frame_type == "res" => return Ok(response),
            _ => {}
        }
    }
    Err(BusError::Closed)
}

async fn route_frame(
    text: &str,
    pending: &PendingMap,
    notifications: &mpsc::UnboundedSender<Notification>,
) {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        warn!("ignoring malformed bus frame");
        return;
    };

    match value.get("type").and_then(Value::as_str) {
        Some("res") => {
            let Ok(response) = serde_json::from_value::<ResponseFrame>(value) else {
                warn!("ignoring malformed bus response");
                return;
            };
            if let Some(waiter) = pending.lock().await.remove(&response.id) {
                let _ = waiter.send(response);
            }
        }
        Some("event") => {
            let Ok(event) = serde_json::from_value::<EventFrame>(value) else {
                warn!("ignoring malformed bus event");
                return;
            };
            let Some(controller_id) = event.controller_id.as_deref() else {
                return;
            };
            if let Some(notification) =
                Notification::from_event(controller_id, &event.event, event.payload)
            {
                let _ = notifications.send(notification);
            }
        }
        _ => {}
    }
}

fn response_result(response: ResponseFrame) -> Result<Value, BusError> {
    if response.ok {
        return Ok(response.payload.unwrap_or_default());
    }
    match response.error {
        Some(error) => Err(BusError::Remote {
            code: error.code,
            message: error.message,
        }),
        None => Err(BusError::Protocol(format!(
            "response {} failed without error",
            response.id
        ))),
    }
}
