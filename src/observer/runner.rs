use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use super::{BusClient, BusError, Notification, cooldown::Cooldown, replay::Replayer};

/// A live bus connection: request access plus its notification stream.
pub type Connection = (Arc<dyn BusClient>, mpsc::UnboundedReceiver<Notification>);

/// Why [`run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Shutdown,
    StreamClosed,
}

/// Delays between reconnect attempts, doubled after each failure.
#[derive(Debug, Clone, Copy)]
pub struct Reconnect {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Reconnect {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Feeds notifications to the replayer until the stream ends or `shutdown`
/// fires, then waits for replays already in flight.
///
/// Every notification is handled in its own task, so devices are replayed
/// concurrently while each replay stays sequential.
pub async fn run(
    replayer: Replayer,
    mut notifications: mpsc::UnboundedReceiver<Notification>,
    shutdown: CancellationToken,
) -> RunEnd {
    let tracker = TaskTracker::new();

    let end = loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                info!("observer shutting down");
                break RunEnd::Shutdown;
            }
            next = notifications.recv() => {
                let Some(notification) = next else {
                    warn!("notification stream closed");
                    break RunEnd::StreamClosed;
                };
                let replayer = replayer.clone();
                tracker.spawn(async move {
                    let outcome = replayer.handle(&notification).await;
                    debug!("{} handled: {outcome:?}", notification.controller_id);
                });
            }
        }
    };

    tracker.close();
    tracker.wait().await;
    end
}

/// Keeps the observer attached to the bus until `shutdown` fires.
///
/// Lost connections and failed connect attempts are retried with exponential
/// backoff. A handshake rejected by the controller is returned as an error.
/// The cooldown is shared across connections.
pub async fn supervise<C, F>(
    mut connect: C,
    host_controller_id: String,
    cooldown: Cooldown,
    reconnect: Reconnect,
    shutdown: CancellationToken,
) -> Result<(), BusError>
where
    C: FnMut() -> F,
    F: Future<Output = Result<Connection, BusError>>,
{
    let mut delay = reconnect.initial_delay;
    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }
        match connect().await {
            Ok((bus, notifications)) => {
                delay = reconnect.initial_delay;
                let replayer = Replayer::new(bus, host_controller_id.clone(), cooldown.clone());
                if run(replayer, notifications, shutdown.clone()).await == RunEnd::Shutdown {
                    return Ok(());
                }
                warn!("bus connection lost, reconnecting in {delay:?}");
            }
            Err(error @ BusError::Remote { .. }) => return Err(error),
            Err(error) => warn!("{error}, retrying in {delay:?}"),
        }

        tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            () = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(reconnect.max_delay);
    }
}
