//! Outbound half of a live connection: queued frames plus keepalive pings.

use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Owns the sink for one connection.
///
/// Drains `queue` in order and sends a ping every `ping_period`. Keepalives
/// bypass the queue, so a backlog of application frames cannot starve them.
/// Ends with a close frame when cancelled or when every queue sender is
/// gone; a failed write ends it silently.
pub(crate) async fn outbound_pump<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<Message>,
    ping_period: Duration,
    cancel: CancellationToken,
) where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let mut keepalive = tokio::time::interval_at(Instant::now() + ping_period, ping_period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let stop = loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break "cancelled",
            queued = queue.recv() => match queued {
                Some(frame) => frame,
                None => break "queue closed",
            },
            _ = keepalive.tick() => Message::Ping(Default::default()),
        };

        if let Err(e) = sink.send(frame).await {
            warn!(error = %e, "websocket write failed");
            return;
        }
    };

    trace!(stop, "outbound pump stopping, sending close frame");
    let _ = sink.send(Message::Close(None)).await;
}
