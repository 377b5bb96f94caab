//! WebSocket streaming of bus events.
//!
//! Every frame is a JSON text message. The first frame is a snapshot of the
//! entity, then one frame per event. The server pings every 30 seconds and
//! drops clients that left the previous ping unanswered.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::events::{EventKind, RecvError, Subscription};

/// Interval between server pings.
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Normal closure.
const CLOSE_NORMAL: u16 = 1000;

/// Snapshot frame sent before any event.
#[derive(Serialize)]
struct SnapshotFrame<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: &'a T,
}

/// Kinds after which nothing more is published for the entity.
fn is_final(kind: EventKind) -> bool {
    matches!(
        kind,
        EventKind::Complete | EventKind::Error | EventKind::BatchComplete | EventKind::BatchCancelled
    )
}

/// Stream `subscription` to `socket`, preceded by `snapshot`.
///
/// The subscription is taken before the upgrade so no event published in
/// between is lost; it is dropped, and the bus channel released, on return.
pub(super) async fn stream_events<T: Serialize + Send + Sync>(
    socket: WebSocket,
    snapshot: T,
    mut subscription: Subscription,
) {
    let id = subscription.id().to_string();
    let (mut sender, mut receiver) = socket.split();

    let frame = SnapshotFrame {
        kind: "snapshot",
        data: &snapshot,
    };
    match serde_json::to_string(&frame) {
        Ok(text) => {
            if sender.send(Message::Text(text.into())).await.is_err() {
                debug!(id = %id, "Client went away before the snapshot");
                return;
            }
        }
        Err(e) => warn!(id = %id, error = %e, "Failed to serialize snapshot"),
    }

    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
    // The first tick completes immediately.
    heartbeat_interval.tick().await;
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                    Some(Err(e)) => {
                        debug!(id = %id, "WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            event = subscription.recv() => {
                match event {
                    Ok(event) => {
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(topic = %event.topic, error = %e, "Failed to serialize event");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                        if is_final(event.kind()) {
                            let _ = sender
                                .send(Message::Close(Some(CloseFrame {
                                    code: CLOSE_NORMAL,
                                    reason: Utf8Bytes::from_static(event.kind().as_str()),
                                })))
                                .await;
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(id = %id, "Event stream lagged by {} events", n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            _ = heartbeat_interval.tick() => {
                if awaiting_pong {
                    debug!(id = %id, "Client failed to respond to Ping, closing connection");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }
        }
    }

    debug!(id = %id, "Event stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_kinds() {
        assert!(is_final(EventKind::BatchComplete));
        assert!(is_final(EventKind::BatchCancelled));
        assert!(is_final(EventKind::Complete));
        assert!(!is_final(EventKind::BatchVideoComplete));
        assert!(!is_final(EventKind::Progress));
    }

    #[test]
    fn test_snapshot_frame_shape() {
        let frame = SnapshotFrame {
            kind: "snapshot",
            data: &serde_json::json!({"id": "b"}),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["data"]["id"], "b");
    }
}
