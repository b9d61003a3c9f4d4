use crate::hub::{BroadcastHub, SensorEvent, Subscription};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{Sink, SinkExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

/// Shared application state for WebSocket handler
#[derive(Clone)]
pub struct WsAppState {
    pub hub: BroadcastHub,
    /// Interval between server pings
    pub heartbeat: Duration,
}

/// GET /ws - WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<WsAppState>>) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Create WebSocket router
pub fn create_ws_router(state: Arc<WsAppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Handle WebSocket connection lifecycle
async fn handle_socket(mut socket: WebSocket, state: Arc<WsAppState>) {
    let mut subscription = state.hub.register();
    let viewer_id = subscription.id();
    info!(viewer_id, "WebSocket connection established");

    // Also bounds every send, so a stalled peer cannot pin this task
    let limit = state.heartbeat;
    let mut heartbeat = interval_at(Instant::now() + limit, limit);

    loop {
        tokio::select! {
            event = subscription.recv() => {
                match event {
                    Some(event) => {
                        if let Err(e) = send_event(&mut socket, &event, limit).await {
                            debug!(viewer_id, error = %e, "Failed to send event");
                            break;
                        }
                    }
                    None => {
                        warn!(viewer_id, "Viewer dropped by hub");
                        break;
                    }
                }
            }

            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.trim() == "ping" {
                            let pong = serde_json::json!({ "type": "pong" }).to_string();
                            let pong = Message::Text(pong);
                            if let Err(e) = send_within(&mut socket, pong, limit).await {
                                error!(viewer_id, error = %e, "Failed to send pong");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = send_within(&mut socket, Message::Pong(data), limit).await {
                            error!(viewer_id, error = %e, "Failed to send pong");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(viewer_id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ignore binary, pong messages
                    }
                    Some(Err(e)) => {
                        warn!(viewer_id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                let ping = Message::Ping(Vec::new());
                if let Err(e) = send_within(&mut socket, ping, limit).await {
                    debug!(viewer_id, error = %e, "Heartbeat failed");
                    break;
                }
            }
        }
    }

    close_viewer(&state.hub, subscription);
}

async fn send_event(
    socket: &mut WebSocket,
    event: &SensorEvent,
    limit: Duration,
) -> anyhow::Result<()> {
    let json = serde_json::to_string(event)?;
    send_within(socket, Message::Text(json), limit).await
}

/// Send one frame, giving up on a peer that stops reading.
async fn send_within<S>(sink: &mut S, msg: Message, limit: Duration) -> anyhow::Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    tokio::time::timeout(limit, sink.send(msg))
        .await
        .map_err(|_| anyhow::anyhow!("send timed out after {:?}", limit))??;
    Ok(())
}

fn close_viewer(hub: &BroadcastHub, subscription: Subscription) {
    let viewer_id = subscription.id();
    hub.unregister(subscription);
    info!(viewer_id, "WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_send_within_delivers_to_ready_peer() {
        let (mut tx, mut rx) = mpsc::channel::<Message>(4);

        send_within(&mut tx, Message::Text("hello".to_string()), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(rx.next().await, Some(Message::Text("hello".to_string())));
    }

    #[tokio::test]
    async fn test_send_within_gives_up_on_stalled_peer() {
        // Room for one frame; the next waits on a reader that never comes
        let (mut tx, _rx) = mpsc::channel::<Message>(1);
        let limit = Duration::from_millis(50);

        send_within(&mut tx, Message::Ping(Vec::new()), limit).await.unwrap();

        let started = std::time::Instant::now();
        let result = send_within(&mut tx, Message::Ping(Vec::new()), limit).await;

        assert!(result.unwrap_err().to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
