use futures::{SinkExt, StreamExt};
use log::{debug, info};
use std::sync::Arc;
use warp::ws::{Message, WebSocket};

use crate::config::AppState;

/// Runs one live-update session: every item stored for `user_id` is written
/// to the socket as a JSON text frame until either side goes away.
pub async fn handle_subscription(socket: WebSocket, user_id: i64, app_state: Arc<AppState>) {
    let (connection_id, mut updates) = app_state.subscriptions.subscribe(user_id);
    info!(
        "Subscriber {} joined live updates for user {}",
        connection_id, user_id
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    let forward = async {
        while let Some(payload) = updates.recv().await {
            if let Err(e) = ws_tx.send(Message::text(payload)).await {
                debug!("Send to subscriber {} failed: {}", connection_id, e);
                break;
            }
        }
    };

    // Inbound frames carry nothing; reading them only detects the close.
    let drain = async {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(msg) if msg.is_close() => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("Subscriber {} socket error: {}", connection_id, e);
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = forward => {},
        _ = drain => {},
    }

    if let Err(e) = ws_tx.close().await {
        debug!("Closing subscriber {} socket failed: {}", connection_id, e);
    }

    app_state.subscriptions.unsubscribe(user_id, connection_id);
    info!(
        "Subscriber {} left live updates for user {}",
        connection_id, user_id
    );
}
