use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::{app::AppState, protocol::ServerEvent, session::Session};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let mut session = Session::open(&state, events_tx);
    let session_id = session.id();

    // Pipeline stages never touch the socket; they push events here.
    let writer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(session = %session_id, "Failed to encode event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                debug!(session = %session_id, "Client stopped reading");
                break;
            }
        }
        let _ = sender.close().await;
    });

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => session.handle_text_frame(text.as_str()).await,
            Ok(Message::Binary(data)) => {
                session.handle_audio(data.to_vec()).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(session = %session_id, "WebSocket receive error: {}", e);
                break;
            }
        }
    }

    session.close().await;
    // the writer finishes once the last event sender is gone
    let _ = writer.await;
}
