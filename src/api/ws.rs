use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tracing::{debug, info, warn};

use super::AppState;
use crate::channel::{decode_host_message, encode_engine_message, ChannelError, EngineMessage};

/// GET /ws - host protocol over JSON text frames
pub async fn upgrade_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| client_loop(socket, state))
}

async fn client_loop(mut socket: WebSocket, state: AppState) {
    let mut subscription = state.hub.subscribe();
    info!(clients = state.hub.client_count(), "websocket client connected");

    loop {
        tokio::select! {
            frame = subscription.recv() => {
                let Some(frame) = frame else {
                    break;
                };

                if socket.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            message = socket.recv() => {
                let Some(Ok(message)) = message else {
                    break;
                };

                match message {
                    Message::Text(text) => {
                        let forwarded = decode_host_message(&text)
                            .and_then(|msg| state.session.send(msg));
                        match forwarded {
                            Ok(()) => {}
                            Err(ChannelError::Closed) => {
                                warn!("session closed; dropping websocket client");
                                break;
                            }
                            Err(err) => {
                                warn!(error = %err, "invalid host message dropped");
                                let reply = EngineMessage::warn(format!("Message dropped: {err}"));
                                if reply_to(&mut socket, &reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Message::Binary(_) => {
                        let reply = EngineMessage::warn("Binary frames are not supported");
                        if reply_to(&mut socket, &reply).await.is_err() {
                            break;
                        }
                    }
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }
        }
    }

    debug!("websocket client disconnected");
}

async fn reply_to(socket: &mut WebSocket, message: &EngineMessage) -> Result<(), axum::Error> {
    match encode_engine_message(message) {
        Ok(text) => socket.send(Message::Text(text)).await,
        Err(err) => {
            warn!(error = %err, "failed to encode reply");
            Ok(())
        }
    }
}
