use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::engine::chat_engine::ChatEngine;
use crate::engine::error::EngineError;
use crate::engine::events::{ClientFrame, ServerFrame};
use crate::engine::user_session::CloseReason;

use super::app_state::AppState;

/// GET /ws: upgrade to a session connection.
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let engine = state.engine.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, engine))
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "failed to serialize frame");
            return Ok(());
        }
    };
    sink.send(Message::Text(text.into())).await
}

/// Error frame for closes the client did not cause by a bad frame. A slow
/// consumer's queue is full when it is evicted, so the frame is written
/// straight to the socket instead of being queued.
fn eviction_frame(reason: CloseReason) -> Option<ServerFrame> {
    match reason {
        CloseReason::SlowConsumer => Some(ServerFrame::Error {
            code: "slow_consumer".into(),
            message: "outbound queue overflowed".into(),
            field: None,
        }),
        _ => None,
    }
}

fn close_code_for(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::AuthenticationFailed => close_code::POLICY,
        CloseReason::ProtocolError => close_code::PROTOCOL,
        CloseReason::SlowConsumer => close_code::AGAIN,
        CloseReason::Shutdown => close_code::AWAY,
        CloseReason::TransportClosed | CloseReason::HeartbeatTimeout => close_code::NORMAL,
    }
}

/// Drive one connection: frames queued for the session are written out,
/// client frames are fed to the engine. Runs until either side closes.
async fn handle_socket(socket: WebSocket, engine: Arc<ChatEngine>) {
    let (session_id, mut outbound) = engine.open_session();
    let mut closed_by_registry = engine.registry().on_close(session_id);
    let (mut sink, mut stream) = socket.split();
    let mut user_id: Option<String> = None;
    debug!(%session_id, "session connected");

    let reason = loop {
        tokio::select! {
            frame = outbound.recv() => {
                // The registry drops the sender only after reporting why.
                let Some(frame) = frame else {
                    break closed_by_registry
                        .as_mut()
                        .and_then(|rx| rx.try_recv().ok())
                        .unwrap_or(CloseReason::TransportClosed);
                };
                if send_frame(&mut sink, &frame).await.is_err() {
                    break CloseReason::TransportClosed;
                }
            }
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        break CloseReason::TransportClosed;
                    }
                    // Pings are answered by the transport.
                    Some(Ok(_)) => continue,
                };

                match serde_json::from_str::<ClientFrame>(text.as_str()) {
                    Ok(ClientFrame::Authenticate { token }) => {
                        match engine.authenticate_session(session_id, &token).await {
                            Ok((uid, _)) => user_id = Some(uid),
                            Err(e) => {
                                debug!(%session_id, error = %e, "handshake failed");
                                engine.registry().send(session_id, ServerFrame::error(&e));
                                break match e {
                                    EngineError::Unauthenticated => CloseReason::AuthenticationFailed,
                                    _ => CloseReason::ProtocolError,
                                };
                            }
                        }
                    }
                    Ok(ClientFrame::Heartbeat) => match engine.heartbeat(session_id) {
                        Ok(()) => {}
                        Err(EngineError::Unauthenticated) => {
                            let err = EngineError::invalid("frame", "authenticate before sending heartbeats");
                            engine.registry().send(session_id, ServerFrame::error(&err));
                            break CloseReason::ProtocolError;
                        }
                        // Closed underneath us; the outbound branch reports why.
                        Err(_) => {}
                    },
                    Err(e) => {
                        let err = EngineError::invalid("frame", e.to_string());
                        engine.registry().send(session_id, ServerFrame::error(&err));
                        break CloseReason::ProtocolError;
                    }
                }
            }
        }
    };

    engine
        .end_session(session_id, user_id.as_deref(), reason)
        .await;

    // Flush whatever was queued before the close, e.g. a final error frame.
    while let Ok(frame) = outbound.try_recv() {
        if send_frame(&mut sink, &frame).await.is_err() {
            break;
        }
    }
    if let Some(frame) = eviction_frame(reason) {
        let _ = send_frame(&mut sink, &frame).await;
    }
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: close_code_for(reason),
            reason: reason.as_str().into(),
        })))
        .await;
    info!(%session_id, reason = reason.as_str(), "session disconnected");
}
