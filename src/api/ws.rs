//! WebSocket transport. One actor per connection: a writer task owns the
//! sink and drains the connection's outbound channel, while the read loop
//! feeds frames to a `ConnectionHandler`.

use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response as HttpResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use uuid::Uuid;

use crate::api::handler::{ConnectionHandler, Flow};
use crate::api::state::AppState;
use crate::protocol::Response;
use crate::session::{ConnectionHandle, Outbound};

/// How long the writer may take to flush after the read loop ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// GET /ws/v1
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> HttpResponse {
    let max_frame = state.config.max_frame_bytes;
    ws.max_message_size(max_frame)
        .on_upgrade(move |socket| run_connection(socket, state))
}

enum Inbound {
    Frame(Message),
    Idle,
    Ended,
    Failed(axum::Error),
}

async fn next_inbound(stream: &mut SplitStream<WebSocket>, idle: Option<Duration>) -> Inbound {
    let next = match idle {
        Some(limit) => match timeout(limit, stream.next()).await {
            Ok(next) => next,
            Err(_) => return Inbound::Idle,
        },
        None => stream.next().await,
    };

    match next {
        Some(Ok(msg)) => Inbound::Frame(msg),
        Some(Err(e)) => Inbound::Failed(e),
        None => Inbound::Ended,
    }
}

pub async fn run_connection(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let (conn, rx) = ConnectionHandle::open();
    let conn_id = conn.id();
    let idle = state.config.idle_timeout();

    let mut writer = tokio::spawn(writer_task(sink, rx, state.config.write_timeout(), conn_id));
    let mut writer_done = false;
    let mut handler = ConnectionHandler::new(state, conn.clone());

    tracing::info!(conn_id = %conn_id, "Connection opened");

    loop {
        let inbound = tokio::select! {
            _ = &mut writer => {
                // closed on request or the peer stopped reading
                writer_done = true;
                break;
            }
            inbound = next_inbound(&mut stream, idle) => inbound,
        };

        match inbound {
            Inbound::Frame(Message::Text(text)) => {
                if handler.handle_text(text.as_str()).await == Flow::Close {
                    conn.close("Logged out");
                    break;
                }
            }
            Inbound::Frame(Message::Binary(_)) => {
                conn.send(Response::error("Binary frames are not supported"));
            }
            Inbound::Frame(Message::Close(frame)) => {
                tracing::info!(conn_id = %conn_id, reason = ?frame, "Client initiated close");
                break;
            }
            Inbound::Frame(_) => {}
            Inbound::Idle => {
                tracing::info!(conn_id = %conn_id, "Idle timeout, closing connection");
                break;
            }
            Inbound::Failed(e) => {
                tracing::warn!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
            Inbound::Ended => {
                tracing::info!(conn_id = %conn_id, "WebSocket stream ended");
                break;
            }
        }
    }

    handler.shutdown();
    drop(handler);
    drop(conn);

    if !writer_done && timeout(DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    tracing::info!(conn_id = %conn_id, "Connection closed");
}

async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: UnboundedReceiver<Outbound>,
    write_timeout: Duration,
    conn_id: Uuid,
) {
    while let Some(outbound) = rx.recv().await {
        let (msg, last) = match outbound {
            Outbound::Frame(response) => match serde_json::to_string(&response) {
                Ok(json) => (Message::Text(json.into()), false),
                Err(e) => {
                    tracing::error!(conn_id = %conn_id, error = %e, "Failed to encode response");
                    continue;
                }
            },
            Outbound::Close(reason) => {
                let frame = CloseFrame {
                    code: close_code::NORMAL,
                    reason: reason.into(),
                };
                (Message::Close(Some(frame)), true)
            }
        };

        match timeout(write_timeout, sink.send(msg)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket send failed");
                break;
            }
            Err(_) => {
                tracing::warn!(conn_id = %conn_id, "Write timed out, dropping connection");
                break;
            }
        }

        if last {
            break;
        }
    }
}
