//! One WebSocket connection, from upgrade to teardown.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{Sink, SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tars_core::SessionKey;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::channel::{PushChannel, encode};
use super::handler::Dispatcher;
use super::protocol::ServerMessage;
use super::registry::{SessionHandle, SessionRegistry};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_REJECTED_TOTAL,
};

/// Shared state a session needs.
#[derive(Clone)]
pub struct SessionContext {
    /// Session registry.
    pub registry: Arc<SessionRegistry>,
    /// Inbound message router.
    pub dispatcher: Dispatcher,
    /// Outbound queue depth.
    pub outbound_buffer: usize,
    /// Ping period.
    pub heartbeat_interval: Duration,
    /// Disconnect after this long without client activity.
    pub heartbeat_timeout: Duration,
    /// Server-wide shutdown.
    pub shutdown: CancellationToken,
}

/// Run a session until the client leaves, the transport fails, the heartbeat
/// times out, or the server shuts down.
#[instrument(skip_all, fields(session_id = %key))]
pub async fn run_ws_session(ws: WebSocket, key: SessionKey, ctx: SessionContext) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (channel, send_rx) = PushChannel::pair(ctx.outbound_buffer);
    let channel = Arc::new(channel);
    if let Err(e) = ctx.registry.register(key.clone(), Arc::clone(&channel)) {
        warn!(error = %e, "session rejected");
        counter!(WS_REJECTED_TOTAL, "reason" => "duplicate").increment(1);
        if let Some(text) = encode(&ServerMessage::error(e.to_string())) {
            let _ = ws_tx.send(Message::Text(text.as_str().into())).await;
        }
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "duplicate session".into(),
            })))
            .await;
        return;
    }

    let handle = SessionHandle {
        key: key.clone(),
        connection_id: channel.id(),
    };
    info!(connection_id = handle.connection_id, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let _ = channel.send(&ServerMessage::connection_established(key.as_str()));

    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        Arc::clone(&channel),
        ctx.heartbeat_interval,
        ctx.heartbeat_timeout,
    ));

    loop {
        tokio::select! {
            () = ctx.shutdown.cancelled() => {
                debug!("server shutting down");
                break;
            }
            _ = &mut writer => {
                debug!("writer finished");
                break;
            }
            frame = ws_rx.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(t))) => t.to_string(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(s) => s,
                        Err(_) => {
                            debug!(len = data.len(), "ignoring non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        channel.mark_alive();
                        continue;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("client sent close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "transport error");
                        break;
                    }
                    None => break,
                };
                channel.mark_alive();
                ctx.dispatcher.handle(&handle, &text).await;
            }
        }
    }

    ctx.registry.unregister_connection(key.as_str(), handle.connection_id);
    channel.close();
    if !writer.is_finished() {
        // The writer flushes and sends Close once the channel is closed.
        if tokio::time::timeout(Duration::from_secs(1), &mut writer).await.is_err() {
            writer.abort();
        }
    }

    info!("client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(channel.age().as_secs_f64());
}

/// Drain the outbound queue onto the socket and keep the heartbeat going.
///
/// Returns once the channel is closed or the sink fails. A client silent for
/// longer than `heartbeat_timeout` gets a Close frame first. The session loop
/// treats a returned writer as a disconnect.
async fn write_loop<S>(
    mut ws_tx: S,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    channel: Arc<PushChannel>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
{
    let closed = channel.closed();
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat_interval,
        heartbeat_interval,
    );

    loop {
        tokio::select! {
            biased;
            () = closed.cancelled() => {
                while let Ok(text) = send_rx.try_recv() {
                    if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        return;
                    }
                }
                let _ = ws_tx.send(Message::Close(None)).await;
                return;
            }
            msg = send_rx.recv() => {
                let Some(text) = msg else { return };
                if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                    debug!("write failed");
                    return;
                }
            }
            _ = ping.tick() => {
                if !channel.check_alive() && channel.last_seen_elapsed() > heartbeat_timeout {
                    warn!(silent_for = ?channel.last_seen_elapsed(), "heartbeat timeout, disconnecting");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return;
                }
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    return;
                }
            }
        }
    }
}
