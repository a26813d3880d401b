//! The connection's own task (§4.A/§4.D) and the sharded worker pool that
//! actually runs handlers (§4.E). One task per connection owns the socket
//! directly and `tokio::select!`s between the client's frames, the
//! worker's replies, and a kill signal — the same shape the host project
//! uses for its own forwarder sessions, just generalized to a bidirectional
//! wire protocol with a backing worker pool instead of a single inline
//! handler.
//!
//! Per-connection FIFO is maintained by routing every frame from a given
//! connection to the same worker shard (`connection_id % worker_count`):
//! within one shard, work items are processed strictly in arrival order.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::mpsc;

use msg_protocol::{frame, tags, Envelope, ErrorKind};

use crate::directory::{ConnectionHandle, ConnectionId, DirectoryError};
use crate::handlers::{self, HandlerCtx};
use crate::metrics::Metrics;
use crate::state::AppState;
use crate::storage::users;

pub struct WorkItem {
    pub connection_id: ConnectionId,
    pub envelope: Envelope,
}

pub type WorkSender = mpsc::Sender<WorkItem>;

/// Spawns `config.worker_count` shards, each a bounded channel plus a task
/// that drains it strictly in order. Returns the senders a connection task
/// picks from by `connection_id % len()`.
pub fn spawn_worker_pool(state: &AppState) -> Vec<WorkSender> {
    let mut senders = Vec::with_capacity(state.config.worker_count);
    for _ in 0..state.config.worker_count {
        let (tx, rx) = mpsc::channel(state.config.worker_queue_capacity);
        tokio::spawn(worker_loop(state.clone(), rx));
        senders.push(tx);
    }
    senders
}

async fn worker_loop(state: AppState, mut rx: mpsc::Receiver<WorkItem>) {
    while let Some(item) = rx.recv().await {
        process_item(&state, item).await;
    }
}

async fn process_item(state: &AppState, item: WorkItem) {
    let Some(handle) = state.directory.connection(item.connection_id).await else {
        return;
    };

    let ctx = HandlerCtx {
        pool: &state.pool,
        directory: &state.directory,
        config: &state.config,
        connection_id: item.connection_id,
        conn: &handle,
    };
    let outcome = handlers::dispatch(&ctx, item.envelope).await;
    state.metrics.messages_routed.fetch_add(1, Ordering::Relaxed);

    deliver(&handle, outcome.response, &state.metrics, state.config.slow_consumer_close_after);
    for (username, envelope) in outcome.fanout {
        for session in state.directory.sessions_for_user(&username).await {
            deliver(&session, envelope.clone(), &state.metrics, state.config.slow_consumer_close_after);
        }
    }
}

/// Hands an envelope to a connection's own task over its writer channel.
/// A full channel marks one strike against the connection's slow-consumer
/// counter rather than blocking the shard on one unresponsive client; once
/// the counter crosses `slow_consumer_close_after` the connection is torn
/// down (§4.D).
fn deliver(handle: &ConnectionHandle, envelope: Envelope, metrics: &Metrics, close_after: u32) {
    match handle.writer_tx.try_send(envelope) {
        Ok(()) => handle.consecutive_slow_sends.store(0, Ordering::Relaxed),
        Err(_) => {
            metrics.slow_consumer_drops.fetch_add(1, Ordering::Relaxed);
            let strikes = handle.consecutive_slow_sends.fetch_add(1, Ordering::Relaxed) + 1;
            if strikes >= close_after {
                handle.force_close();
            }
        }
    }
}

fn gate_pre_auth(handle: &ConnectionHandle, envelope: &Envelope) -> bool {
    handle.is_authenticated() || tags::PRE_AUTH_ALLOWED.contains(&envelope.msg_type.as_str())
}

fn deny_reason(err: DirectoryError) -> &'static str {
    err.code()
}

async fn send_text(socket: &mut WebSocket, envelope: &Envelope) -> Result<(), axum::Error> {
    let json = serde_json::to_string(envelope).unwrap_or_else(|_| "{}".to_owned());
    socket.send(Message::Text(json.into())).await
}

async fn send_binary(socket: &mut WebSocket, envelope: &Envelope, max_frame_size: usize) -> Result<(), ()> {
    let bytes = frame::encode(envelope, max_frame_size).map_err(|_| ())?;
    socket.send(Message::Binary(bytes.into())).await.map_err(|_| ())
}

/// Decodes a WS binary message as one complete `len_be32 ∥ tag4 ∥ body`
/// frame (the length prefix is part of the message payload itself, since
/// the WebSocket layer already delimits messages).
fn decode_binary_frame(bytes: &[u8], max_frame_size: usize) -> Result<Envelope, frame::FrameError> {
    if bytes.len() > max_frame_size {
        return Err(frame::FrameError::TooLarge(bytes.len(), max_frame_size));
    }
    if bytes.len() < 4 {
        return Err(frame::FrameError::Truncated);
    }
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&bytes[..4]);
    let declared = frame::read_length_prefix(&prefix) as usize;
    if declared != bytes.len() - 4 {
        return Err(frame::FrameError::Truncated);
    }
    frame::decode_body(&bytes[4..])
}

/// Drives one accepted WebSocket connection end to end: registers it with
/// the directory, reads frames (text JSON or length-prefixed binary) and
/// hands them to its worker shard, and writes back whatever the shard (or
/// another connection's fan-out) sends over the writer channel — until the
/// client disconnects, a policy limit is hit, or the heartbeat timeout
/// elapses.
pub async fn handle_socket(mut socket: WebSocket, remote_addr: SocketAddr, state: AppState) {
    let (writer_tx, mut writer_rx) = mpsc::channel::<Envelope>(state.config.writer_channel_capacity);
    let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);

    let (connection_id, handle) = match state
        .directory
        .register_connection(remote_addr.ip(), writer_tx, kill_tx)
        .await
    {
        Ok(pair) => pair,
        Err(err) => {
            let _ = send_text(&mut socket, &Envelope::error(deny_reason(err), handlers::now_iso8601())).await;
            return;
        }
    };
    state.metrics.connections_accepted.fetch_add(1, Ordering::Relaxed);
    state.metrics.connections_active.fetch_add(1, Ordering::Relaxed);

    let shard = connection_id as usize % state.workers.len().max(1);
    let worker = state.workers[shard].clone();
    let use_binary = AtomicBool::new(false);
    let mut malformed_strikes = 0u32;

    let welcome = Envelope::system_notification(
        "welcome",
        env!("CARGO_PKG_VERSION"),
        &connection_id.to_string(),
        handlers::now_iso8601(),
    );
    if send_text(&mut socket, &welcome).await.is_err() {
        state.directory.drop_connection(connection_id).await;
        state.metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    loop {
        tokio::select! {
            incoming = tokio::time::timeout(state.config.heartbeat_timeout, socket.recv()) => {
                match incoming {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        handle.touch();
                        match serde_json::from_str::<Envelope>(&text) {
                            Ok(envelope) if gate_pre_auth(&handle, &envelope) => {
                                if worker.send(WorkItem { connection_id, envelope }).await.is_err() {
                                    break;
                                }
                            }
                            Ok(envelope) => {
                                let _ = send_text(&mut socket, &handlers::error_response(&envelope.msg_type, ErrorKind::Unauthorized)).await;
                            }
                            Err(_) => {
                                malformed_strikes += 1;
                                state.metrics.malformed_frames_rejected.fetch_add(1, Ordering::Relaxed);
                                let _ = send_text(&mut socket, &Envelope::error("malformed json", handlers::now_iso8601())).await;
                                if malformed_strikes >= state.config.max_malformed_frames {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(Some(Ok(Message::Binary(bytes)))) => {
                        handle.touch();
                        use_binary.store(true, Ordering::Relaxed);
                        match decode_binary_frame(&bytes, state.config.max_frame_size) {
                            Ok(envelope) if gate_pre_auth(&handle, &envelope) => {
                                if worker.send(WorkItem { connection_id, envelope }).await.is_err() {
                                    break;
                                }
                            }
                            Ok(envelope) => {
                                let _ = send_binary(&mut socket, &handlers::error_response(&envelope.msg_type, ErrorKind::Unauthorized), state.config.max_frame_size).await;
                            }
                            Err(_) => {
                                malformed_strikes += 1;
                                state.metrics.malformed_frames_rejected.fetch_add(1, Ordering::Relaxed);
                                if malformed_strikes >= state.config.max_malformed_frames {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => {}
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
                    Ok(Some(Err(_))) => break,
                    Err(_) => break,
                }
            }
            Some(envelope) = writer_rx.recv() => {
                let sent = if use_binary.load(Ordering::Relaxed) {
                    send_binary(&mut socket, &envelope, state.config.max_frame_size).await.is_ok()
                } else {
                    send_text(&mut socket, &envelope).await.is_ok()
                };
                if !sent {
                    break;
                }
            }
            _ = kill_rx.recv() => break,
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    let user_id = handle.user_id();
    state.directory.drop_connection(connection_id).await;
    state.metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
    if let Some(user_id) = user_id {
        let _ = users::update_online_status(&state.pool, user_id, false).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msg_protocol::{tags, Encryption, MessageData};
    use std::net::{IpAddr, Ipv4Addr};

    fn test_handle() -> ConnectionHandle {
        let (writer_tx, _rx) = mpsc::channel(1);
        let (kill_tx, _krx) = mpsc::channel(1);
        ConnectionHandle::new(1, IpAddr::V4(Ipv4Addr::LOCALHOST), writer_tx, kill_tx)
    }

    #[test]
    fn gate_pre_auth_allows_login_on_unauthenticated_connection() {
        let handle = test_handle();
        let env = Envelope::new(tags::LOGIN, "2026-07-28T00:00:00Z");
        assert!(gate_pre_auth(&handle, &env));

        let protected = Envelope::new(tags::GET_DIRECTORY, "2026-07-28T00:00:00Z");
        assert!(!gate_pre_auth(&handle, &protected));
    }

    #[test]
    fn decode_binary_frame_round_trips_an_encoded_envelope() {
        let mut env = Envelope::new(tags::TEXT_MESSAGE, "2026-07-28T00:00:00Z");
        env.data = Some(MessageData {
            content: "aGk=".to_owned(),
            content_type: "text".to_owned(),
            encryption: Encryption::None,
            signature: None,
            file_info: None,
            voice_params: None,
        });
        let encoded = frame::encode(&env, frame::DEFAULT_MAX_FRAME_SIZE).expect("encode");
        let decoded = decode_binary_frame(&encoded, frame::DEFAULT_MAX_FRAME_SIZE).expect("decode");
        assert_eq!(decoded, env);
    }

    #[test]
    fn decode_binary_frame_rejects_frames_over_the_ceiling() {
        let env = Envelope::new(tags::TEXT_MESSAGE, "2026-07-28T00:00:00Z");
        let encoded = frame::encode(&env, frame::DEFAULT_MAX_FRAME_SIZE).expect("encode");
        let err = decode_binary_frame(&encoded, 4).expect_err("should exceed tiny ceiling");
        assert!(matches!(err, frame::FrameError::TooLarge(_, 4)));
    }
}
