//! The resumable sync session: owns one WebSocket connection at a time,
//! drives the Connect sequence on every (re)connect, and reconnects with
//! exponential backoff on drop — the same shape as the teacher's
//! `NodeP2PState` backoff bookkeeping, applied to one long-lived connection
//! instead of many short-lived peer dials.

use std::time::Duration;

use babylog_core::protocol::DEFAULT_SYNC_LIMIT;
use babylog_core::{ClientFrame, EntryAction, EntryMutation, ServerFrame};
use futures_util::{SinkExt as _, StreamExt as _};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::{debug, info, warn};

use crate::state::ClientState;
use crate::storage::ClientStorage;

const LOG_TARGET: &str = "babylog::client";

/// Initial reconnect delay (1s, per the Disconnect rule).
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Reconnect delay ceiling; lighter than the teacher's 10-minute p2p ceiling
/// since a sync client reconnecting to one known server benefits from
/// trying again sooner.
const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);

fn backoff_for_attempt(consecutive_failures: u32) -> Duration {
    if consecutive_failures == 0 {
        return Duration::ZERO;
    }
    let shift = consecutive_failures.saturating_sub(1).min(63);
    let multiplier = 1u64 << shift;
    let secs = INITIAL_BACKOFF.as_secs().saturating_mul(multiplier);
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

/// What a consumer (a UI, a test) can observe about the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub connection: Connection,
    pub pending_count: usize,
}

/// A command a caller can push into a running [`SyncLoop`].
pub enum Command {
    SubmitEntry(EntryMutation),
    SubmitConfig(String),
}

/// Drives one client's connection for as long as the handle stays alive.
pub struct SyncLoop {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<Status>,
}

impl SyncLoop {
    /// Spawns the background task and returns a handle to it. `url` is the
    /// `ws://.../ws` endpoint; `token` is sent as the access-link cookie.
    pub fn spawn(url: String, token: String, storage_path: std::path::PathBuf) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (status_tx, status_rx) = watch::channel(Status {
            connection: Connection::Connecting,
            pending_count: 0,
        });

        tokio::spawn(run(url, token, storage_path, commands_rx, status_tx));

        Self {
            commands: commands_tx,
            status: status_rx,
        }
    }

    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    pub fn status_subscribe(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    pub async fn submit_entry(&self, mutation: EntryMutation) {
        let _ = self.commands.send(Command::SubmitEntry(mutation)).await;
    }

    pub async fn submit_config(&self, data: String) {
        let _ = self.commands.send(Command::SubmitConfig(data)).await;
    }
}

async fn run(
    url: String,
    token: String,
    storage_path: std::path::PathBuf,
    mut commands: mpsc::Receiver<Command>,
    status_tx: watch::Sender<Status>,
) {
    let storage = ClientStorage::new(storage_path);
    let mut state = ClientState::new();
    match storage.load().await {
        Ok(snapshot) => state.restore(snapshot),
        Err(err) => warn!(target: LOG_TARGET, %err, "Failed to load persisted client state, starting fresh"),
    }

    let mut consecutive_failures = 0u32;

    loop {
        let _ = status_tx.send(Status {
            connection: Connection::Connecting,
            pending_count: state.pending_count(),
        });

        match connect_and_drive(&url, &token, &mut state, &storage, &mut commands, &status_tx).await {
            Ok(()) => {
                // Command channel closed: caller dropped the handle, shut down.
                return;
            }
            Err(err) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                let delay = backoff_for_attempt(consecutive_failures);
                warn!(target: LOG_TARGET, %err, delay_secs = delay.as_secs(), "Connection lost, backing off");
                let _ = status_tx.send(Status {
                    connection: Connection::Disconnected,
                    pending_count: state.pending_count(),
                });
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[derive(Debug, snafu::Snafu)]
enum DriveError {
    #[snafu(display("handshake failed: {source}"))]
    Handshake { source: tokio_tungstenite::tungstenite::Error },
    #[snafu(display("transport error: {source}"))]
    Transport { source: tokio_tungstenite::tungstenite::Error },
    #[snafu(display("connection closed by server"))]
    Closed,
}

async fn connect_and_drive(
    url: &str,
    token: &str,
    state: &mut ClientState,
    storage: &ClientStorage,
    commands: &mut mpsc::Receiver<Command>,
    status_tx: &watch::Sender<Status>,
) -> Result<(), DriveError> {
    let mut request = url
        .into_client_request()
        .map_err(|source| DriveError::Handshake { source })?;
    request.headers_mut().insert(
        "Cookie",
        format!("babylog_token={token}")
            .parse()
            .expect("token cookie value is always a valid header value"),
    );

    let (stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|source| DriveError::Handshake { source })?;
    info!(target: LOG_TARGET, "Connected");
    let (mut ws_tx, mut ws_rx) = stream.split();

    // Connect sequence, step 1: kick off catch-up from the persisted cursor.
    send(&mut ws_tx, &ClientFrame::SyncRequest {
        cursor: state.cursor(),
        limit: Some(DEFAULT_SYNC_LIMIT),
        entries: vec![],
    })
    .await
    .map_err(|source| DriveError::Transport { source })?;

    let mut caught_up = false;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let msg = msg.ok_or(DriveError::Closed)?.map_err(|source| DriveError::Transport { source })?;
                let Message::Text(text) = msg else {
                    if matches!(msg, Message::Close(_)) {
                        return Err(DriveError::Closed);
                    }
                    continue;
                };
                let Ok(frame) = serde_json::from_str::<ServerFrame>(&text) else {
                    debug!(target: LOG_TARGET, "Malformed server frame, ignoring");
                    continue;
                };
                match frame {
                    ServerFrame::Init { entries, config } => {
                        for entry in entries {
                            state.apply_remote_entry(entry);
                        }
                        if let Some(data) = config {
                            state.clear_pending_config_if_matches(&data);
                        }
                    }
                    ServerFrame::SyncResponse { entries, cursor: _, has_more } => {
                        for entry in entries {
                            state.apply_remote_entry(entry);
                        }
                        if has_more {
                            send(&mut ws_tx, &ClientFrame::SyncRequest {
                                cursor: state.cursor(),
                                limit: Some(DEFAULT_SYNC_LIMIT),
                                entries: vec![],
                            })
                            .await
                            .map_err(|source| DriveError::Transport { source })?;
                        } else if !caught_up {
                            caught_up = true;
                            flush_pending(&mut ws_tx, state).await.map_err(|source| DriveError::Transport { source })?;
                        }
                    }
                    ServerFrame::EntryAck { id, seq } => {
                        state.apply_ack(id, seq);
                        persist(storage, state).await;
                    }
                    ServerFrame::Entry { action, entry, id, seq } => {
                        state.apply_broadcast(action, entry, id, seq);
                        persist(storage, state).await;
                    }
                    ServerFrame::Config { data } => {
                        state.clear_pending_config_if_matches(&data);
                    }
                    ServerFrame::Pong | ServerFrame::Presence { .. } => {}
                }
                let _ = status_tx.send(Status {
                    connection: if caught_up { Connection::Connected } else { Connection::Connecting },
                    pending_count: state.pending_count(),
                });
            }
            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    return Ok(());
                };
                match cmd {
                    Command::SubmitEntry(mutation) => {
                        state.produce(mutation.clone(), babylog_core::Timestamp::now().0);
                        persist(storage, state).await;
                        if caught_up {
                            send(&mut ws_tx, &ClientFrame::Entry { mutation }).await.map_err(|source| DriveError::Transport { source })?;
                        }
                    }
                    Command::SubmitConfig(data) => {
                        state.produce_config(data.clone());
                        persist(storage, state).await;
                        if caught_up {
                            send(&mut ws_tx, &ClientFrame::Config { data }).await.map_err(|source| DriveError::Transport { source })?;
                        }
                    }
                }
                let _ = status_tx.send(Status {
                    connection: if caught_up { Connection::Connected } else { Connection::Connecting },
                    pending_count: state.pending_count(),
                });
            }
        }
    }
}

async fn flush_pending(
    ws_tx: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    state: &ClientState,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    for mutation in state.pending_in_order() {
        let action_is_noop = matches!(mutation.action, EntryAction::Add | EntryAction::Update) && mutation.entry.is_none();
        if action_is_noop {
            continue;
        }
        send(ws_tx, &ClientFrame::Entry { mutation }).await?;
    }
    if let Some(data) = state.pending_config() {
        send(ws_tx, &ClientFrame::Config { data: data.to_string() }).await?;
    }
    Ok(())
}

async fn send(
    ws_tx: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    frame: &ClientFrame,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let text = serde_json::to_string(frame).expect("ClientFrame always serializes");
    ws_tx.send(Message::Text(text.into())).await
}

async fn persist(storage: &ClientStorage, state: &ClientState) {
    if let Err(err) = storage.save(&state.snapshot()).await {
        warn!(target: LOG_TARGET, %err, "Failed to persist client state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_for_attempt(0), Duration::ZERO);
        assert_eq!(backoff_for_attempt(1), Duration::from_secs(1));
        assert_eq!(backoff_for_attempt(2), Duration::from_secs(2));
        assert_eq!(backoff_for_attempt(3), Duration::from_secs(4));
        assert_eq!(backoff_for_attempt(20), MAX_BACKOFF);
    }
}
