//! The connection session: one full-duplex WebSocket per subscriber.
//!
//! There is no separate read/write task pair here the way §4.4 describes in
//! the abstract — axum's split `WebSocket` sink and stream are driven from a
//! single `select!` loop instead, which gets the same properties (hub
//! broadcasts and locally-produced replies interleave onto the wire in the
//! order they're issued) without a second task and its own shutdown dance.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use babylog_core::protocol::{DEFAULT_SYNC_LIMIT, MAX_SYNC_LIMIT};
use babylog_core::{ClientFrame, EntryAction, EntryMutation, FamilyId, ServerFrame};
use babylog_store::{Database, StoreError};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt as _, StreamExt as _};
use snafu::Snafu;
use tracing::{debug, error, warn};

use crate::SharedAppState;
use crate::auth::AuthenticatedFamily;
use crate::hub::{Hub, SessionId};

const LOG_TARGET: &str = "babylog::session";

/// How often the session re-validates its access token against the store,
/// so a revocation takes effect on live connections without waiting for a
/// reconnect.
const REVALIDATE_INTERVAL: Duration = Duration::from_secs(60);

type WsSink = SplitSink<WebSocket, Message>;

#[derive(Debug, Snafu)]
enum InitError {
    #[snafu(transparent)]
    Store { source: StoreError },
    #[snafu(transparent)]
    Transport { source: axum::Error },
}

/// Drives one client's connection for its entire lifetime: registers with
/// the hub, sends the initial catch-up frame, then alternates between
/// forwarding hub broadcasts and dispatching incoming client frames until
/// the transport closes, a frame fails to decode fatally, or the session's
/// access token stops being usable.
pub async fn run_session(socket: WebSocket, state: SharedAppState, auth: AuthenticatedFamily) {
    let family_id = auth.family_id;
    let label = auth.token.label.clone().unwrap_or_default();
    let (session_id, mut mailbox) = state.hub.subscribe(family_id, label).await;

    let (mut ws_tx, mut ws_rx) = socket.split();

    if let Err(err) = send_init(&state.db, family_id, &mut ws_tx).await {
        warn!(target: LOG_TARGET, %family_id, %err, "Failed to send init frame, closing session");
        state.hub.unsubscribe(family_id, session_id).await;
        return;
    }

    let mut revalidate = tokio::time::interval(REVALIDATE_INTERVAL);
    revalidate.tick().await; // the first tick fires immediately; consume it up front

    loop {
        tokio::select! {
            frame = mailbox.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                if send_frame(&mut ws_tx, &frame).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => {
                                handle_client_frame(&state, family_id, session_id, &mut ws_tx, frame).await;
                            }
                            Err(err) => {
                                debug!(target: LOG_TARGET, %family_id, %err, "Malformed frame, ignoring");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(target: LOG_TARGET, %family_id, %err, "Transport error, closing session");
                        break;
                    }
                }
            }
            _ = revalidate.tick() => {
                let still_usable = matches!(state.db.resolve_token(auth.token.token).await, Ok(Some(_)));
                if !still_usable {
                    debug!(target: LOG_TARGET, %family_id, "Access token no longer usable, closing session");
                    break;
                }
            }
        }
    }

    state.hub.unsubscribe(family_id, session_id).await;
}

async fn send_init(db: &Database, family_id: FamilyId, ws_tx: &mut WsSink) -> Result<(), InitError> {
    let entries = db.get_all_entries(family_id).await?;
    let config = db.get_config(family_id).await?.map(|blob| blob.data);
    send_frame(ws_tx, &ServerFrame::Init { entries, config }).await?;
    Ok(())
}

async fn send_frame(ws_tx: &mut WsSink, frame: &ServerFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).expect("ServerFrame always serializes");
    ws_tx.send(Message::Text(text.into())).await
}

async fn handle_client_frame(
    state: &SharedAppState,
    family_id: FamilyId,
    session_id: SessionId,
    ws_tx: &mut WsSink,
    frame: ClientFrame,
) {
    match frame {
        ClientFrame::Entry { mutation } => {
            apply_entry_mutation(&state.db, &state.hub, family_id, session_id, ws_tx, mutation).await;
        }
        ClientFrame::SyncRequest {
            cursor,
            limit,
            entries,
        } => {
            // Bulk-pushed mutations are applied first, each acked exactly like a
            // live `entry` frame, before the catch-up scan is built.
            for mutation in entries {
                apply_entry_mutation(&state.db, &state.hub, family_id, session_id, ws_tx, mutation).await;
            }

            let limit = limit.unwrap_or(DEFAULT_SYNC_LIMIT).min(MAX_SYNC_LIMIT);
            match state.db.scan_since_cursor(family_id, cursor, limit).await {
                Ok((entries, cursor, has_more)) => {
                    let _ = send_frame(
                        ws_tx,
                        &ServerFrame::SyncResponse {
                            entries,
                            cursor,
                            has_more,
                        },
                    )
                    .await;
                }
                Err(err) => {
                    error!(target: LOG_TARGET, %family_id, %err, "Sync scan failed");
                }
            }
        }
        ClientFrame::Config { data } => match state.db.save_config(family_id, data.clone()).await {
            Ok(_) => {
                state
                    .hub
                    .broadcast(family_id, session_id, ServerFrame::Config { data })
                    .await;
            }
            Err(err) => {
                error!(target: LOG_TARGET, %family_id, %err, "Config save failed");
            }
        },
        ClientFrame::Ping => {
            let _ = send_frame(ws_tx, &ServerFrame::Pong).await;
        }
    }
}

/// Applies one pushed `add`/`update`/`delete`, acking the submitter before
/// broadcasting to the rest of the family, per the ordering invariant that
/// a submitter never sees its own mutation echoed back as a broadcast.
async fn apply_entry_mutation(
    db: &Database,
    hub: &Hub,
    family_id: FamilyId,
    session_id: SessionId,
    ws_tx: &mut WsSink,
    mutation: EntryMutation,
) {
    match mutation.action {
        EntryAction::Add | EntryAction::Update => {
            let Some(entry) = mutation.entry else {
                debug!(target: LOG_TARGET, %family_id, "entry mutation missing embedded entry, ignoring");
                return;
            };
            // Never trust the client's own family id.
            match db
                .assign_and_upsert_entry(family_id, entry.id, entry.ts, entry.kind, entry.value)
                .await
            {
                Ok(saved) => {
                    let seq = saved.seq.expect("store always assigns a seq");
                    if send_frame(ws_tx, &ServerFrame::EntryAck { id: saved.id, seq })
                        .await
                        .is_err()
                    {
                        return;
                    }
                    hub.broadcast(
                        family_id,
                        session_id,
                        ServerFrame::Entry {
                            action: mutation.action,
                            entry: Some(saved),
                            id: None,
                            seq: Some(seq),
                        },
                    )
                    .await;
                }
                Err(err) => {
                    error!(target: LOG_TARGET, %family_id, %err, "Failed to upsert entry, dropping");
                }
            }
        }
        EntryAction::Delete => {
            let Some(id) = mutation.id else {
                debug!(target: LOG_TARGET, %family_id, "delete mutation missing id, ignoring");
                return;
            };
            match db.mark_deleted(family_id, id).await {
                Ok(Some(deleted)) => {
                    let seq = deleted.seq.expect("store always assigns a seq");
                    if send_frame(ws_tx, &ServerFrame::EntryAck { id, seq }).await.is_err() {
                        return;
                    }
                    hub.broadcast(
                        family_id,
                        session_id,
                        ServerFrame::Entry {
                            action: EntryAction::Delete,
                            entry: None,
                            id: Some(id),
                            seq: Some(seq),
                        },
                    )
                    .await;
                }
                Ok(None) => {
                    debug!(target: LOG_TARGET, %family_id, %id, "Delete of unknown entry ignored");
                }
                Err(err) => {
                    error!(target: LOG_TARGET, %family_id, %err, "Failed to mark entry deleted, dropping");
                }
            }
        }
    }
}
