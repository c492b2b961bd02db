//! The sync hub: in-memory pub/sub fan-out of live mutations and presence
//! to every connected session in a family.
//!
//! Modeled on the subscribe/notify channels `Database` hands out for its own
//! live-update feeds, but specialized to bounded per-session mailboxes: a
//! slow or stuck session must never be able to stall delivery to the rest of
//! the family, so fan-out uses `try_send` and simply drops a session that
//! can't keep up rather than blocking the broadcaster or buffering
//! unboundedly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use babylog_core::{FamilyId, ServerFrame};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

const LOG_TARGET: &str = "babylog::hub";

/// Mailbox capacity for a single connected session.
///
/// Sized generously above what a normal burst of edits produces; a session
/// that's this far behind is almost certainly gone, not just slow.
const SESSION_MAILBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

struct Member {
    sender: mpsc::Sender<ServerFrame>,
    label: String,
}

#[derive(Default)]
struct FamilyMembers {
    members: HashMap<SessionId, Member>,
}

#[derive(Default)]
pub struct Hub {
    next_session_id: AtomicU64,
    families: RwLock<HashMap<FamilyId, FamilyMembers>>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a new session in `family_id`'s fan-out group, returning its
    /// id (used to exclude the submitter from its own broadcast) and the
    /// receiving end of its mailbox. Emits an updated presence frame to
    /// every member of the family, including the one just registered.
    pub async fn subscribe(&self, family_id: FamilyId, label: String) -> (SessionId, mpsc::Receiver<ServerFrame>) {
        let id = SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(SESSION_MAILBOX_CAPACITY);

        {
            let mut families = self.families.write().await;
            families
                .entry(family_id)
                .or_default()
                .members
                .insert(id, Member { sender: tx, label });
        }

        debug!(target: LOG_TARGET, %family_id, session_id = id.0, "Session joined hub");
        self.broadcast_presence(family_id).await;
        (id, rx)
    }

    /// Removes `session_id` from `family_id`'s fan-out group and, if other
    /// members remain, emits an updated presence frame to them.
    pub async fn unsubscribe(&self, family_id: FamilyId, session_id: SessionId) {
        let remaining = {
            let mut families = self.families.write().await;
            let Some(members) = families.get_mut(&family_id) else {
                return;
            };
            members.members.remove(&session_id);
            let remaining = !members.members.is_empty();
            if !remaining {
                families.remove(&family_id);
            }
            remaining
        };

        debug!(target: LOG_TARGET, %family_id, session_id = session_id.0, "Session left hub");
        if remaining {
            self.broadcast_presence(family_id).await;
        }
    }

    /// Delivers `frame` to every session in `family_id` except `exclude`
    /// (typically the session that originated the mutation, which already
    /// gets a point-to-point ack instead).
    pub async fn broadcast(&self, family_id: FamilyId, exclude: SessionId, frame: ServerFrame) {
        let families = self.families.read().await;
        let Some(members) = families.get(&family_id) else {
            return;
        };

        for (&session_id, member) in &members.members {
            if session_id == exclude {
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) = member.sender.try_send(frame.clone()) {
                warn!(
                    target: LOG_TARGET,
                    %family_id,
                    session_id = session_id.0,
                    "Session mailbox full, dropping frame"
                );
            }
        }
    }

    async fn broadcast_presence(&self, family_id: FamilyId) {
        let families = self.families.read().await;
        let Some(members) = families.get(&family_id) else {
            return;
        };

        let labels: Vec<String> = members
            .members
            .values()
            .map(|m| m.label.clone())
            .filter(|l| !l.is_empty())
            .collect();
        let frame = ServerFrame::Presence { members: labels };

        for member in members.members.values() {
            let _ = member.sender.try_send(frame.clone());
        }
    }
}
