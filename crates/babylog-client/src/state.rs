//! The in-memory reliability core: cursor, locally known entries, and the
//! queue of mutations awaiting a server ack.
//!
//! This mirrors the browser-resident replica described for the JavaScript
//! client one-for-one; every method here corresponds to a step in the
//! Produce / Ack / Connect / Ordering-on-receive rules.

use std::collections::HashMap;

use babylog_core::{Entry, EntryAction, EntryId, EntryMutation};

/// A mutation waiting for its `entry_ack`, with the time it was enqueued.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub mutation: EntryMutation,
    pub enqueued_at_millis: i64,
}

/// The full client-side reliability state for one device.
///
/// `pending` preserves insertion order (oldest first) so a reconnect replays
/// mutations in the order they were originally produced; lookups by id are
/// still needed for ack removal, so order and index are kept side by side.
#[derive(Debug, Default)]
pub struct ClientState {
    cursor: u64,
    entries: HashMap<EntryId, Entry>,
    pending_order: Vec<EntryId>,
    pending: HashMap<EntryId, PendingMutation>,
    pending_config: Option<String>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len() + usize::from(self.pending_config.is_some())
    }

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    fn advance_cursor(&mut self, seq: u64) {
        if seq > self.cursor {
            self.cursor = seq;
        }
    }

    /// Records a freshly produced local mutation and enqueues it to be sent.
    pub fn produce(&mut self, mutation: EntryMutation, now_millis: i64) {
        let id = match (&mutation.entry, mutation.id) {
            (Some(entry), _) => entry.id,
            (None, Some(id)) => id,
            (None, None) => return,
        };
        if let Some(entry) = &mutation.entry {
            self.entries.insert(entry.id, entry.clone());
        } else if mutation.action == EntryAction::Delete {
            if let Some(existing) = self.entries.get_mut(&id) {
                existing.deleted = true;
            }
        }
        if !self.pending.contains_key(&id) {
            self.pending_order.push(id);
        }
        self.pending.insert(
            id,
            PendingMutation {
                mutation,
                enqueued_at_millis: now_millis,
            },
        );
    }

    /// Queues a config write, replacing any unsent one (last-writer-wins).
    pub fn produce_config(&mut self, data: String) {
        self.pending_config = Some(data);
    }

    /// Applies an `entry_ack`: drops the pending frame and advances the
    /// cursor. A missing id is a no-op, matching a wipe or a duplicate ack.
    pub fn apply_ack(&mut self, id: EntryId, seq: u64) {
        if self.pending.remove(&id).is_some() {
            self.pending_order.retain(|pending_id| *pending_id != id);
        }
        self.advance_cursor(seq);
    }

    /// Applies a config ack: the pending config write is acked implicitly by
    /// the server's `config` broadcast reflecting it back.
    pub fn clear_pending_config_if_matches(&mut self, data: &str) {
        if self.pending_config.as_deref() == Some(data) {
            self.pending_config = None;
        }
    }

    /// Applies one entry from an `init` or `sync_response` payload:
    /// unconditional local replacement plus pending removal by id.
    pub fn apply_remote_entry(&mut self, entry: Entry) {
        if let Some(seq) = entry.seq {
            self.advance_cursor(seq);
        }
        let id = entry.id;
        self.entries.insert(id, entry);
        if self.pending.remove(&id).is_some() {
            self.pending_order.retain(|pending_id| *pending_id != id);
        }
    }

    /// Applies a broadcast `entry` frame: add/update carries the full
    /// entry, delete carries only the id, marking the local copy deleted.
    pub fn apply_broadcast(&mut self, action: EntryAction, entry: Option<Entry>, id: Option<EntryId>, seq: Option<u64>) {
        if let Some(seq) = seq {
            self.advance_cursor(seq);
        }
        match action {
            EntryAction::Add | EntryAction::Update => {
                if let Some(entry) = entry {
                    self.entries.insert(entry.id, entry);
                }
            }
            EntryAction::Delete => {
                if let Some(id) = id {
                    if let Some(existing) = self.entries.get_mut(&id) {
                        existing.deleted = true;
                    }
                }
            }
        }
    }

    /// Every frame still awaiting an ack, in the order it was produced.
    pub fn pending_in_order(&self) -> Vec<EntryMutation> {
        self.pending_order
            .iter()
            .filter_map(|id| self.pending.get(id))
            .map(|pending| pending.mutation.clone())
            .collect()
    }

    pub fn pending_config(&self) -> Option<&str> {
        self.pending_config.as_deref()
    }

    /// A snapshot used for durable persistence; see [`crate::storage`].
    pub fn snapshot(&self) -> ClientStateSnapshot {
        ClientStateSnapshot {
            cursor: self.cursor,
            pending: self
                .pending_order
                .iter()
                .filter_map(|id| self.pending.get(id).map(|p| (*id, p.clone())))
                .collect(),
            pending_config: self.pending_config.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: ClientStateSnapshot) {
        self.cursor = snapshot.cursor;
        self.pending_order = snapshot.pending.iter().map(|(id, _)| *id).collect();
        self.pending = snapshot.pending.into_iter().collect();
        self.pending_config = snapshot.pending_config;
    }
}

/// The durable subset of [`ClientState`]: what gets written to disk.
#[derive(Debug, Clone, Default)]
pub struct ClientStateSnapshot {
    pub cursor: u64,
    pub pending: Vec<(EntryId, PendingMutation)>,
    pub pending_config: Option<String>,
}

#[cfg(test)]
mod tests {
    use babylog_core::{FamilyId, Timestamp};

    use super::*;

    fn entry(value: &str) -> Entry {
        Entry::new_local(FamilyId::new(), Timestamp::now(), "feed".into(), value.into())
    }

    #[test]
    fn produce_then_ack_removes_pending_and_advances_cursor() {
        let mut state = ClientState::new();
        let e = entry("bottle");
        let id = e.id;
        state.produce(EntryMutation::add_or_update(e), 0);
        assert_eq!(state.pending_count(), 1);

        state.apply_ack(id, 7);
        assert_eq!(state.pending_count(), 0);
        assert_eq!(state.cursor(), 7);
    }

    #[test]
    fn ack_for_unknown_id_is_a_no_op_but_still_advances_cursor() {
        let mut state = ClientState::new();
        state.apply_ack(EntryId::new(), 3);
        assert_eq!(state.cursor(), 3);
    }

    #[test]
    fn pending_preserves_insertion_order() {
        let mut state = ClientState::new();
        let a = entry("a");
        let b = entry("b");
        let (a_id, b_id) = (a.id, b.id);
        state.produce(EntryMutation::add_or_update(a), 0);
        state.produce(EntryMutation::add_or_update(b), 1);

        let order: Vec<EntryId> = state
            .pending_in_order()
            .iter()
            .filter_map(|m| m.entry.as_ref().map(|e| e.id))
            .collect();
        assert_eq!(order, vec![a_id, b_id]);
    }

    #[test]
    fn broadcast_delete_marks_local_copy_deleted_without_dropping_it() {
        let mut state = ClientState::new();
        let e = entry("diaper");
        let id = e.id;
        state.apply_remote_entry(e);

        state.apply_broadcast(EntryAction::Delete, None, Some(id), Some(5));
        assert!(state.entry(id).unwrap().deleted);
        assert_eq!(state.cursor(), 5);
    }
}
