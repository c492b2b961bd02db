//! The wire protocol: one JSON object per frame, tagged by `type`.
//!
//! See the wire message catalog for the authoritative field list; these
//! types are the `serde`-level mirror of that table.

use serde::{Deserialize, Serialize};

use crate::ids::EntryId;
use crate::model::Entry;

/// Default and maximum page size for `sync_request`.
pub const DEFAULT_SYNC_LIMIT: u32 = 500;
pub const MAX_SYNC_LIMIT: u32 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryAction {
    Add,
    Update,
    Delete,
}

/// A single pushed mutation, either embedded in a live `entry` frame or
/// piggy-backed on a `sync_request` as a bulk push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMutation {
    pub action: EntryAction,
    /// Present for `add`/`update`; absent for `delete`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entry: Option<Entry>,
    /// Present for `delete`; absent (or ignored) for `add`/`update`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<EntryId>,
}

/// Frames a client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    SyncRequest {
        cursor: u64,
        #[serde(default)]
        limit: Option<u32>,
        #[serde(default)]
        entries: Vec<EntryMutation>,
    },
    Entry {
        #[serde(flatten)]
        mutation: EntryMutation,
    },
    Config {
        data: String,
    },
    Ping,
}

/// Frames the server may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Init {
        entries: Vec<Entry>,
        config: Option<String>,
    },
    SyncResponse {
        entries: Vec<Entry>,
        cursor: u64,
        has_more: bool,
    },
    /// Point-to-point: only ever sent to the submitter of the mutation it
    /// acknowledges.
    EntryAck {
        id: EntryId,
        seq: u64,
    },
    /// Broadcast: sent to every other session in the family.
    Entry {
        action: EntryAction,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        entry: Option<Entry>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        id: Option<EntryId>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        seq: Option<u64>,
    },
    Config {
        data: String,
    },
    Pong,
    Presence {
        members: Vec<String>,
    },
}

impl EntryMutation {
    pub fn add_or_update(entry: Entry) -> Self {
        let action = if entry.deleted {
            EntryAction::Delete
        } else {
            EntryAction::Add
        };
        Self {
            action,
            entry: Some(entry),
            id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::FamilyId;
    use crate::time::Timestamp;

    #[test]
    fn sync_request_round_trips_as_json() {
        let frame = ClientFrame::SyncRequest {
            cursor: 42,
            limit: Some(100),
            entries: vec![],
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"sync_request\""));
        let parsed: ClientFrame = serde_json::from_str(&json).unwrap();
        match parsed {
            ClientFrame::SyncRequest { cursor, limit, .. } => {
                assert_eq!(cursor, 42);
                assert_eq!(limit, Some(100));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn entry_add_frame_round_trips() {
        let entry = Entry {
            id: EntryId::new(),
            family_id: FamilyId::new(),
            ts: Timestamp(1000),
            kind: "feed".into(),
            value: "bottle".into(),
            deleted: false,
            updated_at: Timestamp(1000),
            seq: None,
        };
        let frame = ClientFrame::Entry {
            mutation: EntryMutation::add_or_update(entry.clone()),
        };
        let json = serde_json::to_string(&frame).unwrap();
        let parsed: ClientFrame = serde_json::from_str(&json).unwrap();
        match parsed {
            ClientFrame::Entry { mutation } => {
                assert_eq!(mutation.action, EntryAction::Add);
                assert_eq!(mutation.entry.unwrap().id, entry.id);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn delete_broadcast_carries_no_full_entry() {
        let frame = ServerFrame::Entry {
            action: EntryAction::Delete,
            entry: None,
            id: Some(EntryId::new()),
            seq: Some(7),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert!(json.get("entry").is_none());
        assert_eq!(json.get("seq").unwrap(), &serde_json::json!(7));
    }
}
