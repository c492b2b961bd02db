//! Plain domain types shared between the store, the server and the client.
//!
//! These are the JSON-facing shapes; `babylog-store` keeps its own bincode
//! `Record` structs for the on-disk representation and converts between the
//! two at the store boundary, the way the teacher lineage keeps `Event`
//! (wire/domain) distinct from `EventRecord` (on-disk).

use serde::{Deserialize, Serialize};

use crate::ids::{EntryId, FamilyId};
use crate::time::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Family {
    pub id: FamilyId,
    pub name: String,
    pub notes: String,
    pub archived: bool,
    pub created_at: Timestamp,
    pub seq: u64,
}

/// A single logged event, in its latest known state.
///
/// `seq` is `None` only on a freshly-produced, not-yet-submitted client
/// record; every entry that has round-tripped through the server carries a
/// server-assigned `seq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub family_id: FamilyId,
    pub ts: Timestamp,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    pub deleted: bool,
    pub updated_at: Timestamp,
    pub seq: Option<u64>,
}

impl Entry {
    /// A fresh, locally-produced entry awaiting its server-assigned `seq`.
    pub fn new_local(family_id: FamilyId, ts: Timestamp, kind: String, value: String) -> Self {
        Self {
            id: EntryId::new(),
            family_id,
            ts,
            kind,
            value,
            deleted: false,
            updated_at: Timestamp::now(),
            seq: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigBlob {
    pub family_id: FamilyId,
    pub data: String,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: crate::ids::AccessTokenValue,
    pub family_id: FamilyId,
    pub label: Option<String>,
    pub expires_at: Option<Timestamp>,
    pub revoked_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl AccessToken {
    pub fn is_usable(&self, now: Timestamp) -> bool {
        self.revoked_at.is_none() && self.expires_at.is_none_or(|exp| now < exp)
    }
}
