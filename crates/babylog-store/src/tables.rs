//! Database table definitions.
//!
//! ## Data model overview
//!
//! - [`families`]: one row per tenant, carrying the authoritative `seq`
//!   counter.
//! - [`entries`]: the latest known state of every entry, keyed by its
//!   client-chosen id. An entry's row is overwritten in place on every
//!   mutation — only the latest `seq` is retained, per the store's
//!   upsert-discards-prior-seq design.
//! - [`entries_by_family_seq`]: secondary index backing `ScanSinceCursor`'s
//!   per-family ascending-by-`seq` range scan.
//! - [`entries_by_family_updated_at`]: secondary index backing
//!   `GetAllEntries`'s ordering requirement (ascending by `updated_at`).
//! - [`configs`]: one opaque blob per family.
//! - [`access_links`]: operator-issued tokens, keyed by the token value
//!   itself (so `Resolve` is a single primary-key lookup).

use babylog_core::{AccessTokenValue, EntryId, FamilyId, Timestamp};
use bincode::{Decode, Encode};

#[macro_export]
macro_rules! def_table {
    ($(#[$outer:meta])*
        $name:ident : $k:ty => $v:ty) => {
        #[allow(unused)]
        $(#[$outer])*
        pub mod $name {
            use super::*;
            pub type Key = $k;
            pub type Value = $v;
            pub type Definition<'a> = redb_bincode::TableDefinition<'a, Key, Value>;
            pub trait ReadableTable: redb_bincode::ReadableTable<Key, Value> {}
            impl<RT> ReadableTable for RT where RT: redb_bincode::ReadableTable<Key, Value> {}
            pub type Table<'a> = redb_bincode::Table<'a, Key, Value>;
            pub const TABLE: Definition = redb_bincode::TableDefinition::new(stringify!($name));
        }
    };
}

// ============================================================================
// SYSTEM TABLES
// ============================================================================

def_table! {
    /// Tracks database/schema version for migrations.
    db_version: () => u64
}

// ============================================================================
// FAMILY TABLES
// ============================================================================

#[derive(Debug, Clone, Encode, Decode)]
pub struct FamilyRecord {
    pub name: String,
    pub notes: String,
    pub archived: bool,
    pub created_at: Timestamp,
    pub seq: u64,
}

def_table! {
    families: FamilyId => FamilyRecord
}

// ============================================================================
// ENTRY TABLES
// ============================================================================

#[derive(Debug, Clone, Encode, Decode)]
pub struct EntryRecord {
    pub family_id: FamilyId,
    pub ts: Timestamp,
    pub kind: String,
    pub value: String,
    pub deleted: bool,
    pub updated_at: Timestamp,
    pub seq: u64,
}

def_table! {
    entries: EntryId => EntryRecord
}

def_table! {
    /// Key: (family, seq) -> entry id. Ascending-by-seq range scans for
    /// `ScanSinceCursor` live here instead of on `entries` directly, since
    /// `entries` is keyed globally by entry id.
    entries_by_family_seq: (FamilyId, u64) => EntryId
}

def_table! {
    /// Key: (family, updated_at, entry id) -> (). Backs `GetAllEntries`'s
    /// ascending-by-`updated_at` ordering requirement. The entry id is part
    /// of the key (rather than just the value) to disambiguate entries that
    /// share an `updated_at` millisecond.
    entries_by_family_updated_at: (FamilyId, Timestamp, EntryId) => ()
}

// ============================================================================
// CONFIG TABLE
// ============================================================================

#[derive(Debug, Clone, Encode, Decode)]
pub struct ConfigRecord {
    pub data: String,
    pub updated_at: Timestamp,
}

def_table! {
    configs: FamilyId => ConfigRecord
}

// ============================================================================
// ACCESS LINK TABLE
// ============================================================================

#[derive(Debug, Clone, Encode, Decode)]
pub struct AccessTokenRecord {
    pub family_id: FamilyId,
    pub label: Option<String>,
    pub expires_at: Option<Timestamp>,
    pub revoked_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

def_table! {
    access_links: AccessTokenValue => AccessTokenRecord
}
