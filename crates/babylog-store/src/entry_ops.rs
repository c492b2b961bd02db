use babylog_core::{Entry, EntryId, FamilyId, Timestamp};
use redb_bincode::ReadableTable as _;
use snafu::OptionExt as _;
use tracing::debug;

use crate::error::FamilyNotFoundSnafu;
use crate::tables::EntryRecord;
use crate::{
    Database, LOG_TARGET, StoreResult, WriteTransactionCtx, entries, entries_by_family_seq,
    entries_by_family_updated_at, families,
};

impl EntryRecord {
    fn into_entry(self, id: EntryId) -> Entry {
        Entry {
            id,
            family_id: self.family_id,
            ts: self.ts,
            kind: self.kind,
            value: self.value,
            deleted: self.deleted,
            updated_at: self.updated_at,
            seq: Some(self.seq),
        }
    }
}

impl Database {
    /// Inserts a brand new entry or overwrites an existing one in place,
    /// assigning it the family's next sequence number.
    ///
    /// Overwriting an existing id is legitimate: a client may resubmit an
    /// entry it previously pushed (e.g. after editing a locally-cached
    /// value before the first push was acknowledged). The prior `seq` is
    /// discarded; only the latest state is retained.
    pub async fn assign_and_upsert_entry(
        &self,
        family_id: FamilyId,
        entry_id: EntryId,
        ts: Timestamp,
        kind: String,
        value: String,
    ) -> StoreResult<Entry> {
        self.write_with(move |tx| {
            let families_table = tx.open_table(&families::TABLE)?;
            if families_table.get(&family_id)?.is_none() {
                return FamilyNotFoundSnafu.fail();
            }
            drop(families_table);

            let seq = Self::next_family_seq_tx(tx, family_id)?;
            let updated_at = Timestamp::now();

            Self::remove_stale_index_rows_tx(tx, entry_id)?;

            let record = EntryRecord {
                family_id,
                ts,
                kind,
                value,
                deleted: false,
                updated_at,
                seq,
            };
            Self::insert_entry_tx(tx, entry_id, &record)?;

            debug!(target: LOG_TARGET, %family_id, %entry_id, seq, "Upserted entry");
            Ok(record.into_entry(entry_id))
        })
        .await
    }

    /// Soft-deletes an entry, assigning it a fresh `seq` like any other
    /// mutation. Returns `None` if the entry does not exist (a delete of an
    /// entry the server never saw is a no-op, not an error, since at-least-
    /// once delivery can race a delete against its own prior add).
    pub async fn mark_deleted(
        &self,
        family_id: FamilyId,
        entry_id: EntryId,
    ) -> StoreResult<Option<Entry>> {
        self.write_with(move |tx| {
            let entries_table = tx.open_table(&entries::TABLE)?;
            let Some(mut record) = entries_table.get(&entry_id)?.map(|g| g.value()) else {
                return Ok(None);
            };
            drop(entries_table);

            let seq = Self::next_family_seq_tx(tx, family_id)?;

            if record.deleted {
                // Already deleted: semantically a no-op, but a replayed delete
                // still consumes a seq, so re-index the entry under it.
                let mut by_seq = tx.open_table(&entries_by_family_seq::TABLE)?;
                by_seq.remove(&(record.family_id, record.seq))?;
                by_seq.insert(&(record.family_id, seq), &entry_id)?;
                drop(by_seq);

                record.seq = seq;
                let mut entries_table = tx.open_table(&entries::TABLE)?;
                entries_table.insert(&entry_id, &record)?;

                debug!(target: LOG_TARGET, %family_id, %entry_id, seq, "Replayed delete for already-deleted entry");
                return Ok(Some(record.into_entry(entry_id)));
            }

            Self::remove_stale_index_rows_tx(tx, entry_id)?;

            record.deleted = true;
            record.updated_at = Timestamp::now();
            record.seq = seq;
            Self::insert_entry_tx(tx, entry_id, &record)?;

            debug!(target: LOG_TARGET, %family_id, %entry_id, seq, "Marked entry deleted");
            Ok(Some(record.into_entry(entry_id)))
        })
        .await
    }

    fn insert_entry_tx(
        tx: &WriteTransactionCtx,
        entry_id: EntryId,
        record: &EntryRecord,
    ) -> StoreResult<()> {
        let mut entries_table = tx.open_table(&entries::TABLE)?;
        let mut by_seq = tx.open_table(&entries_by_family_seq::TABLE)?;
        let mut by_updated_at = tx.open_table(&entries_by_family_updated_at::TABLE)?;

        entries_table.insert(&entry_id, record)?;
        by_seq.insert(&(record.family_id, record.seq), &entry_id)?;
        by_updated_at.insert(&(record.family_id, record.updated_at, entry_id), &())?;
        Ok(())
    }

    /// Removes this entry's prior secondary-index rows, if any, so a rewrite
    /// doesn't leave a stale index entry pointing at an id whose primary
    /// record has since moved to a new `seq`/`updated_at`.
    fn remove_stale_index_rows_tx(tx: &WriteTransactionCtx, entry_id: EntryId) -> StoreResult<()> {
        let entries_table = tx.open_table(&entries::TABLE)?;
        let Some(prior) = entries_table.get(&entry_id)?.map(|g| g.value()) else {
            return Ok(());
        };
        drop(entries_table);

        let mut by_seq = tx.open_table(&entries_by_family_seq::TABLE)?;
        let mut by_updated_at = tx.open_table(&entries_by_family_updated_at::TABLE)?;
        by_seq.remove(&(prior.family_id, prior.seq))?;
        by_updated_at.remove(&(prior.family_id, prior.updated_at, entry_id))?;
        Ok(())
    }

    /// Returns entries for `family_id` with `seq > cursor`, oldest first,
    /// capped at `limit`, plus the cursor to resume from and whether more
    /// remain.
    pub async fn scan_since_cursor(
        &self,
        family_id: FamilyId,
        cursor: u64,
        limit: u32,
    ) -> StoreResult<(Vec<Entry>, u64, bool)> {
        let limit = limit as usize;
        self.read_with(move |tx| {
            let by_seq = tx.open_table(&entries_by_family_seq::TABLE)?;
            let entries_table = tx.open_table(&entries::TABLE)?;

            let lower = (family_id, cursor.saturating_add(1));
            let upper = (family_id, u64::MAX);
            let mut out = Vec::new();
            let mut next_cursor = cursor;
            let mut has_more = false;

            for row in by_seq.range(lower..=upper)? {
                let (key, entry_id) = {
                    let (k, v) = row?;
                    (k.value(), v.value())
                };
                if out.len() == limit {
                    has_more = true;
                    break;
                }
                let (_, seq) = key;
                let Some(record) = entries_table.get(&entry_id)?.map(|g| g.value()) else {
                    continue;
                };
                next_cursor = seq;
                out.push(record.into_entry(entry_id));
            }

            Ok((out, next_cursor, has_more))
        })
        .await
    }

    /// Returns every entry for `family_id`, including tombstones, ordered
    /// ascending by `updated_at`. Used for full-state exports, not the
    /// steady-state sync path.
    pub async fn get_all_entries(&self, family_id: FamilyId) -> StoreResult<Vec<Entry>> {
        self.read_with(move |tx| {
            let by_updated_at = tx.open_table(&entries_by_family_updated_at::TABLE)?;
            let entries_table = tx.open_table(&entries::TABLE)?;

            let lower = (family_id, Timestamp::ZERO, EntryId::MIN);
            let upper = (family_id, Timestamp(i64::MAX), EntryId::MAX);

            let mut out = Vec::new();
            for row in by_updated_at.range(lower..=upper)? {
                let (key, _) = row?;
                let (_, _, entry_id) = key.value();
                if let Some(record) = entries_table.get(&entry_id)?.map(|g| g.value()) {
                    out.push(record.into_entry(entry_id));
                }
            }
            Ok(out)
        })
        .await
    }
}
