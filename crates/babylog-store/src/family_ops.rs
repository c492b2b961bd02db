use babylog_core::{Family, FamilyId, Timestamp};
use redb_bincode::ReadableTable as _;
use snafu::OptionExt as _;
use tracing::info;

use crate::error::FamilyNotFoundSnafu;
use crate::tables::{FamilyRecord, families};
use crate::{Database, LOG_TARGET, StoreResult, WriteTransactionCtx};

impl FamilyRecord {
    fn into_family(self, id: FamilyId) -> Family {
        Family {
            id,
            name: self.name,
            notes: self.notes,
            archived: self.archived,
            created_at: self.created_at,
            seq: self.seq,
        }
    }
}

impl Database {
    pub async fn create_family(&self, name: String, notes: String) -> StoreResult<Family> {
        self.write_with(move |tx| Self::create_family_tx(tx, name, notes))
            .await
    }

    fn create_family_tx(
        tx: &WriteTransactionCtx,
        name: String,
        notes: String,
    ) -> StoreResult<Family> {
        let id = FamilyId::new();
        let record = FamilyRecord {
            name,
            notes,
            archived: false,
            created_at: Timestamp::now(),
            seq: 0,
        };
        let mut table = tx.open_table(&families::TABLE)?;
        table.insert(&id, &record)?;
        info!(target: LOG_TARGET, family_id = %id, "Created family");
        Ok(record.into_family(id))
    }

    pub async fn rename_family(
        &self,
        family_id: FamilyId,
        name: String,
        notes: String,
    ) -> StoreResult<Family> {
        self.write_with(move |tx| {
            let mut table = tx.open_table(&families::TABLE)?;
            let mut record = table
                .get(&family_id)?
                .map(|g| g.value())
                .context(FamilyNotFoundSnafu)?;
            record.name = name;
            record.notes = notes;
            table.insert(&family_id, &record)?;
            Ok(record.into_family(family_id))
        })
        .await
    }

    pub async fn set_family_archived(
        &self,
        family_id: FamilyId,
        archived: bool,
    ) -> StoreResult<Family> {
        self.write_with(move |tx| {
            let mut table = tx.open_table(&families::TABLE)?;
            let mut record = table
                .get(&family_id)?
                .map(|g| g.value())
                .context(FamilyNotFoundSnafu)?;
            record.archived = archived;
            table.insert(&family_id, &record)?;
            Ok(record.into_family(family_id))
        })
        .await
    }

    pub async fn get_family(&self, family_id: FamilyId) -> StoreResult<Option<Family>> {
        self.read_with(move |tx| {
            let table = tx.open_table(&families::TABLE)?;
            Ok(table
                .get(&family_id)?
                .map(|g| g.value().into_family(family_id)))
        })
        .await
    }

    pub async fn list_families(&self) -> StoreResult<Vec<Family>> {
        self.read_with(move |tx| {
            let table = tx.open_table(&families::TABLE)?;
            let mut out = Vec::new();
            for row in table.range(..)? {
                let (k, v) = row?;
                out.push(v.value().into_family(k.value()));
            }
            Ok(out)
        })
        .await
    }

    /// Bumps and returns the family's authoritative sequence counter,
    /// persisting it in the same transaction as the caller's write.
    pub(crate) fn next_family_seq_tx(
        tx: &WriteTransactionCtx,
        family_id: FamilyId,
    ) -> StoreResult<u64> {
        let mut table = tx.open_table(&families::TABLE)?;
        let mut record = table
            .get(&family_id)?
            .map(|g| g.value())
            .context(FamilyNotFoundSnafu)?;
        record.seq += 1;
        let seq = record.seq;
        table.insert(&family_id, &record)?;
        Ok(seq)
    }
}
