use babylog_core::{ConfigBlob, FamilyId, Timestamp};
use redb_bincode::ReadableTable as _;

use crate::tables::{ConfigRecord, configs};
use crate::{Database, StoreResult};

impl Database {
    pub async fn save_config(&self, family_id: FamilyId, data: String) -> StoreResult<ConfigBlob> {
        self.write_with(move |tx| {
            let mut table = tx.open_table(&configs::TABLE)?;
            let record = ConfigRecord {
                data,
                updated_at: Timestamp::now(),
            };
            table.insert(&family_id, &record)?;
            Ok(ConfigBlob {
                family_id,
                data: record.data,
                updated_at: record.updated_at,
            })
        })
        .await
    }

    pub async fn get_config(&self, family_id: FamilyId) -> StoreResult<Option<ConfigBlob>> {
        self.read_with(move |tx| {
            let table = tx.open_table(&configs::TABLE)?;
            Ok(table.get(&family_id)?.map(|g| {
                let record = g.value();
                ConfigBlob {
                    family_id,
                    data: record.data,
                    updated_at: record.updated_at,
                }
            }))
        })
        .await
    }
}
