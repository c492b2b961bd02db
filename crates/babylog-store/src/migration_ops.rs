//! Schema versioning.
//!
//! There is exactly one schema generation so far: no total-migration path
//! exists yet. When a second generation is needed, follow the pattern this
//! module leaves room for: stash old tables under a `_total_migration_`
//! prefix, reinitialize, and replay.

use tracing::{debug, info};

use crate::tables::db_version;
use crate::{LOG_TARGET, StoreResult, WriteTransactionCtx};
use crate::{access_links, configs, entries, entries_by_family_seq, entries_by_family_updated_at, families};
use crate::error::DbVersionTooHighSnafu;

/// Current schema version. Bump when a table's key/value shape changes.
const DB_VER: u64 = 1;

impl crate::Database {
    pub(crate) fn init_tables_tx(tx: &WriteTransactionCtx) -> StoreResult<()> {
        tx.open_table(&db_version::TABLE)?;
        tx.open_table(&families::TABLE)?;
        tx.open_table(&entries::TABLE)?;
        tx.open_table(&entries_by_family_seq::TABLE)?;
        tx.open_table(&entries_by_family_updated_at::TABLE)?;
        tx.open_table(&configs::TABLE)?;
        tx.open_table(&access_links::TABLE)?;
        Ok(())
    }

    pub(crate) fn handle_db_ver_migrations(tx: &WriteTransactionCtx) -> StoreResult<()> {
        let mut table_db_ver = tx.open_table(&db_version::TABLE)?;

        let Some(cur_db_ver) = table_db_ver.first()?.map(|g| g.1.value()) else {
            info!(target: LOG_TARGET, "Initializing new database");
            table_db_ver.insert(&(), &DB_VER)?;
            return Ok(());
        };

        if DB_VER < cur_db_ver {
            return DbVersionTooHighSnafu {
                db_ver: cur_db_ver,
                code_ver: DB_VER,
            }
            .fail();
        }

        if cur_db_ver < DB_VER {
            info!(target: LOG_TARGET, from_ver = cur_db_ver, to_ver = DB_VER, "Migrating database");
            drop(table_db_ver);
            let mut table_db_ver = tx.open_table(&db_version::TABLE)?;
            table_db_ver.insert(&(), &DB_VER)?;
        } else {
            debug!(target: LOG_TARGET, db_ver = DB_VER, "Database version up to date");
        }

        Ok(())
    }
}
