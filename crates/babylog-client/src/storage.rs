//! Durable, on-disk persistence for one device's [`ClientState`].
//!
//! One JSON file per device. Writes go to a sibling temp file and are
//! renamed into place, so a crash mid-write never leaves a half-written
//! file behind; this is the client-side analogue of the server's
//! single-writer, crash-safe store, expressed with plain filesystem
//! primitives since a whole embedded database is overkill for one file.

use std::path::{Path, PathBuf};

use babylog_core::EntryId;
use serde::{Deserialize, Serialize};
use snafu::{Location, ResultExt, Snafu};

use crate::state::{ClientStateSnapshot, PendingMutation};

const LOG_TARGET: &str = "babylog::client";

#[derive(Debug, Snafu)]
pub enum StorageError {
    #[snafu(display("failed to read client state file at {path:?}"))]
    Read {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("client state file at {path:?} was not valid JSON"))]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to write client state file at {path:?}"))]
    Write {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedFile {
    cursor: String,
    pending: Vec<(EntryId, PersistedPending)>,
    #[serde(default)]
    pending_config: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedPending {
    msg: babylog_core::EntryMutation,
    added_at: i64,
}

/// JSON-file-backed persistence for one device's client state.
pub struct ClientStorage {
    path: PathBuf,
}

impl ClientStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads the snapshot from disk, or an empty one if the file doesn't
    /// exist yet (a brand-new device).
    pub async fn load(&self) -> StorageResult<ClientStateSnapshot> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ClientStateSnapshot::default());
            }
            Err(source) => {
                return Err(StorageError::Read {
                    path: self.path.clone(),
                    source,
                    location: Location::default(),
                });
            }
        };
        let persisted: PersistedFile = serde_json::from_slice(&bytes).context(DecodeSnafu {
            path: self.path.clone(),
        })?;
        Ok(ClientStateSnapshot {
            cursor: persisted.cursor.parse().unwrap_or(0),
            pending: persisted
                .pending
                .into_iter()
                .map(|(id, p)| {
                    (
                        id,
                        PendingMutation {
                            mutation: p.msg,
                            enqueued_at_millis: p.added_at,
                        },
                    )
                })
                .collect(),
            pending_config: persisted.pending_config,
        })
    }

    /// Persists the snapshot before the caller is allowed to treat the
    /// corresponding frame as sent, per the write-before-transmit rule.
    pub async fn save(&self, snapshot: &ClientStateSnapshot) -> StorageResult<()> {
        let persisted = PersistedFile {
            cursor: snapshot.cursor.to_string(),
            pending: snapshot
                .pending
                .iter()
                .map(|(id, p)| {
                    (
                        *id,
                        PersistedPending {
                            msg: p.mutation.clone(),
                            added_at: p.enqueued_at_millis,
                        },
                    )
                })
                .collect(),
            pending_config: snapshot.pending_config.clone(),
        };
        let json = serde_json::to_vec_pretty(&persisted).expect("persisted state always serializes");

        let tmp_path = tmp_path_for(&self.path);
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context(WriteSnafu { path: self.path.clone() })?;
        }
        tokio::fs::write(&tmp_path, &json)
            .await
            .context(WriteSnafu { path: self.path.clone() })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .context(WriteSnafu { path: self.path.clone() })?;
        tracing::debug!(target: LOG_TARGET, path = %self.path.display(), "Persisted client state");
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use babylog_core::{EntryMutation, FamilyId, Timestamp};

    use super::*;

    #[test_log::test(tokio::test)]
    async fn round_trips_cursor_and_pending_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ClientStorage::new(dir.path().join("device.json"));

        let loaded = storage.load().await.unwrap();
        assert_eq!(loaded.cursor, 0);

        let entry = babylog_core::Entry::new_local(
            FamilyId::new(),
            Timestamp::now(),
            "feed".into(),
            "bottle".into(),
        );
        let id = entry.id;
        let snapshot = ClientStateSnapshot {
            cursor: 42,
            pending: vec![(
                id,
                PendingMutation {
                    mutation: EntryMutation::add_or_update(entry),
                    enqueued_at_millis: 1000,
                },
            )],
            pending_config: Some("{}".to_string()),
        };
        storage.save(&snapshot).await.unwrap();

        let reloaded = storage.load().await.unwrap();
        assert_eq!(reloaded.cursor, 42);
        assert_eq!(reloaded.pending.len(), 1);
        assert_eq!(reloaded.pending[0].0, id);
        assert_eq!(reloaded.pending_config.as_deref(), Some("{}"));
    }

    #[test_log::test(tokio::test)]
    async fn loading_a_missing_file_yields_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ClientStorage::new(dir.path().join("does-not-exist.json"));
        let loaded = storage.load().await.unwrap();
        assert_eq!(loaded.cursor, 0);
        assert!(loaded.pending.is_empty());
    }
}
