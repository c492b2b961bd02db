//! A reusable async client for the sync protocol: the reliability core a
//! browser replica would otherwise hold in `localStorage`, reimplemented
//! as a Rust library so the wire protocol has a real consumer to test
//! against and so a native client (CLI, desktop, mobile shell) can embed it.

mod state;
mod storage;
mod sync_loop;

pub use state::ClientState;
pub use storage::{ClientStorage, StorageError, StorageResult};
pub use sync_loop::{Command, Connection, Status, SyncLoop};
