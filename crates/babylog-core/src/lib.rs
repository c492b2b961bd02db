pub mod ids;
pub mod model;
pub mod protocol;
pub mod time;

pub use ids::{AccessTokenValue, EntryId, FamilyId};
pub use model::{AccessToken, ConfigBlob, Entry, Family};
pub use protocol::{ClientFrame, EntryAction, EntryMutation, ServerFrame};
pub use time::Timestamp;
