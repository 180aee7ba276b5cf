mod command_store;
mod documents;
mod migrations;
mod sqlite_store;
mod util;

pub use command_store::{CommandStore, MAX_LOG_BATCHES};
pub use sqlite_store::SqliteStore;
pub(crate) use util::{now_unix_ms, now_utc};
