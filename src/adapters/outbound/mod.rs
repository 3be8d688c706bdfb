mod dashmap_entry_store;
mod sqlite_entry_store;

pub use dashmap_entry_store::DashMapEntryStore;
pub use sqlite_entry_store::SqliteEntryStore;
