//! Tenant configuration and conversation log on SQLite.

mod error;
mod models;
mod pool;
mod schema;
mod sqlite;
mod traits;

pub use error::{Result, StoreError};
pub use models::{
    DEFAULT_LANGUAGE_TAG, Direction, MessageCounts, NewMessage, SchedulePatch, StoredMessage,
    Tenant, TenantUpsert, parse_hhmm,
};
pub use sqlite::{SqliteStore, StoreConfig};
pub use traits::TenantStore;
