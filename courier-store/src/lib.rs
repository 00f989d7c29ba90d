pub mod backends;
pub mod config;
pub mod error;
pub mod feed;
pub mod filter;
pub mod r#trait;

pub use backends::{FileRecordStore, MemoryRecordStore};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use feed::{ChangeEvent, ChangeFeed, ChangeKind};
pub use filter::RecordFilter;
pub use r#trait::RecordStore;
