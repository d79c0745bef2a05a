pub mod error;
pub mod hot;
pub mod provider;
pub mod situation;
pub mod store;

pub use error::MemoryError;
pub use provider::{Memory, MemoryMatch, MemoryProvider, StoreMemoryProvider};
pub use situation::SituationMemory;
pub use store::SqliteMemoryStore;
