// Durable key-value slots for the capture history
// One key holds one whole serialized document

pub mod cache;
pub mod error;
pub mod memory;

pub use cache::SqliteSlots;
pub use error::{CacheError, Result};
pub use memory::MemorySlots;

use async_trait::async_trait;

/// Whole-document key-value storage
///
/// Every write replaces the full value under a key. There are no partial
/// updates, so callers do read-modify-write of the entire document.
#[async_trait]
pub trait SlotStorage: Send + Sync {
    /// Read the value under `key`, `None` if the slot was never written or was removed
    async fn read(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value under `key`
    async fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Drop the slot entirely. Removing a missing slot is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}
