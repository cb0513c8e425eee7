use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::{CacheError, Result, SlotStorage};

/// In-process slots. Nothing survives the process, handy for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySlots {
    slots: Mutex<HashMap<String, String>>,
}

impl MemorySlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a slot directly, bypassing any serializer
    pub fn with_slot(key: &str, value: &str) -> Self {
        let slots = Self::new();
        if let Ok(mut map) = slots.slots.lock() {
            map.insert(key.to_string(), value.to_string());
        }
        slots
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.slots
            .lock()
            .map_err(|_| CacheError::Task("memory slots lock poisoned".to_string()))
    }
}

#[async_trait]
impl SlotStorage for MemorySlots {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}
