use crate::store::Store;
use crate::utils::Clock;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-process [`Store`] that stamps blobs with its own clock.
#[derive(Clone)]
pub struct MemoryStore {
    blobs: Arc<Mutex<HashMap<String, (DateTime<Utc>, Vec<u8>)>>>,
    writes: Arc<Mutex<usize>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            blobs: Arc::new(Mutex::new(HashMap::new())),
            writes: Arc::new(Mutex::new(0)),
            clock,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// Number of `store` calls seen so far.
    pub fn writes(&self) -> usize {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Store for MemoryStore {
    fn store(&self, name: &str, data: Vec<u8>) {
        let now = self.clock.now();
        self.blobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), (now, data));
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    fn retrieve(&self, name: &str, max_age: Duration) -> Option<Vec<u8>> {
        let blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        let (stored_at, data) = blobs.get(name)?;
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        if self.clock.now() - *stored_at > max_age {
            return None;
        }
        Some(data.clone())
    }
}
