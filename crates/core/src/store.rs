//! Persistent key/value contract, the keys the controller writes, and an
//! in-memory implementation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// The store could not be read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("store failure")]
pub struct StoreFailure;

/// String-keyed persistence.  Implementations log their own diagnostics and
/// report only that the call failed.
pub trait Store: Send + Sync {
    /// Value stored under `key`, or `default` when absent.
    fn get_data(&self, key: &str, default: &str) -> impl Future<Output = Result<String, StoreFailure>> + Send;
    fn set_data(&self, key: &str, value: &str) -> impl Future<Output = Result<(), StoreFailure>> + Send;
    fn remove_data(&self, key: &str) -> impl Future<Output = Result<(), StoreFailure>> + Send;
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

pub mod keys {
    pub const MODE: &str = "mode";
    pub const ALLOCATION: &str = "allocation";
    pub const IRRIGATION_TIME: &str = "irrigationTime";
    pub const IRRIGATION_DAYS: &str = "irrigationDays";

    pub fn critical_level(zone_id: &str) -> String {
        format!("{zone_id}.criticalMoistureLevel")
    }

    pub fn maximal_level(zone_id: &str) -> String {
        format!("{zone_id}.maximalMoistureLevel")
    }

    pub fn is_working(device_id: &str) -> String {
        format!("{device_id}.isWorking")
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Shared in-memory map.  Clones see the same data, which lets a test
/// "restart" a controller against the store a previous one wrote.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<HashMap<String, String>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.data.lock().ok()?.get(key).cloned()
    }

    fn check(&self) -> Result<(), StoreFailure> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreFailure)
        } else {
            Ok(())
        }
    }

    fn with_data<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> Result<T, StoreFailure> {
        self.check()?;
        let mut data = self.data.lock().map_err(|_| StoreFailure)?;
        Ok(f(&mut data))
    }
}

impl Store for MemoryStore {
    async fn get_data(&self, key: &str, default: &str) -> Result<String, StoreFailure> {
        self.with_data(|d| d.get(key).cloned().unwrap_or_else(|| default.to_string()))
    }

    async fn set_data(&self, key: &str, value: &str) -> Result<(), StoreFailure> {
        self.with_data(|d| {
            d.insert(key.to_string(), value.to_string());
        })
    }

    async fn remove_data(&self, key: &str) -> Result<(), StoreFailure> {
        self.with_data(|d| {
            d.remove(key);
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
