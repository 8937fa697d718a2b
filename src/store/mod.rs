//! Durable redirect storage.

mod file;

pub use file::JsonFileStore;

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::Result;
use crate::types::Redirect;

/// Keyed record store used to persist the synchronized redirect set.
pub trait RedirectStore: Send + Sync {
    /// Insert or replace the record with `redirect.id`
    fn upsert(&self, redirect: &Redirect) -> Result<()>;

    /// Remove the record with `id`; absent ids are not an error
    fn delete(&self, id: &str) -> Result<()>;

    /// Every stored record, used for startup hydration
    fn list_all(&self) -> Result<Vec<Redirect>>;
}

/// Volatile store, ordered by id
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, Redirect>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-filled with `redirects`
    pub fn with_records(redirects: impl IntoIterator<Item = Redirect>) -> Self {
        let records = redirects
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    pub fn get(&self, id: &str) -> Option<Redirect> {
        self.records.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RedirectStore for MemoryStore {
    fn upsert(&self, redirect: &Redirect) -> Result<()> {
        self.records
            .write()
            .insert(redirect.id.clone(), redirect.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.records.write().remove(id);
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<Redirect>> {
        Ok(self.records.read().values().cloned().collect())
    }
}
