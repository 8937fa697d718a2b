use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::RedirectStore;
use crate::error::{RedirectError, Result, StoreErrorKind};
use crate::types::Redirect;

/// Store persisting all records as one JSON array file.
///
/// Every mutation rewrites the file through a temporary sibling and a rename,
/// so a crash never leaves a half-written file behind.
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, Redirect>>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let records = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => {
                let list: Vec<Redirect> = serde_json::from_slice(&bytes).map_err(|e| {
                    RedirectError::store(
                        StoreErrorKind::Corrupt,
                        format!("Cannot decode '{}': {}", path.display(), e),
                    )
                })?;
                list.into_iter().map(|r| (r.id.clone(), r)).collect()
            }
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(RedirectError::store(
                    StoreErrorKind::Read,
                    format!("Cannot read '{}': {}", path.display(), e),
                ))
            }
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &BTreeMap<String, Redirect>) -> Result<()> {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }

            let list: Vec<&Redirect> = records.values().collect();
            let bytes = serde_json::to_vec_pretty(&list)?;

            let tmp_path = self.path.with_extension("tmp");
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            drop(file);

            fs::rename(&tmp_path, &self.path)
        };

        write().map_err(|e| {
            RedirectError::store(
                StoreErrorKind::Write,
                format!("Cannot write '{}': {}", self.path.display(), e),
            )
        })
    }
}

impl RedirectStore for JsonFileStore {
    fn upsert(&self, redirect: &Redirect) -> Result<()> {
        let mut records = self.records.lock();
        let previous = records.insert(redirect.id.clone(), redirect.clone());

        if let Err(e) = self.persist(&records) {
            // Keep memory and file consistent
            match previous {
                Some(previous) => records.insert(redirect.id.clone(), previous),
                None => records.remove(&redirect.id),
            };
            return Err(e);
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut records = self.records.lock();
        let Some(previous) = records.remove(id) else {
            return Ok(());
        };

        if let Err(e) = self.persist(&records) {
            records.insert(id.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<Redirect>> {
        Ok(self.records.lock().values().cloned().collect())
    }
}
