//! Scan registry: id to record map owned by the service.

use crate::core::error::{Error, Result};
use crate::scanner::record::ScanRecord;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Process-wide set of scan records, safe for concurrent insert and lookup.
#[derive(Debug, Default)]
pub struct ScanRegistry {
    records: RwLock<HashMap<String, Arc<ScanRecord>>>,
}

impl ScanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record and return the shared handle.
    pub fn insert(&self, record: ScanRecord) -> Result<Arc<ScanRecord>> {
        let record = Arc::new(record);
        self.records
            .write()
            .map_err(|_| Error::lock_poisoned("scan registry (insert)"))?
            .insert(record.id().to_string(), Arc::clone(&record));
        Ok(record)
    }

    pub fn get(&self, scan_id: &str) -> Result<Arc<ScanRecord>> {
        self.records
            .read()
            .map_err(|_| Error::lock_poisoned("scan registry (get)"))?
            .get(scan_id)
            .cloned()
            .ok_or_else(|| Error::ScanNotFound(scan_id.to_string()))
    }

    pub fn remove(&self, scan_id: &str) -> Result<Arc<ScanRecord>> {
        self.records
            .write()
            .map_err(|_| Error::lock_poisoned("scan registry (remove)"))?
            .remove(scan_id)
            .ok_or_else(|| Error::ScanNotFound(scan_id.to_string()))
    }

    /// All records, oldest first.
    pub fn list(&self) -> Result<Vec<Arc<ScanRecord>>> {
        let mut records: Vec<_> = self
            .records
            .read()
            .map_err(|_| Error::lock_poisoned("scan registry (list)"))?
            .values()
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at());
        Ok(records)
    }

    /// Records for one ticket, oldest first.
    pub fn for_ticket(&self, ticket_id: &str) -> Result<Vec<Arc<ScanRecord>>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.ticket_id() == ticket_id)
            .collect())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
