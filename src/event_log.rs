use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Error;
use crate::incident::{Incident, Snapshot};

/// Append-only record of incidents shared with presentation layers.
///
/// Cloning yields another handle onto the same store. Every mutation holds
/// the write lock for its whole duration, so readers see either the old
/// list or the new one, never a half-written record.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    inner: Arc<RwLock<Vec<Incident>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    // mutations are a single push or field update, poisoning leaves no torn record
    fn read(&self) -> RwLockReadGuard<'_, Vec<Incident>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Incident>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn append(&self, incident: Incident) {
        self.write().push(incident);
    }

    /// Ordered copy of every record.
    pub fn list(&self) -> Vec<Incident> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, id: u64) -> Option<Incident> {
        self.read().iter().find(|i| i.id == id).cloned()
    }

    /// Only for an explicit new-session boundary.
    pub fn reset(&self) {
        self.write().clear();
    }

    /// Applies `f` to the still-open incident `id`. Closed incidents are
    /// immutable; the call is ignored for them and `false` is returned.
    pub(crate) fn update<F>(&self, id: u64, f: F) -> bool
    where
        F: FnOnce(&mut Incident),
    {
        let mut guard = self.write();
        match guard.iter_mut().rev().find(|i| i.id == id) {
            Some(incident) if !incident.closed => {
                f(incident);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn attach_snapshot(&self, id: u64, snapshot: Snapshot) -> bool {
        self.update(id, |i| i.snapshots.push(snapshot))
    }

    /// Serialises the whole list as pretty JSON for dashboards.
    pub fn write_json(&self, path: &Path) -> Result<(), Error> {
        let body = serde_json::to_vec_pretty(&*self.read())?;
        std::fs::write(path, body).map_err(|e| Error::storage(path, e))
    }
}
