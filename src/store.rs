use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use log::warn;

use crate::flag::Flag;

/// Store is an interface for a local snapshot of flags. When a flag is present in the store,
/// [crate::GeoFeatures] evaluates it locally instead of asking the flag service.
pub trait Store: Send + Sync {
    /// Retrieve the flag named `name`.
    fn flag(&self, name: &str) -> Option<Flag>;
}

/// MemoryStore is the default [Store]: flags keyed by name, replaced wholesale by a sync and
/// patched by administrative changes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    flags: RwLock<HashMap<String, Flag>>,
    initialized: RwLock<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot with `flags` and marks the store as initialized. Flags with an
    /// empty name are skipped.
    pub fn replace_all(&self, flags: Vec<Flag>) {
        let flags = flags
            .into_iter()
            .filter(|flag| {
                if flag.name.is_empty() {
                    warn!("skipping flag without a name (id {:?})", flag.id);
                    false
                } else {
                    true
                }
            })
            .map(|flag| (flag.name.clone(), flag))
            .collect();

        *self.flags.write().unwrap_or_else(PoisonError::into_inner) = flags;
        *self.initialized.write().unwrap_or_else(PoisonError::into_inner) = true;
    }

    /// Inserts or replaces a flag, unless the stored copy is known to be newer. Returns whether
    /// the store changed.
    pub fn upsert(&self, flag: Flag) -> bool {
        if flag.name.is_empty() {
            return false;
        }
        let mut flags = self.flags.write().unwrap_or_else(PoisonError::into_inner);
        // A rename keeps the id, so drop any entry for the same id under another name.
        flags.retain(|name, existing| name == &flag.name || !existing.is_same_feature(&flag));
        match flags.get(&flag.name) {
            Some(existing) if existing.is_newer_than(&flag) => false,
            _ => {
                flags.insert(flag.name.clone(), flag);
                true
            }
        }
    }

    /// Removes the flag with the given id. Returns whether one was removed.
    pub fn remove_by_id(&self, id: &str) -> bool {
        let mut flags = self.flags.write().unwrap_or_else(PoisonError::into_inner);
        let before = flags.len();
        flags.retain(|_, flag| flag.id.as_deref() != Some(id));
        flags.len() != before
    }

    pub fn clear(&self) {
        self.flags
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        *self.initialized.write().unwrap_or_else(PoisonError::into_inner) = false;
    }

    /// True once [MemoryStore::replace_all] has run and until [MemoryStore::clear].
    pub fn is_initialized(&self) -> bool {
        *self.initialized.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.flags.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn flag(&self, name: &str) -> Option<Flag> {
        self.flags
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}
