use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use super::{read_json_document, write_json_document};
use crate::entity::{BuiltinOverride, OverrideSet};
use crate::error::{EffectError, Result};
use crate::propagation::{ChangeBus, ChangeKind, FileWatcher};

/// Persisted hide/patch state for built-in entries.
///
/// Holds an in-memory copy that every mutation updates before announcing
/// the change, so readers in this process never wait on disk. Other
/// processes sharing the file are picked up through [`watch`](Self::watch)
/// or an explicit [`reload`](Self::reload).
pub struct OverrideStore {
    path: PathBuf,
    state: RwLock<OverrideSet>,
    bus: ChangeBus,
    closed: AtomicBool,
}

impl OverrideStore {
    /// Open the store; a missing or corrupt file starts empty.
    pub fn open(path: PathBuf, bus: ChangeBus) -> Self {
        let state = read_json_document(&path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "override file unreadable, starting empty");
            OverrideSet::default()
        });
        Self::with_state(path, bus, state)
    }

    /// Open the store, failing on a corrupt file.
    pub fn open_strict(path: PathBuf, bus: ChangeBus) -> Result<Self> {
        let state = read_json_document(&path)?;
        Ok(Self::with_state(path, bus, state))
    }

    fn with_state(path: PathBuf, bus: ChangeBus, state: OverrideSet) -> Self {
        Self {
            path,
            state: RwLock::new(state),
            bus,
            closed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting writes and reloads.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> OverrideSet {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn disabled_keys(&self) -> BTreeSet<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .disabled_keys
            .clone()
    }

    pub fn disable(&self, key: &str) -> Result<bool> {
        self.mutate("disable", key, |set| set.disable(key))
    }

    pub fn enable(&self, key: &str) -> Result<bool> {
        self.mutate("enable", key, |set| set.enable(key))
    }

    /// Merge `patch` into the key's existing patch, field by field.
    pub fn set_patch(&self, key: &str, patch: &BuiltinOverride) -> Result<bool> {
        self.mutate("set_patch", key, |set| set.set_patch(key, patch))
    }

    pub fn remove_patch(&self, key: &str) -> Result<bool> {
        self.mutate("remove_patch", key, |set| set.remove_patch(key))
    }

    /// Forget every hidden key and patch.
    pub fn clear_all(&self) -> Result<bool> {
        self.mutate("clear_all", "*", OverrideSet::clear)
    }

    fn mutate<F>(&self, op: &str, key: &str, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut OverrideSet) -> bool,
    {
        if self.is_closed() {
            return Err(EffectError::Closed);
        }
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = state.clone();
        if !apply(&mut next) {
            debug!(op, key, "override unchanged");
            return Ok(false);
        }
        write_json_document(&self.path, &next)?;
        *state = next;
        drop(state);

        info!(op, key, "overrides updated");
        self.bus.publish(ChangeKind::Overrides);
        Ok(true)
    }

    /// Write the in-memory set to disk as is. Used by `init` to create the
    /// file.
    pub fn persist(&self) -> Result<()> {
        if self.is_closed() {
            return Err(EffectError::Closed);
        }
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        write_json_document(&self.path, &*state)
    }

    /// Re-read the file, replacing the in-memory copy if it changed on disk.
    /// Returns whether anything changed.
    pub fn reload(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        let on_disk: OverrideSet = match read_json_document(&self.path) {
            Ok(set) => set,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "override reload failed, keeping current state");
                return false;
            }
        };
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state == on_disk {
            return false;
        }
        *state = on_disk;
        drop(state);

        debug!(path = %self.path.display(), "overrides reloaded from disk");
        self.bus.publish_external(ChangeKind::Overrides);
        true
    }

    /// Reload whenever another process rewrites the file.
    pub fn watch(self: &Arc<Self>) -> Result<FileWatcher> {
        let store = Arc::downgrade(self);
        FileWatcher::spawn(&[self.path.clone()], move |_| {
            if let Some(store) = store.upgrade() {
                store.reload();
            }
        })
    }
}
