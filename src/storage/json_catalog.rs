use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{read_json_document, write_json_document, CatalogName, DeleteOutcome};
use crate::config::DeckConfig;
use crate::entity::{validate_key, PromptFields, PromptMap};
use crate::error::{EffectError, Result};
use crate::propagation::{ChangeBus, ChangeKind};

/// File-backed store for the `default` and `custom` catalogs.
///
/// Each catalog is one JSON object on disk, read and rewritten as a whole.
/// Writes are read-modify-write of the entire document with no locking: two
/// writers that overlap in time race, and the later commit wins, discarding
/// the other's change even when they touched different keys.
pub struct CatalogStore {
    default_path: PathBuf,
    custom_path: PathBuf,
    bus: Option<ChangeBus>,
}

impl CatalogStore {
    pub fn new(default_path: PathBuf, custom_path: PathBuf) -> Self {
        Self {
            default_path,
            custom_path,
            bus: None,
        }
    }

    /// Store using the file names from `config` inside `data_dir`.
    pub fn open(config: &DeckConfig, data_dir: &Path) -> Self {
        Self::new(config.default_path(data_dir), config.custom_path(data_dir))
    }

    /// Publish a change event on `bus` after every successful write.
    pub fn with_bus(mut self, bus: ChangeBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn path(&self, name: CatalogName) -> &Path {
        match name {
            CatalogName::Default => &self.default_path,
            CatalogName::Custom => &self.custom_path,
        }
    }

    /// Read a catalog for display. Never fails: a missing, unreadable or
    /// corrupt document reads as empty.
    pub fn read_catalog(&self, name: CatalogName) -> PromptMap {
        match self.read_catalog_strict(name) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(catalog = %name, error = %e, "catalog unreadable, serving empty");
                PromptMap::new()
            }
        }
    }

    /// Read a catalog, reporting corruption and I/O failures.
    pub fn read_catalog_strict(&self, name: CatalogName) -> Result<PromptMap> {
        read_json_document(self.path(name))
    }

    /// First half of a write: the current document.
    ///
    /// Unlike [`read_catalog`](Self::read_catalog) this refuses a corrupt
    /// document so a write never silently replaces it.
    pub fn load_document(&self, name: CatalogName) -> Result<PromptMap> {
        ensure_writable(name)?;
        self.read_catalog_strict(name)
    }

    /// Second half of a write: replace the whole document.
    pub fn commit_document(&self, name: CatalogName, doc: &PromptMap) -> Result<()> {
        ensure_writable(name)?;
        write_json_document(self.path(name), doc)
    }

    /// Insert or replace an entry, generating a key when none is given.
    /// Returns the effective key.
    pub fn upsert_entry(
        &self,
        name: CatalogName,
        key: Option<&str>,
        fields: &PromptFields,
    ) -> Result<String> {
        ensure_writable(name)?;
        let fields = fields.normalized();
        fields.validate_for_write()?;

        let mut doc = self.load_document(name)?;
        let key = match key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(k) => {
                validate_key(k)?;
                k.to_string()
            }
            None => generate_key(&doc),
        };
        let replaced = doc.insert(key.clone(), fields).is_some();
        self.commit_document(name, &doc)?;

        info!(catalog = %name, key = %key, replaced, "prompt saved");
        self.notify(name);
        Ok(key)
    }

    /// Remove an entry. An absent key leaves the document untouched.
    pub fn delete_entry(&self, name: CatalogName, key: &str) -> Result<DeleteOutcome> {
        let mut doc = self.load_document(name)?;
        if doc.remove(key).is_none() {
            debug!(catalog = %name, key = %key, "delete of absent key");
            return Ok(DeleteOutcome::NotFound);
        }
        self.commit_document(name, &doc)?;

        info!(catalog = %name, key = %key, "prompt deleted");
        self.notify(name);
        Ok(DeleteOutcome::Deleted)
    }

    /// Reset a catalog to the empty document.
    pub fn clear_catalog(&self, name: CatalogName) -> Result<()> {
        self.commit_document(name, &PromptMap::new())?;
        info!(catalog = %name, "catalog cleared");
        self.notify(name);
        Ok(())
    }

    /// Deployment-time write of the built-in catalog.
    pub fn seed_default(&self, doc: &PromptMap) -> Result<()> {
        write_json_document(&self.default_path, doc)?;
        info!(entries = doc.len(), "default catalog seeded");
        self.notify(CatalogName::Default);
        Ok(())
    }

    fn notify(&self, name: CatalogName) {
        if let Some(ref bus) = self.bus {
            bus.publish(ChangeKind::Catalog(name));
        }
    }
}

fn ensure_writable(name: CatalogName) -> Result<()> {
    if name.is_writable() {
        Ok(())
    } else {
        Err(EffectError::ReadOnlyCatalog(name.to_string()))
    }
}

/// `custom_<millis>_<64 random bits>`, unique within `doc`.
fn generate_key(doc: &PromptMap) -> String {
    loop {
        let entropy = Uuid::new_v4().simple().to_string();
        let key = format!("custom_{}_{}", Utc::now().timestamp_millis(), &entropy[..16]);
        if !doc.contains_key(&key) {
            return key;
        }
    }
}
