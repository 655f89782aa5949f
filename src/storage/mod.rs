mod json_catalog;
mod override_store;

pub use json_catalog::CatalogStore;
pub use override_store::OverrideStore;

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EffectError, Result};

/// The two catalog documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogName {
    /// Built-in entries, seeded at deployment and never written by clients.
    Default,
    /// User-created entries.
    Custom,
}

impl CatalogName {
    pub fn as_str(self) -> &'static str {
        match self {
            CatalogName::Default => "default",
            CatalogName::Custom => "custom",
        }
    }

    pub fn is_writable(self) -> bool {
        matches!(self, CatalogName::Custom)
    }
}

impl std::fmt::Display for CatalogName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CatalogName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "default" => Ok(CatalogName::Default),
            "custom" => Ok(CatalogName::Custom),
            _ => Err(format!("Invalid catalog: {}", s)),
        }
    }
}

/// Result of removing a key. Not-found is an outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

impl DeleteOutcome {
    pub fn is_deleted(self) -> bool {
        matches!(self, DeleteOutcome::Deleted)
    }
}

/// Read a JSON document. A missing or blank file is the empty document; a
/// document that does not parse is reported as corrupt.
pub(crate) fn read_json_document<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(e.into()),
    };
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&raw).map_err(|e| EffectError::CorruptCatalog {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Replace `path` with the pretty-printed JSON of `value`.
///
/// The document is written to a uniquely named sibling and renamed over the
/// target, so readers see either the old or the new document.
pub(crate) fn write_json_document<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let dir = path
        .parent()
        .ok_or_else(|| EffectError::Storage(format!("no parent directory: {}", path.display())))?;
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));
    fs::write(&tmp, json)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    type Doc = BTreeMap<String, String>;

    #[test]
    fn test_catalog_name_parse() {
        assert_eq!("custom".parse::<CatalogName>().unwrap(), CatalogName::Custom);
        assert_eq!("DEFAULT".parse::<CatalogName>().unwrap(), CatalogName::Default);
        assert!("other".parse::<CatalogName>().is_err());
        assert!(!CatalogName::Default.is_writable());
    }

    #[test]
    fn test_read_missing_and_blank() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("doc.json");
        let doc: Doc = read_json_document(&path).unwrap();
        assert!(doc.is_empty());

        fs::write(&path, "  \n").unwrap();
        let doc: Doc = read_json_document(&path).unwrap();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_read_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("doc.json");
        fs::write(&path, "[1, 2").unwrap();
        let result: Result<Doc> = read_json_document(&path);
        assert!(matches!(result, Err(EffectError::CorruptCatalog { .. })));
    }

    #[test]
    fn test_write_then_read() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/doc.json");
        let mut doc = Doc::new();
        doc.insert("a".into(), "b".into());
        write_json_document(&path, &doc).unwrap();

        let back: Doc = read_json_document(&path).unwrap();
        assert_eq!(back, doc);
        // Only the document itself is left behind.
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
