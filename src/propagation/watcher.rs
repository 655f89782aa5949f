use std::ffi::OsString;
use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::error::{EffectError, Result};

/// Watches a set of files living in one directory.
///
/// The directory is watched rather than the files themselves because stores
/// replace their documents by rename, which would orphan a per-file watch.
/// The watch stops when this value is dropped.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    pub fn spawn<F>(files: &[PathBuf], on_change: F) -> Result<Self>
    where
        F: Fn(&Path) + Send + 'static,
    {
        let dir = files
            .first()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .ok_or_else(|| EffectError::Storage("no files to watch".to_string()))?;
        let names: Vec<OsString> = files
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_os_string()))
            .collect();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if !is_content_change(&event.kind) {
                        return;
                    }
                    for path in &event.paths {
                        let watched = path
                            .file_name()
                            .is_some_and(|name| names.iter().any(|n| n == name));
                        if watched {
                            debug!(path = %path.display(), kind = ?event.kind, "watched file changed");
                            on_change(path);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "file watcher error"),
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        debug!(dir = %dir.display(), "file watcher started");

        Ok(Self { _watcher: watcher })
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_reports_changes_to_watched_files_only() {
        let tmp = TempDir::new().unwrap();
        let watched = tmp.path().join("custom_prompt.json");
        std::fs::write(&watched, "{}").unwrap();

        let (tx, rx) = mpsc::channel();
        let _watcher = FileWatcher::spawn(&[watched.clone()], move |path| {
            let _ = tx.send(path.to_path_buf());
        })
        .unwrap();

        std::fs::write(tmp.path().join("unrelated.txt"), "x").unwrap();
        std::fs::write(&watched, r#"{"a":{}}"#).unwrap();

        let seen = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(seen.file_name(), watched.file_name());
    }

    #[test]
    fn test_requires_a_file() {
        let result = FileWatcher::spawn(&[], |_| {});
        assert!(result.is_err());
    }
}
