//! Local copies of generated manifests: dry-run export and uninstall backups

use crate::utils::errors::Result;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

/// Writes built manifests under `<root>/<group>/<component>/<file>` instead
/// of applying them.
///
/// Writers within one process are serialized through `lock`.
#[derive(Debug)]
pub struct ManifestDump {
    root: PathBuf,
    lock: Mutex<()>,
}

impl ManifestDump {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn write(&self, relative: &Path, contents: &[u8]) -> Result<PathBuf> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        crate::log_info!("[DRY RUN] wrote {}", path.display());
        Ok(path)
    }
}

/// Best-effort backup of everything an uninstall removes.
///
/// The directory is picked on first write: `<base>`, then `<base>-1`,
/// `<base>-2`, ... whichever does not exist yet.
#[derive(Debug)]
pub struct BackupDir {
    base: PathBuf,
    chosen: OnceLock<PathBuf>,
    lock: Mutex<()>,
}

impl BackupDir {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            chosen: OnceLock::new(),
            lock: Mutex::new(()),
        }
    }

    /// The directory in use, if anything has been written yet
    pub fn path(&self) -> Option<&Path> {
        self.chosen.get().map(PathBuf::as_path)
    }

    fn ensure_dir(&self) -> Result<&Path> {
        if let Some(dir) = self.chosen.get() {
            return Ok(dir.as_path());
        }

        let dir = next_free_dir(&self.base);
        std::fs::create_dir_all(&dir)?;
        crate::log_info!("Backing up removed resources to {}", dir.display());
        Ok(self.chosen.get_or_init(|| dir).as_path())
    }

    pub fn write(&self, file_name: &str, contents: &[u8]) -> Result<PathBuf> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let path = self.ensure_dir()?.join(file_name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}

fn next_free_dir(base: &Path) -> PathBuf {
    if !base.exists() {
        return base.to_path_buf();
    }

    let name = base
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    (1..)
        .map(|i| base.with_file_name(format!("{name}-{i}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| base.to_path_buf())
}
