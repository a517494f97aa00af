use std::fs;
use std::path::{Path, PathBuf};

use filetime::FileTime;

use crate::error::{Error, Result};
use crate::fsutil;

#[derive(Debug, Clone)]
pub struct StagingTree {
    root: PathBuf,
}

impl StagingTree {
    pub fn prepare(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fsutil::remove_path_if_exists(&root)?;
        fsutil::ensure_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // Rejects paths that would leave the root through a symlinked directory
    // (an archive entry like `var/run -> /run`).
    pub fn resolve(&self, image_path: &str) -> Result<PathBuf> {
        fsutil::contained_path(&self.root, &fsutil::image_rel_path(image_path)?)
    }

    pub fn copy_in(&self, target: &str, source: &Path) -> Result<()> {
        let dst = self.resolve(target)?;
        if !source.exists() {
            return Err(Error::io(format!(
                "source for '{target}' not found: {}",
                source.display()
            )));
        }
        tracing::debug!(target, source = %source.display(), "copy into staging root");
        fsutil::copy_path_deref(source, &dst)
    }

    // Declaration order; a later item for the same target wins.
    pub fn copy_items(&self, items: &[(String, PathBuf)]) -> Result<()> {
        for (target, source) in items {
            self.copy_in(target, source)?;
        }
        Ok(())
    }

    pub fn exclude<S: AsRef<str>>(&self, paths: &[S]) -> Result<()> {
        for raw in paths {
            let raw = raw.as_ref();
            let rel = fsutil::image_rel_path(raw)?;
            // Nothing under a symlinked directory belongs to this tree.
            if let Some(link) = fsutil::symlinked_parent(&self.root, &rel) {
                tracing::warn!(
                    path = raw,
                    symlink = %link.display(),
                    "exclude skipped: path passes through a symlink"
                );
                continue;
            }
            tracing::debug!(path = raw, "exclude");
            fsutil::remove_path_if_exists(&self.root.join(rel))?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> Result<bool> {
        let mut it = fs::read_dir(&self.root)
            .map_err(|e| Error::io(format!("failed to read {}: {e}", self.root.display())))?;
        Ok(it.next().is_none())
    }

    // Symlinks are touched themselves, never their targets.
    pub fn clamp_mtimes(&self, epoch: i64) -> Result<()> {
        let ts = FileTime::from_unix_time(epoch, 0);
        // Children first, so touching a directory's entries does not bump
        // the directory again afterwards.
        for entry in walkdir::WalkDir::new(&self.root).contents_first(true) {
            let entry = entry.map_err(|e| Error::io(format!("walkdir error: {e}")))?;
            filetime::set_symlink_file_times(entry.path(), ts, ts).map_err(|e| {
                Error::io(format!(
                    "failed to set mtime on {}: {e}",
                    entry.path().display()
                ))
            })?;
        }
        Ok(())
    }
}
