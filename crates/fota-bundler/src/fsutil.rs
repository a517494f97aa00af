use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

pub fn ensure_dir(p: &Path) -> Result<()> {
    fs::create_dir_all(p)
        .map_err(|e| Error::io(format!("failed to create dir {}: {e}", p.display())))
}

pub fn write_text(p: &Path, s: &str) -> Result<()> {
    if let Some(parent) = p.parent() {
        ensure_dir(parent)?;
    }
    fs::write(p, s).map_err(|e| Error::io(format!("failed to write {}: {e}", p.display())))
}

// `/etc/hostname` and `etc/hostname` name the same in-image path.
pub fn image_rel_path(raw: &str) -> Result<PathBuf> {
    let rel = raw.trim().trim_start_matches('/');
    if rel.is_empty() {
        return Err(Error::config(format!("path '{raw}' is empty")));
    }
    let pb = PathBuf::from(rel);
    if pb
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return Err(Error::config(format!("path '{raw}' contains '..'")));
    }
    Ok(pb)
}

// First existing component of `rel` below `root`, excluding the last one,
// that is a symlink. Such a path would resolve outside the tree.
pub fn symlinked_parent(root: &Path, rel: &Path) -> Option<PathBuf> {
    let parent = rel.parent()?;
    let mut cur = root.to_path_buf();
    for comp in parent.components() {
        cur.push(comp);
        match fs::symlink_metadata(&cur) {
            Ok(meta) if meta.file_type().is_symlink() => return Some(cur),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
    None
}

pub fn contained_path(root: &Path, rel: &Path) -> Result<PathBuf> {
    if let Some(link) = symlinked_parent(root, rel) {
        return Err(Error::config(format!(
            "path '{}' passes through symlink {}",
            rel.display(),
            link.display()
        )));
    }
    Ok(root.join(rel))
}

// Files, symlinks and whole trees. Missing paths are fine.
pub fn remove_path_if_exists(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) => {
            if meta.file_type().is_dir() {
                fs::remove_dir_all(path).map_err(|e| {
                    Error::io(format!(
                        "failed to remove directory {}: {e}",
                        path.display()
                    ))
                })
            } else {
                fs::remove_file(path).map_err(|e| {
                    Error::io(format!("failed to remove {}: {e}", path.display()))
                })
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(format!(
            "failed to inspect {} before removal: {e}",
            path.display()
        ))),
    }
}

// `cp -L`: symlinked sources are dereferenced, existing files replaced.
pub fn copy_path_deref(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::metadata(src)
        .map_err(|e| Error::io(format!("failed to stat {}: {e}", src.display())))?;
    if meta.is_dir() {
        copy_dir_all(src, dst)
    } else {
        copy_file(src, dst)
    }
}

pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    if fs::symlink_metadata(dst).is_ok_and(|m| !m.is_dir()) {
        fs::remove_file(dst)
            .map_err(|e| Error::io(format!("failed to replace {}: {e}", dst.display())))?;
    }
    fs::copy(src, dst).map_err(|e| {
        Error::io(format!(
            "failed to copy {} -> {}: {e}",
            src.display(),
            dst.display()
        ))
    })?;
    Ok(())
}

fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    if fs::symlink_metadata(dst).is_ok_and(|m| m.file_type().is_symlink()) {
        remove_path_if_exists(dst)?;
    }
    ensure_dir(dst)?;
    for entry in walkdir::WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| Error::io(format!("walkdir error: {e}")))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::io(format!("strip_prefix failed: {e}")))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let out = dst.join(rel);
        // Never write through a symlink already sitting in the destination.
        if fs::symlink_metadata(&out).is_ok_and(|m| m.file_type().is_symlink()) {
            remove_path_if_exists(&out)?;
        }
        if entry.file_type().is_dir() {
            ensure_dir(&out)?;
        } else {
            copy_file(entry.path(), &out)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
pub fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    use std::os::unix::fs as unix_fs;

    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    remove_path_if_exists(dst)?;
    let target = fs::read_link(src)
        .map_err(|e| Error::io(format!("failed to read symlink {}: {e}", src.display())))?;
    unix_fs::symlink(&target, dst).map_err(|e| {
        Error::io(format!(
            "failed to create symlink {} -> {}: {e}",
            dst.display(),
            target.display()
        ))
    })
}

#[cfg(not(unix))]
pub fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    copy_file(src, dst)
}
