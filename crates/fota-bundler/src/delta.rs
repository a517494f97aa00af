// Tombstones are character devices 0:0 (the overlayfs whiteout); the
// installer removes whatever path carries one.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::fsutil;
use crate::snapshot::{DiffEntry, DiffStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOp {
    Dir(PathBuf),
    Copy(PathBuf),
    Tombstone(PathBuf),
}

impl DeltaOp {
    pub fn path(&self) -> &Path {
        match self {
            DeltaOp::Dir(p) | DeltaOp::Copy(p) | DeltaOp::Tombstone(p) => p,
        }
    }
}

pub fn plan_delta(stage_root: &Path, entries: &[DiffEntry]) -> Result<Vec<DeltaOp>> {
    let mut ops = Vec::with_capacity(entries.len());
    for entry in entries {
        let rel = fsutil::image_rel_path(&entry.path)?;
        // The symlink itself shows up as its own entry.
        if let Some(link) = fsutil::symlinked_parent(stage_root, &rel) {
            tracing::warn!(
                path = entry.path.as_str(),
                symlink = %link.display(),
                "diff entry below a symlink skipped"
            );
            continue;
        }
        let op = match entry.status {
            DiffStatus::Added | DiffStatus::Modified => {
                let is_dir = fs::symlink_metadata(stage_root.join(&rel))
                    .map(|m| m.is_dir())
                    .unwrap_or(false);
                if is_dir {
                    DeltaOp::Dir(rel)
                } else {
                    DeltaOp::Copy(rel)
                }
            }
            DiffStatus::Deleted => DeltaOp::Tombstone(rel),
        };
        ops.push(op);
    }
    Ok(ops)
}

pub fn materialize(stage_root: &Path, delta_root: &Path, ops: &[DeltaOp]) -> Result<()> {
    for op in ops {
        let dst = fsutil::contained_path(delta_root, op.path())?;
        match op {
            DeltaOp::Dir(_) => {
                if fs::symlink_metadata(&dst).is_ok_and(|m| m.file_type().is_symlink()) {
                    fsutil::remove_path_if_exists(&dst)?;
                }
                fsutil::ensure_dir(&dst)?
            }
            DeltaOp::Copy(rel) => {
                let src = fsutil::contained_path(stage_root, rel)?;
                let meta = fs::symlink_metadata(&src).map_err(|e| {
                    Error::io(format!("changed path missing from {}: {e}", src.display()))
                })?;
                let ft = meta.file_type();
                if ft.is_symlink() {
                    fsutil::copy_symlink(&src, &dst)?;
                } else if ft.is_file() {
                    fsutil::copy_file(&src, &dst)?;
                } else {
                    return Err(Error::io(format!(
                        "unsupported file type in delta: {}",
                        src.display()
                    )));
                }
            }
            DeltaOp::Tombstone(_) => {
                if let Some(parent) = dst.parent() {
                    fsutil::ensure_dir(parent)?;
                }
                fsutil::remove_path_if_exists(&dst)?;
                write_tombstone(&dst)?;
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
pub fn write_tombstone(path: &Path) -> Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::io(format!("path contains NUL: {}", path.display())))?;
    let rc = unsafe { libc::mknod(c_path.as_ptr(), libc::S_IFCHR, libc::makedev(0, 0)) };
    if rc != 0 {
        let e = std::io::Error::last_os_error();
        return Err(Error::io(format!(
            "failed to create tombstone {}: {e}",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn write_tombstone(path: &Path) -> Result<()> {
    Err(Error::io(format!(
        "tombstones require a unix host: {}",
        path.display()
    )))
}

#[cfg(unix)]
pub fn is_tombstone(path: &Path) -> bool {
    use std::os::unix::fs::{FileTypeExt, MetadataExt};

    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_char_device() && m.rdev() == 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_tombstone(_path: &Path) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status: DiffStatus, path: &str) -> DiffEntry {
        DiffEntry {
            status,
            path: path.into(),
        }
    }

    #[test]
    fn plan_distinguishes_directories_from_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("opt/app")).expect("mkdir");
        fs::write(tmp.path().join("opt/app/run"), "#!/bin/sh\n").expect("write");

        let ops = plan_delta(
            tmp.path(),
            &[
                entry(DiffStatus::Added, "opt/app"),
                entry(DiffStatus::Modified, "opt/app/run"),
                entry(DiffStatus::Deleted, "etc/foo.conf"),
            ],
        )
        .expect("plan");
        assert_eq!(
            ops,
            vec![
                DeltaOp::Dir("opt/app".into()),
                DeltaOp::Copy("opt/app/run".into()),
                DeltaOp::Tombstone("etc/foo.conf".into()),
            ]
        );
    }

    #[test]
    fn plan_rejects_paths_escaping_the_tree() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = plan_delta(tmp.path(), &[entry(DiffStatus::Added, "../etc/passwd")])
            .expect_err("escape");
        assert!(err.is_config());
    }

    #[test]
    fn materialize_copies_current_content() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let stage = tmp.path().join("stage");
        let delta = tmp.path().join("delta");
        fs::create_dir_all(stage.join("etc")).expect("mkdir");
        fs::write(stage.join("etc/app.conf"), "v2").expect("write");
        fs::create_dir_all(stage.join("var/lib/app")).expect("mkdir");

        let ops = vec![
            DeltaOp::Copy("etc/app.conf".into()),
            DeltaOp::Dir("var/lib/app".into()),
        ];
        materialize(&stage, &delta, &ops).expect("materialize");
        assert_eq!(
            fs::read_to_string(delta.join("etc/app.conf")).expect("read"),
            "v2"
        );
        assert!(delta.join("var/lib/app").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn materialize_keeps_symlinks_as_symlinks() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let stage = tmp.path().join("stage");
        let delta = tmp.path().join("delta");
        fs::create_dir_all(stage.join("etc")).expect("mkdir");
        std::os::unix::fs::symlink("/run/resolv.conf", stage.join("etc/resolv.conf"))
            .expect("symlink");

        materialize(&stage, &delta, &[DeltaOp::Copy("etc/resolv.conf".into())])
            .expect("materialize");
        assert_eq!(
            fs::read_link(delta.join("etc/resolv.conf")).expect("readlink"),
            PathBuf::from("/run/resolv.conf")
        );
    }

    #[cfg(unix)]
    #[test]
    fn plan_skips_entries_below_symlinked_directories() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let host = tmp.path().join("host_run");
        fs::create_dir_all(&host).expect("mkdir");
        fs::write(host.join("secret"), "host").expect("write");
        let stage = tmp.path().join("stage");
        fs::create_dir_all(stage.join("var")).expect("mkdir");
        std::os::unix::fs::symlink(&host, stage.join("var/run")).expect("symlink");

        let ops = plan_delta(
            &stage,
            &[
                entry(DiffStatus::Added, "/var/run"),
                entry(DiffStatus::Added, "/var/run/secret"),
                entry(DiffStatus::Deleted, "/var/run/old"),
            ],
        )
        .expect("plan");
        assert_eq!(ops, vec![DeltaOp::Copy("var/run".into())]);
    }

    #[cfg(unix)]
    #[test]
    fn materialize_never_writes_through_copied_symlinks() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let host = tmp.path().join("host_run");
        fs::create_dir_all(&host).expect("mkdir");
        let stage = tmp.path().join("stage");
        fs::create_dir_all(stage.join("var")).expect("mkdir");
        std::os::unix::fs::symlink(&host, stage.join("var/run")).expect("symlink");
        let delta = tmp.path().join("delta");

        let err = materialize(
            &stage,
            &delta,
            &[
                DeltaOp::Copy("var/run".into()),
                DeltaOp::Copy("var/run/pid".into()),
            ],
        )
        .expect_err("symlinked parent");
        assert!(err.is_config(), "{err}");
        assert!(
            fs::symlink_metadata(delta.join("var/run"))
                .expect("stat")
                .file_type()
                .is_symlink()
        );
        assert!(!host.join("pid").exists());
    }

    #[cfg(unix)]
    #[test]
    fn tombstone_is_a_zero_device_node() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let stage = tmp.path().join("stage");
        let delta = tmp.path().join("delta");
        fs::create_dir_all(&stage).expect("mkdir");

        // Whiteout-style nodes need CAP_MKNOD on older kernels.
        if let Err(e) = write_tombstone(&tmp.path().join("node-check")) {
            eprintln!("skipping: {e}");
            return;
        }

        materialize(&stage, &delta, &[DeltaOp::Tombstone("etc/foo.conf".into())])
            .expect("materialize");
        let marker = delta.join("etc/foo.conf");
        assert!(is_tombstone(&marker));
        assert!(!marker.is_file());
        assert_eq!(fs::symlink_metadata(&marker).expect("stat").len(), 0);
    }
}
