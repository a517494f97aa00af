use std::fs;
use std::path::{Path, PathBuf};

use crate::builders::BuildContext;
use crate::config::{ComponentDeclaration, FsType, PartitionSpec};
use crate::error::{Error, Result};
use crate::fsutil;
use crate::manifest::ComponentMetadata;
use crate::runner::ToolCommand;
use crate::staging::StagingTree;

const MIB: u64 = 1024 * 1024;

pub fn build(
    ctx: &BuildContext<'_>,
    decl: &ComponentDeclaration,
    spec: &PartitionSpec,
    meta: &mut ComponentMetadata,
) -> Result<PathBuf> {
    let id = meta.id.as_str();
    tracing::info!(
        component = id,
        size_mb = spec.size_mb,
        fs = spec.fs_type.as_str(),
        "building raw image"
    );

    let stage = StagingTree::prepare(ctx.staging_root(id))?;
    stage.copy_items(&spec.items)?;
    stage.exclude(&decl.exclude)?;
    if let Some(epoch) = ctx.source_date_epoch {
        stage.clamp_mtimes(epoch)?;
    }

    let image = ctx.work_dir.join(format!("{id}.{}", spec.fs_type.as_str()));
    allocate_image(&image, spec.size_mb)?;
    format_image(ctx, spec, stage.root(), &image)?;

    let out = ctx.artifact_path(meta);
    compress_image(ctx, &image, &out)?;
    Ok(out)
}

pub fn allocate_image(path: &Path, size_mb: u64) -> Result<()> {
    let len = size_mb
        .checked_mul(MIB)
        .ok_or_else(|| Error::config(format!("partition size {size_mb} MiB is too large")))?;
    if let Some(parent) = path.parent() {
        fsutil::ensure_dir(parent)?;
    }
    fsutil::remove_path_if_exists(path)?;
    let file = fs::File::create(path)
        .map_err(|e| Error::io(format!("failed to create {}: {e}", path.display())))?;
    file.set_len(len)
        .map_err(|e| Error::io(format!("failed to size {}: {e}", path.display())))?;
    Ok(())
}

fn format_image(
    ctx: &BuildContext<'_>,
    spec: &PartitionSpec,
    root: &Path,
    image: &Path,
) -> Result<()> {
    let mut cmd = match spec.fs_type {
        FsType::Ext4 => ToolCommand::new("mkfs.ext4").args(["-F", "-E", "root_owner=0:0"]),
    };
    if let Some(label) = &spec.label {
        cmd = cmd.arg("-L").arg(label);
    }
    if let Some(uuid) = &spec.gpt_type {
        cmd = cmd.arg("-U").arg(uuid);
    }
    cmd = cmd.arg("-d").arg(root).arg(image);
    if let Some(epoch) = ctx.source_date_epoch {
        cmd = cmd.env("E2FSPROGS_FAKE_TIME", epoch.to_string());
    }
    ctx.tools.run(&cmd)?;
    Ok(())
}

// gzip replaces `image` with `image.gz`; -n keeps name and mtime out of the
// header.
fn compress_image(ctx: &BuildContext<'_>, image: &Path, out: &Path) -> Result<()> {
    ctx.tools
        .run(&ToolCommand::new("gzip").args(["-f", "-n"]).arg(image))?;

    let mut compressed = image.as_os_str().to_os_string();
    compressed.push(".gz");
    let compressed = PathBuf::from(compressed);
    fs::rename(&compressed, out).map_err(|e| {
        Error::io(format!(
            "failed to move {} -> {}: {e}",
            compressed.display(),
            out.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_image_has_exact_size_and_is_zeroed() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let img = tmp.path().join("work/boot.ext4");

        allocate_image(&img, 2).expect("allocate");
        let data = fs::read(&img).expect("read");
        assert_eq!(data.len() as u64, 2 * MIB);
        assert!(data.iter().all(|b| *b == 0));
    }

    #[test]
    fn allocate_image_truncates_previous_content() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let img = tmp.path().join("boot.ext4");
        fs::write(&img, vec![0xffu8; 4096]).expect("write");

        allocate_image(&img, 1).expect("allocate");
        let data = fs::read(&img).expect("read");
        assert_eq!(data.len() as u64, MIB);
        assert!(data.iter().all(|b| *b == 0));
    }

    #[test]
    fn oversized_partition_is_a_config_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = allocate_image(&tmp.path().join("x"), u64::MAX).expect_err("overflow");
        assert!(err.is_config());
    }
}
