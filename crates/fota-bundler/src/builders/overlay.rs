use std::path::{Path, PathBuf};

use crate::builders::BuildContext;
use crate::config::{ComponentDeclaration, OverlayKind, OverlaySpec};
use crate::delta;
use crate::error::{Error, Result};
use crate::manifest::ComponentMetadata;
use crate::runner::ToolCommand;
use crate::snapshot::SnapshotStore;
use crate::staging::StagingTree;

pub fn build(
    ctx: &BuildContext<'_>,
    decl: &ComponentDeclaration,
    spec: &OverlaySpec,
    meta: &mut ComponentMetadata,
) -> Result<PathBuf> {
    meta.annotate("type", spec.kind.as_str());
    let id = meta.id.as_str();
    tracing::info!(component = id, kind = spec.kind.as_str(), "building overlay image");

    // Staging
    let stage = StagingTree::prepare(ctx.staging_root(id))?;
    extract_base(ctx, &spec.rootfs, stage.root())?;
    stage.copy_items(&spec.items)?;
    stage.exclude(&decl.exclude)?;
    if let Some(epoch) = ctx.source_date_epoch {
        stage.clamp_mtimes(epoch)?;
    }

    // Committed
    let store = SnapshotStore::new(ctx.ostree_repo, ctx.tools);
    store.ensure_initialized()?;
    store.commit(stage.root(), &meta.vendor_version)?;

    let out = ctx.artifact_path(meta);
    match &spec.kind {
        OverlayKind::Full => pack(ctx, stage.root(), &out)?,
        OverlayKind::Incremental { base_version } => {
            let delta_tree = StagingTree::prepare(ctx.delta_root(id))?;
            let entries = store.diff(&meta.vendor_version, base_version)?;
            let ops = delta::plan_delta(stage.root(), &entries)?;
            tracing::info!(
                component = id,
                base = base_version.as_str(),
                changes = ops.len(),
                "computed delta"
            );
            delta::materialize(stage.root(), delta_tree.root(), &ops)?;
            if delta_tree.is_empty()? {
                tracing::warn!(component = id, "incremental rootfs update is empty");
            }
            if let Some(epoch) = ctx.source_date_epoch {
                delta_tree.clamp_mtimes(epoch)?;
            }
            pack(ctx, delta_tree.root(), &out)?;
        }
    }
    Ok(out)
}

fn extract_base(ctx: &BuildContext<'_>, archive: &Path, root: &Path) -> Result<()> {
    if !archive.is_file() {
        return Err(Error::io(format!(
            "rootfs archive not found: {}",
            archive.display()
        )));
    }
    // tar picks the decompressor from the archive itself.
    ctx.tools.run(
        &ToolCommand::new("tar")
            .arg("-C")
            .arg(root)
            .arg("-xf")
            .arg(archive),
    )?;
    Ok(())
}

fn pack(ctx: &BuildContext<'_>, src: &Path, out: &Path) -> Result<()> {
    let mut cmd = ToolCommand::new("mksquashfs")
        .arg(src)
        .arg(out)
        .args(["-noappend", "-wildcards", "-all-root"]);
    if let Some(epoch) = ctx.source_date_epoch {
        cmd = cmd
            .arg("-mkfs-time")
            .arg(epoch.to_string())
            .arg("-all-time")
            .arg(epoch.to_string());
    }
    ctx.tools.run(&cmd)?;
    Ok(())
}
