use std::path::{Path, PathBuf};

use crate::config::{ComponentDeclaration, ComponentMethod};
use crate::error::Result;
use crate::manifest::ComponentMetadata;
use crate::runner::ToolInvoker;

pub mod custom;
pub mod overlay;
pub mod raw;

pub struct BuildContext<'a> {
    pub work_dir: &'a Path,
    pub bundle_dir: &'a Path,
    pub ostree_repo: &'a Path,
    pub source_date_epoch: Option<i64>,
    pub tools: &'a dyn ToolInvoker,
}

impl BuildContext<'_> {
    pub fn staging_root(&self, id: &str) -> PathBuf {
        self.work_dir.join(format!("rootfs_{id}"))
    }

    pub fn delta_root(&self, id: &str) -> PathBuf {
        self.work_dir.join(format!("diff_{id}"))
    }

    pub fn artifact_path(&self, meta: &ComponentMetadata) -> PathBuf {
        self.bundle_dir.join(&meta.file_name)
    }
}

pub fn build_component(
    ctx: &BuildContext<'_>,
    decl: &ComponentDeclaration,
    meta: &mut ComponentMetadata,
) -> Result<PathBuf> {
    match &decl.method {
        ComponentMethod::Raw(spec) => raw::build(ctx, decl, spec, meta),
        ComponentMethod::Overlay(spec) => overlay::build(ctx, decl, spec, meta),
        ComponentMethod::Custom(spec) => custom::build(ctx, spec, meta),
    }
}
