use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::builders::{self, BuildContext};
use crate::config::{BundleConfig, ComponentEntry};
use crate::error::{Error, Result};
use crate::fsutil;
use crate::manifest::{ComponentMetadata, MANIFEST_FILE_NAME, ManifestBuilder};
use crate::report;
use crate::runner::{ToolCommand, ToolInvoker};
use crate::staging::StagingTree;

pub const BUNDLE_DIR_NAME: &str = "bundle";

#[derive(Debug, Clone)]
pub struct BundleSummary {
    pub manifest: PathBuf,
    pub archive: PathBuf,
    pub components: Vec<ComponentMetadata>,
    pub skipped: Vec<String>,
    pub report: Option<PathBuf>,
}

pub struct BundlePipeline<'a> {
    cfg: &'a BundleConfig,
    tools: &'a dyn ToolInvoker,
}

impl<'a> BundlePipeline<'a> {
    pub fn new(cfg: &'a BundleConfig, tools: &'a dyn ToolInvoker) -> Self {
        Self { cfg, tools }
    }

    pub fn bundle_dir(&self) -> PathBuf {
        self.cfg.work_dir.join(BUNDLE_DIR_NAME)
    }

    // Touches nothing on disk.
    pub fn plan(&self) -> Result<Vec<ComponentMetadata>> {
        let metas: Vec<ComponentMetadata> = self
            .cfg
            .enabled()
            .map(ComponentMetadata::for_declaration)
            .collect();
        validate_components(&metas)?;
        Ok(metas)
    }

    pub fn run(&self) -> Result<BundleSummary> {
        self.plan()?;

        let bundle = StagingTree::prepare(self.bundle_dir())?;
        let ctx = BuildContext {
            work_dir: &self.cfg.work_dir,
            bundle_dir: bundle.root(),
            ostree_repo: &self.cfg.ostree_repo,
            source_date_epoch: self.cfg.source_date_epoch,
            tools: self.tools,
        };

        let mut manifest = ManifestBuilder::new();
        let mut artifacts = Vec::new();
        let mut skipped = Vec::new();
        for entry in &self.cfg.components {
            let decl = match entry {
                ComponentEntry::Disabled { name } => {
                    tracing::info!(component = name.as_str(), "skipped (disabled)");
                    skipped.push(name.clone());
                    continue;
                }
                ComponentEntry::Enabled(decl) => decl,
            };
            tracing::info!(
                component = decl.name.as_str(),
                method = decl.method.name(),
                "processing"
            );
            let mut meta = ComponentMetadata::for_declaration(decl);
            let artifact = builders::build_component(&ctx, decl, &mut meta)?;
            artifacts.push((meta.file_name.clone(), artifact));
            manifest.push(meta);
        }

        let components = manifest.components().to_vec();
        let manifest_path = manifest.finalize(bundle.root())?;
        self.archive(bundle.root())?;

        let report = if self.cfg.report {
            Some(report::write_report(
                &self.cfg.work_dir,
                &artifacts,
                &self.cfg.target,
            )?)
        } else {
            None
        };

        tracing::info!(archive = %self.cfg.target.display(), "bundle complete");
        Ok(BundleSummary {
            manifest: manifest_path,
            archive: self.cfg.target.clone(),
            components,
            skipped,
            report,
        })
    }

    // Pack the directory's contents, not the directory itself.
    fn archive(&self, bundle_dir: &Path) -> Result<()> {
        if let Some(parent) = self.cfg.target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fsutil::ensure_dir(parent)?;
        }
        self.tools.run(
            &ToolCommand::new("tar")
                .arg("-cf")
                .arg(&self.cfg.target)
                .arg("-C")
                .arg(bundle_dir)
                .arg("."),
        )?;
        Ok(())
    }
}

pub fn validate_components(metas: &[ComponentMetadata]) -> Result<()> {
    let mut ids = BTreeMap::<&str, usize>::new();
    let mut files = BTreeMap::<&str, &str>::new();
    for (idx, meta) in metas.iter().enumerate() {
        validate_plain_name("component id", &meta.id)?;
        validate_plain_name("fileName", &meta.file_name)?;
        if meta.file_name == MANIFEST_FILE_NAME {
            return Err(Error::config(format!(
                "component '{}' uses the reserved fileName '{MANIFEST_FILE_NAME}'",
                meta.id
            )));
        }
        if ids.insert(&meta.id, idx).is_some() {
            return Err(Error::config(format!(
                "component id '{}' is declared more than once",
                meta.id
            )));
        }
        if let Some(other) = files.insert(&meta.file_name, &meta.id) {
            return Err(Error::config(format!(
                "components '{other}' and '{}' both produce fileName '{}'",
                meta.id, meta.file_name
            )));
        }
    }
    Ok(())
}

fn validate_plain_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
    {
        return Err(Error::config(format!(
            "{what} '{name}' must be a plain file name"
        )));
    }
    Ok(())
}
