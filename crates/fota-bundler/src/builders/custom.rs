use std::path::PathBuf;

use crate::builders::BuildContext;
use crate::config::CustomSpec;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::manifest::ComponentMetadata;

pub fn build(
    ctx: &BuildContext<'_>,
    spec: &CustomSpec,
    meta: &ComponentMetadata,
) -> Result<PathBuf> {
    tracing::info!(
        component = meta.id.as_str(),
        file = %spec.file.display(),
        "copying custom artifact"
    );
    if !spec.file.is_file() {
        return Err(Error::io(format!(
            "custom component source not found: {}",
            spec.file.display()
        )));
    }
    let out = ctx.artifact_path(meta);
    fsutil::copy_file(&spec.file, &out)?;
    Ok(out)
}
