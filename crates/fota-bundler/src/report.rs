use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::fsutil;

pub const REPORT_FILE_NAME: &str = "bundle-report.json";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDigest {
    pub file_name: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleReport {
    pub generated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArtifactDigest>,
    pub artifacts: Vec<ArtifactDigest>,
}

pub fn digest(file_name: &str, path: &Path) -> Result<ArtifactDigest> {
    let size = fs::metadata(path)
        .map_err(|e| Error::io(format!("failed to stat {}: {e}", path.display())))?
        .len();
    Ok(ArtifactDigest {
        file_name: file_name.to_string(),
        size,
        sha256: sha256_file_hex(path)?,
    })
}

pub fn sha256_file_hex(path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};

    let mut file = fs::File::open(path)
        .map_err(|e| Error::io(format!("failed to open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 1024 * 256];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::io(format!("failed to read {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn write_report(
    work_dir: &Path,
    artifacts: &[(String, PathBuf)],
    archive: &Path,
) -> Result<PathBuf> {
    let artifacts = artifacts
        .iter()
        .map(|(name, path)| digest(name, path))
        .collect::<Result<Vec<_>>>()?;
    let archive = if archive.is_file() {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Some(digest(&name, archive)?)
    } else {
        None
    };
    let report = BundleReport {
        generated_at: chrono::Utc::now().to_rfc3339(),
        archive,
        artifacts,
    };
    let raw = serde_json::to_string_pretty(&report)
        .map_err(|e| Error::io(format!("report encode error: {e}")))?;
    let path = work_dir.join(REPORT_FILE_NAME);
    fsutil::write_text(&path, &raw)?;
    tracing::info!(path = %path.display(), "wrote bundle report");
    Ok(path)
}
