use std::env;
use std::path::{Path, PathBuf};

use crate::config::{BundleConfig, ComponentMethod};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCheck {
    pub tool: &'static str,
    pub purpose: &'static str,
    pub found: Option<PathBuf>,
}

pub fn required_tools(cfg: &BundleConfig) -> Vec<(&'static str, &'static str)> {
    let mut out: Vec<(&'static str, &'static str)> = Vec::new();
    let mut add = |tool: &'static str, purpose: &'static str| {
        if !out.iter().any(|(t, _)| *t == tool) {
            out.push((tool, purpose));
        }
    };
    for decl in cfg.enabled() {
        match &decl.method {
            ComponentMethod::Raw(_) => {
                add("mkfs.ext4", "format raw partition images");
                add("gzip", "compress raw partition images");
            }
            ComponentMethod::Overlay(_) => {
                add("tar", "extract base rootfs archives");
                add("ostree", "commit and diff rootfs snapshots");
                add("mksquashfs", "pack overlay images");
            }
            ComponentMethod::Custom(_) => {}
        }
    }
    add("tar", "create the bundle archive");
    out
}

pub fn check_host_tools(cfg: &BundleConfig) -> Vec<ToolCheck> {
    required_tools(cfg)
        .into_iter()
        .map(|(tool, purpose)| ToolCheck {
            tool,
            purpose,
            found: which(tool),
        })
        .collect()
}

pub fn ensure_host_tools(cfg: &BundleConfig) -> Result<()> {
    let checks = check_host_tools(cfg);
    for c in &checks {
        if let Some(path) = &c.found {
            tracing::debug!(tool = c.tool, path = %path.display(), "found host tool");
        }
    }
    let missing: Vec<String> = checks
        .iter()
        .filter(|c| c.found.is_none())
        .map(|c| format!("{} ({})", c.tool, c.purpose))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(Error::config(format!(
        "missing host tools: {}",
        missing.join(", ")
    )))
}

pub fn which(tool: &str) -> Option<PathBuf> {
    if tool.contains('/') {
        let p = PathBuf::from(tool);
        return is_executable(&p).then_some(p);
    }
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(tool))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(p: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    p.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(p: &Path) -> bool {
    p.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigDoc;

    fn cfg(raw: &str) -> BundleConfig {
        let doc = ConfigDoc::from_toml_str("t.toml", raw).expect("parse");
        BundleConfig::from_doc(&doc).expect("config")
    }

    #[test]
    fn which_finds_sh_and_not_nonsense() {
        assert!(which("sh").is_some());
        assert!(which("definitely_not_a_real_command_12345").is_none());
    }

    #[test]
    fn tools_follow_enabled_methods() {
        let c = cfg(r#"
work_dir = "w"
target_images = ["out.tar"]

[components.boot]
method = "raw"
vendorVersion = "1"
partition = { size = 8 }

[components.fw]
method = "custom"
vendorVersion = "1"
file = "fw.bin"
"#);
        let tools: Vec<&str> = required_tools(&c).into_iter().map(|(t, _)| t).collect();
        assert_eq!(tools, vec!["mkfs.ext4", "gzip", "tar"]);
    }

    #[test]
    fn disabled_components_need_nothing() {
        let c = cfg(r#"
work_dir = "w"
target_images = ["out.tar"]

[components.root]
enabled = false
method = "overlay"
"#);
        let tools: Vec<&str> = required_tools(&c).into_iter().map(|(t, _)| t).collect();
        assert_eq!(tools, vec!["tar"]);
    }
}
