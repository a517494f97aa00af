use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fsutil;
use crate::runner::{ToolCommand, ToolInvoker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffStatus {
    Added,
    Modified,
    Deleted,
}

impl DiffStatus {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "A" => Some(Self::Added),
            "M" => Some(Self::Modified),
            "D" => Some(Self::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub status: DiffStatus,
    // no leading separator
    pub path: String,
}

// Anything but one known status token plus one path is skipped, so paths
// containing whitespace are dropped rather than truncated.
pub fn parse_diff(output: &str) -> Vec<DiffEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let (Some(status), Some(path), None) = (tokens.next(), tokens.next(), tokens.next())
            else {
                return None;
            };
            let status = DiffStatus::parse(status)?;
            let path = path.trim_start_matches('/');
            if path.is_empty() {
                return None;
            }
            Some(DiffEntry {
                status,
                path: path.to_string(),
            })
        })
        .collect()
}

pub struct SnapshotStore<'a> {
    repo: PathBuf,
    tools: &'a dyn ToolInvoker,
}

impl<'a> SnapshotStore<'a> {
    pub fn new(repo: impl Into<PathBuf>, tools: &'a dyn ToolInvoker) -> Self {
        Self {
            repo: repo.into(),
            tools,
        }
    }

    // `refs/` exists in every initialized repository.
    pub fn is_initialized(&self) -> bool {
        self.repo.join("refs").is_dir()
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        tracing::info!(repo = %self.repo.display(), "initializing snapshot store");
        fsutil::remove_path_if_exists(&self.repo)?;
        fsutil::ensure_dir(&self.repo)?;
        self.tools.run(
            &self
                .ostree()
                .arg("init")
                .arg("--mode=archive"),
        )?;
        Ok(())
    }

    // Unchanged trees do not create a new commit.
    pub fn commit(&self, tree: &Path, version: &str) -> Result<()> {
        let stamp = chrono::Local::now().format("%m/%d/%Y-%H:%M");
        let mut tree_arg = std::ffi::OsString::from("--tree=dir=");
        tree_arg.push(tree.as_os_str());
        tree_arg.push("/");
        self.tools.run(
            &self
                .ostree()
                .arg("commit")
                .arg(tree_arg)
                .arg("--skip-if-unchanged")
                .arg(format!("--branch={version}"))
                .arg(format!("--subject={version}-{stamp}")),
        )?;
        Ok(())
    }

    pub fn diff(&self, version: &str, base: &str) -> Result<Vec<DiffEntry>> {
        let out = self.tools.run(
            &self
                .ostree()
                .arg("diff")
                .arg(base)
                .arg(version)
                .capture_stdout(),
        )?;
        Ok(parse_diff(&out.stdout))
    }

    fn ostree(&self) -> ToolCommand {
        let mut repo_arg = std::ffi::OsString::from("--repo=");
        repo_arg.push(self.repo.as_os_str());
        ToolCommand::new("ostree").arg(repo_arg)
    }
}
