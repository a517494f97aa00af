#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fota_bundler::config::{self, BundleConfig};
use fota_bundler::runner::{ToolCommand, ToolInvoker, ToolOutput};
use fota_bundler::{Error, Result};

// Stands in for the host tools. Records every command and emulates just
// enough of each tool's filesystem effect for the pipeline to proceed:
//
// - `gzip -f -n IMG` renames `IMG` to `IMG.gz` (no compression)
// - `mksquashfs SRC OUT ...` writes a sorted listing of `SRC` into `OUT`
// - `tar -C DIR -xf ARCHIVE` reads `path=content` lines (a trailing `/`
//   makes a directory)
// - `tar -cf OUT -C DIR .` writes a sorted listing of `DIR` into `OUT`
// - `ostree init` creates `refs/`; `ostree diff` returns the scripted output
#[derive(Default)]
pub struct FakeInvoker {
    calls: Mutex<Vec<ToolCommand>>,
    diff_stdout: Mutex<String>,
    failure: Mutex<Option<(String, i32)>>,
}

impl FakeInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_diff(self, stdout: &str) -> Self {
        *self.diff_stdout.lock().expect("lock") = stdout.to_string();
        self
    }

    // Make the first command whose program is `program` exit with `code`.
    pub fn failing(self, program: &str, code: i32) -> Self {
        *self.failure.lock().expect("lock") = Some((program.to_string(), code));
        self
    }

    pub fn calls(&self) -> Vec<ToolCommand> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .map(|c| c.args_lossy())
            .collect()
    }
}

impl ToolInvoker for FakeInvoker {
    fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput> {
        self.calls.lock().expect("lock").push(cmd.clone());

        if let Some((program, code)) = self.failure.lock().expect("lock").clone() {
            if program == cmd.program {
                return Err(Error::process(cmd.display(), Some(code), "command failed"));
            }
        }

        let args = cmd.args_lossy();
        let mut stdout = String::new();
        match cmd.program.as_str() {
            "gzip" => {
                let img = args.last().expect("gzip target");
                fs::rename(img, format!("{img}.gz")).expect("fake gzip");
            }
            "mksquashfs" => {
                fs::write(&args[1], listing(Path::new(&args[0]))).expect("fake mksquashfs");
            }
            "tar" if args.iter().any(|a| a == "-xf") => {
                let dir = arg_after(&args, "-C");
                let archive = arg_after(&args, "-xf");
                extract_fake_archive(Path::new(&archive), Path::new(&dir));
            }
            "tar" if args.iter().any(|a| a == "-cf") => {
                let out = arg_after(&args, "-cf");
                let dir = arg_after(&args, "-C");
                fs::write(&out, listing(Path::new(&dir))).expect("fake tar");
            }
            "ostree" if args.iter().any(|a| a == "init") => {
                let repo = args[0].trim_start_matches("--repo=");
                fs::create_dir_all(Path::new(repo).join("refs")).expect("fake ostree init");
            }
            "ostree" if args.iter().any(|a| a == "diff") => {
                stdout = self.diff_stdout.lock().expect("lock").clone();
            }
            _ => {}
        }
        Ok(ToolOutput { code: 0, stdout })
    }
}

fn arg_after(args: &[String], flag: &str) -> String {
    let idx = args.iter().position(|a| a == flag).expect("flag present");
    args[idx + 1].clone()
}

// Sorted relative paths under `root`, one per line.
pub fn listing(root: &Path) -> String {
    let mut paths: Vec<String> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| e.expect("walk"))
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .expect("prefix")
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    paths.sort();
    let mut out = paths.join("\n");
    out.push('\n');
    out
}

fn extract_fake_archive(archive: &Path, dir: &Path) {
    let raw = fs::read_to_string(archive).expect("read fake archive");
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        let (path, content) = line.split_once('=').unwrap_or((line, ""));
        let dst = dir.join(path);
        if path.ends_with('/') {
            fs::create_dir_all(&dst).expect("mkdir");
        } else {
            fs::create_dir_all(dst.parent().expect("parent")).expect("mkdir");
            fs::write(&dst, content).expect("write");
        }
    }
}

pub fn write_rootfs_archive(path: &Path, entries: &[(&str, &str)]) {
    let body: Vec<String> = entries.iter().map(|(p, c)| format!("{p}={c}")).collect();
    fs::write(path, body.join("\n")).expect("write archive");
}

pub fn write_file(path: &Path, content: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, content).expect("write");
    path.to_path_buf()
}

// Config file rooted in `root`: `work_dir = root/work`, archive at
// `root/out/bundle.tar`, snapshot store at `root/repo`, then `components`.
pub fn write_config(root: &Path, components: &str) -> PathBuf {
    let body = format!(
        "work_dir = \"{work}\"\ntarget_images = [\"{target}\"]\nostree_repo = \"{repo}\"\n\n{components}",
        work = root.join("work").display(),
        target = root.join("out/bundle.tar").display(),
        repo = root.join("repo").display(),
    );
    write_file(&root.join("bundle.toml"), &body)
}

pub fn load_config(path: &Path) -> BundleConfig {
    let doc = config::load(path).expect("load config");
    BundleConfig::from_doc(&doc).expect("bundle config")
}

pub fn read_manifest(work: &Path) -> serde_json::Value {
    let raw = fs::read_to_string(work.join("bundle/manifest.json")).expect("manifest");
    serde_json::from_str(&raw).expect("manifest json")
}

pub fn tombstones_supported(dir: &Path) -> bool {
    fota_bundler::delta::write_tombstone(&dir.join(".node-check")).is_ok()
}
