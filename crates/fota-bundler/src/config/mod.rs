use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use toml::Value;

use crate::error::{Error, Result};

pub mod component;

pub use component::{
    ComponentDeclaration, ComponentEntry, ComponentMethod, CustomSpec, FsType, OverlayKind,
    OverlaySpec, PartitionSpec,
};

const DEFAULT_OSTREE_REPO: &str = "ostree_repo";

#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    #[cfg(test)]
    pub fn from_toml_str(path: impl Into<PathBuf>, raw: &str) -> Result<Self> {
        let value: Value = toml::from_str(raw)?;
        Ok(Self {
            path: path.into(),
            value,
        })
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }
        path.split('.')
            .try_fold(&self.value, |cur, seg| cur.as_table()?.get(seg))
    }

    pub fn table_path(&self, path: &str) -> Option<&toml::Table> {
        self.value_path(path)?.as_table()
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v.clone().try_into().map_err(|e| {
            Error::config(format!("failed to deserialize config at '{path}': {e}"))
        })?;
        Ok(Some(parsed))
    }
}

// Later values win; tables merge key by key.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_tbl), Value::Table(over_tbl)) => {
            for (k, v) in over_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

fn resolve_ref_path(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        p
    } else {
        from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
    }
}

fn string_list(path: &Path, value: Option<Value>, key: &str) -> Result<Vec<String>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let items = match value {
        Value::String(s) => vec![Value::String(s)],
        Value::Array(items) => items,
        _ => {
            return Err(Error::config(format!(
                "'{key}' in {} must be a string or a list of strings",
                path.display()
            )));
        }
    };
    items
        .into_iter()
        .map(|v| match v {
            Value::String(s) => Ok(s.trim().to_string()),
            _ => Err(Error::config(format!(
                "invalid '{key}' entry in {} (expected string)",
                path.display()
            ))),
        })
        .filter(|s| !matches!(s, Ok(s) if s.is_empty()))
        .collect()
}

// Base documents (`extends`, then each of `imports`) are merged underneath
// the document that references them.
fn load_value(path: &Path, seen: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !seen.insert(canonical.clone()) {
        return Err(Error::config(format!(
            "config include cycle at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::io(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::config(format!("TOML parse error in {}: {e}", path.display())))?;

    let (extends, imports) = match value.as_table_mut() {
        Some(tbl) => (
            string_list(path, tbl.remove("extends"), "extends")?,
            string_list(path, tbl.remove("imports"), "imports")?,
        ),
        None => (Vec::new(), Vec::new()),
    };

    let mut out = Value::Table(toml::Table::new());
    for reference in extends.iter().chain(imports.iter()) {
        let base = load_value(&resolve_ref_path(path, reference), seen)?;
        merge(&mut out, base);
    }
    merge(&mut out, value);

    seen.remove(&canonical);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut seen = HashSet::new();
    let value = load_value(path, &mut seen)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

#[derive(Debug, Clone, Deserialize)]
struct BundleSettings {
    work_dir: String,
    #[serde(default)]
    target_images: Vec<String>,
    #[serde(default)]
    ostree_repo: Option<String>,
    #[serde(default)]
    tool_timeout_secs: Option<u64>,
    #[serde(default)]
    source_date_epoch: Option<i64>,
    #[serde(default)]
    report: bool,
}

#[derive(Debug, Clone)]
pub struct BundleConfig {
    pub work_dir: PathBuf,
    // target_images[0]
    pub target: PathBuf,
    pub ostree_repo: PathBuf,
    pub tool_timeout: Option<Duration>,
    pub source_date_epoch: Option<i64>,
    pub report: bool,
    pub components: Vec<ComponentEntry>,
}

impl BundleConfig {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        let settings: BundleSettings = doc
            .deserialize_path("")?
            .ok_or_else(|| Error::config("empty configuration document"))?;

        let work_dir = settings.work_dir.trim();
        if work_dir.is_empty() {
            return Err(Error::config("work_dir is empty"));
        }
        let target = settings
            .target_images
            .first()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::config("target_images must name the bundle archive"))?;
        let ostree_repo = settings
            .ostree_repo
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_OSTREE_REPO);

        let mut components = Vec::new();
        if let Some(tbl) = doc.table_path("components") {
            for (name, value) in tbl {
                components.push(ComponentEntry::from_value(name, value)?);
            }
        }

        Ok(Self {
            work_dir: PathBuf::from(work_dir),
            target: PathBuf::from(target),
            ostree_repo: PathBuf::from(ostree_repo),
            tool_timeout: settings
                .tool_timeout_secs
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
            source_date_epoch: settings.source_date_epoch,
            report: settings.report,
            components,
        })
    }

    pub fn apply_env_defaults(&mut self) -> Result<()> {
        if self.source_date_epoch.is_some() {
            return Ok(());
        }
        if let Ok(raw) = std::env::var("SOURCE_DATE_EPOCH") {
            let raw = raw.trim();
            if !raw.is_empty() {
                let epoch = raw.parse::<i64>().map_err(|e| {
                    Error::config(format!("invalid SOURCE_DATE_EPOCH '{raw}': {e}"))
                })?;
                self.source_date_epoch = Some(epoch);
            }
        }
        Ok(())
    }

    pub fn enabled(&self) -> impl Iterator<Item = &ComponentDeclaration> {
        self.components.iter().filter_map(ComponentEntry::declaration)
    }
}
