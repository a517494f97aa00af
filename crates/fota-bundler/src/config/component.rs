use std::path::PathBuf;

use serde::Deserialize;
use toml::Value;

use crate::error::{Error, Result};

fn default_true() -> bool {
    true
}

fn default_fs_type() -> String {
    "ext4".into()
}

#[derive(Debug, Clone, Deserialize)]
struct EnabledFlag {
    #[serde(default = "default_true")]
    enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComponentConfig {
    method: String,
    component_type: Option<String>,
    file_name: Option<String>,
    vendor_version: String,
    required_version: Option<String>,
    min_version: Option<String>,
    max_version: Option<String>,
    description: Option<String>,
    annotations: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    exclude: Vec<String>,

    // raw
    partition: Option<PartitionConfig>,

    // overlay
    #[serde(rename = "type")]
    overlay_type: Option<String>,
    rootfs: Option<String>,
    #[serde(default)]
    items: toml::Table,

    // custom
    file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PartitionConfig {
    size: u64,
    #[serde(rename = "type", default = "default_fs_type")]
    fs_type: String,
    label: Option<String>,
    gpt_type: Option<String>,
    #[serde(default)]
    items: toml::Table,
}

#[derive(Debug, Clone)]
pub enum ComponentEntry {
    Enabled(ComponentDeclaration),
    // not validated beyond the name
    Disabled { name: String },
}

impl ComponentEntry {
    pub fn from_value(name: &str, value: &Value) -> Result<Self> {
        let flag: EnabledFlag = value
            .clone()
            .try_into()
            .map_err(|e| Error::config(format!("component '{name}': {e}")))?;
        if !flag.enabled {
            return Ok(Self::Disabled {
                name: name.to_string(),
            });
        }
        let cfg: ComponentConfig = value
            .clone()
            .try_into()
            .map_err(|e| Error::config(format!("component '{name}': {e}")))?;
        ComponentDeclaration::from_config(name, cfg).map(Self::Enabled)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Enabled(decl) => &decl.name,
            Self::Disabled { name } => name,
        }
    }

    pub fn declaration(&self) -> Option<&ComponentDeclaration> {
        match self {
            Self::Enabled(decl) => Some(decl),
            Self::Disabled { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsType {
    Ext4,
}

impl FsType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "ext4" => Some(Self::Ext4),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ext4 => "ext4",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    pub size_mb: u64,
    pub fs_type: FsType,
    pub label: Option<String>,
    // passed to mkfs as the filesystem UUID
    pub gpt_type: Option<String>,
    // (in-image target, host source), in declaration order
    pub items: Vec<(String, PathBuf)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayKind {
    Full,
    Incremental { base_version: String },
}

impl OverlayKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental { .. } => "incremental",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlaySpec {
    pub kind: OverlayKind,
    pub rootfs: PathBuf,
    pub items: Vec<(String, PathBuf)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomSpec {
    pub file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentMethod {
    Raw(PartitionSpec),
    Overlay(OverlaySpec),
    Custom(CustomSpec),
}

impl ComponentMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Raw(_) => "raw",
            Self::Overlay(_) => "overlay",
            Self::Custom(_) => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDeclaration {
    pub name: String,
    pub component_type: Option<String>,
    pub file_name: Option<String>,
    pub vendor_version: String,
    pub required_version: Option<String>,
    pub min_version: Option<String>,
    pub max_version: Option<String>,
    pub description: Option<String>,
    pub annotations: Option<serde_json::Map<String, serde_json::Value>>,
    pub exclude: Vec<String>,
    pub method: ComponentMethod,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

fn source_items(items: toml::Table) -> std::result::Result<Vec<(String, PathBuf)>, String> {
    items
        .into_iter()
        .map(|(dst, src)| match src {
            Value::String(src) => Ok((dst, PathBuf::from(src.trim()))),
            other => Err(format!(
                "item '{dst}' must map to a source path, got {}",
                other.type_str()
            )),
        })
        .collect()
}

impl ComponentDeclaration {
    fn from_config(name: &str, cfg: ComponentConfig) -> Result<Self> {
        let ctx = |msg: String| Error::config(format!("component '{name}': {msg}"));

        let vendor_version = cfg.vendor_version.trim().to_string();
        if vendor_version.is_empty() {
            return Err(ctx("vendorVersion is empty".into()));
        }
        let required_version = non_empty(cfg.required_version);

        let method = match cfg.method.trim() {
            "raw" => {
                let p = cfg
                    .partition
                    .ok_or_else(|| ctx("method 'raw' requires a [partition] table".into()))?;
                if p.size == 0 {
                    return Err(ctx("partition.size must be at least 1 (MiB)".into()));
                }
                let fs_type = FsType::parse(&p.fs_type).ok_or_else(|| {
                    ctx(format!("unsupported partition type '{}'", p.fs_type.trim()))
                })?;
                ComponentMethod::Raw(PartitionSpec {
                    size_mb: p.size,
                    fs_type,
                    label: non_empty(p.label),
                    gpt_type: non_empty(p.gpt_type),
                    items: source_items(p.items).map_err(ctx)?,
                })
            }
            "overlay" => {
                let kind = match cfg.overlay_type.as_deref().map(str::trim) {
                    Some("full") => OverlayKind::Full,
                    Some("incremental") => OverlayKind::Incremental {
                        base_version: required_version.clone().ok_or_else(|| {
                            ctx("incremental overlay requires requiredVersion".into())
                        })?,
                    },
                    Some(other) => {
                        return Err(ctx(format!(
                            "unknown overlay type '{other}' (expected full or incremental)"
                        )));
                    }
                    None => return Err(ctx("method 'overlay' requires type".into())),
                };
                let rootfs = non_empty(cfg.rootfs)
                    .ok_or_else(|| ctx("method 'overlay' requires rootfs".into()))?;
                ComponentMethod::Overlay(OverlaySpec {
                    kind,
                    rootfs: PathBuf::from(rootfs.trim()),
                    items: source_items(cfg.items).map_err(ctx)?,
                })
            }
            "custom" => {
                let file =
                    non_empty(cfg.file).ok_or_else(|| ctx("method 'custom' requires file".into()))?;
                ComponentMethod::Custom(CustomSpec {
                    file: PathBuf::from(file.trim()),
                })
            }
            other => {
                return Err(ctx(format!(
                    "unknown method '{other}' (expected raw, overlay or custom)"
                )));
            }
        };

        Ok(Self {
            name: name.to_string(),
            component_type: non_empty(cfg.component_type),
            file_name: non_empty(cfg.file_name),
            vendor_version,
            required_version,
            min_version: non_empty(cfg.min_version),
            max_version: non_empty(cfg.max_version),
            description: non_empty(cfg.description),
            annotations: cfg.annotations.filter(|m| !m.is_empty()),
            exclude: cfg.exclude,
            method,
        })
    }
}
