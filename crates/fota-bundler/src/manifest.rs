use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::ComponentDeclaration;
use crate::error::{Error, Result};
use crate::fsutil;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentMetadata {
    pub id: String,
    pub vendor_version: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ComponentMetadata {
    pub fn for_declaration(decl: &ComponentDeclaration) -> Self {
        let id = decl
            .component_type
            .clone()
            .unwrap_or_else(|| decl.name.clone());
        let file_name = decl
            .file_name
            .clone()
            .unwrap_or_else(|| default_file_name(&id, &decl.vendor_version));
        Self {
            id,
            vendor_version: decl.vendor_version.clone(),
            file_name,
            required_version: decl.required_version.clone(),
            min_version: decl.min_version.clone(),
            max_version: decl.max_version.clone(),
            description: decl.description.clone(),
            annotations: decl.annotations.clone(),
        }
    }

    pub fn annotate(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.annotations
            .get_or_insert_with(Default::default)
            .insert(key.to_string(), value.into());
    }
}

pub fn default_file_name(id: &str, vendor_version: &str) -> String {
    format!("{id}-{vendor_version}.img")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub format_version: u32,
    pub components: Vec<ComponentMetadata>,
}

#[derive(Debug, Default)]
pub struct ManifestBuilder {
    components: Vec<ComponentMetadata>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, meta: ComponentMetadata) {
        self.components.push(meta);
    }

    pub fn components(&self) -> &[ComponentMetadata] {
        &self.components
    }

    pub fn to_json(&self) -> Result<String> {
        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            components: self.components.clone(),
        };
        let mut buf = Vec::new();
        let fmt = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, fmt);
        manifest
            .serialize(&mut ser)
            .map_err(|e| Error::io(format!("manifest encode error: {e}")))?;
        String::from_utf8(buf).map_err(|e| Error::io(format!("manifest encode error: {e}")))
    }

    pub fn finalize(self, bundle_dir: &Path) -> Result<PathBuf> {
        let path = bundle_dir.join(MANIFEST_FILE_NAME);
        fsutil::write_text(&path, &self.to_json()?)?;
        tracing::info!(path = %path.display(), components = self.components.len(), "wrote manifest");
        Ok(path)
    }
}
