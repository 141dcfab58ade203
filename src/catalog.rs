use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::compiler::ProfileParam;
use crate::error::{Result, PertitleError};

/// Read-only source of codec families and their encoding profiles.
pub trait Catalog: Send + Sync {
    /// Active codec families
    fn codec_families(&self) -> Vec<String>;

    /// Profile names of a family, in catalog order
    fn profile_names(&self, family: &str) -> Vec<String>;

    /// Ordered parameters of one profile; empty when unknown
    fn profile_params(&self, family: &str, profile: &str) -> Vec<ProfileParam>;
}

/// Catalog kept in a TOML file:
///
/// ```toml
/// [[codec]]
/// name = "h264 master"
///
/// [[codec.profile]]
/// name = "main_1080p"
/// params = [
///     { key = "-c:v", value = "libx264" },
///     { key = "-s", value = "1920x1080" },
/// ]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlCatalog {
    #[serde(default, rename = "codec")]
    pub codecs: Vec<CodecEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecEntry {
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, rename = "profile")]
    pub profiles: Vec<ProfileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ProfileParam>,
}

fn default_active() -> bool {
    true
}

impl TomlCatalog {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PertitleError::FileNotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| PertitleError::Catalog(format!("Failed to read catalog: {}", e)))?;
        let catalog = Self::from_toml_str(&content)?;

        info!(
            "Loaded catalog {} with {} active codec(s)",
            path.display(),
            catalog.codec_families().len()
        );
        Ok(catalog)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| PertitleError::Catalog(format!("Failed to parse catalog: {}", e)))
    }

    fn codec(&self, family: &str) -> Option<&CodecEntry> {
        self.codecs
            .iter()
            .find(|codec| codec.active && codec.name == family)
    }
}

impl Catalog for TomlCatalog {
    fn codec_families(&self) -> Vec<String> {
        self.codecs
            .iter()
            .filter(|codec| codec.active)
            .map(|codec| codec.name.clone())
            .collect()
    }

    fn profile_names(&self, family: &str) -> Vec<String> {
        self.codec(family)
            .map(|codec| codec.profiles.iter().map(|p| p.name.clone()).collect())
            .unwrap_or_default()
    }

    fn profile_params(&self, family: &str, profile: &str) -> Vec<ProfileParam> {
        self.codec(family)
            .and_then(|codec| codec.profiles.iter().find(|p| p.name == profile))
            .map(|p| p.params.clone())
            .unwrap_or_default()
    }
}
